//! ext2 filesystem implementation
//!
//! The Second Extended Filesystem (ext2) is a classic Linux filesystem.
//! This module provides structures and functions for parsing ext2 filesystems.

pub mod superblock;
pub mod block_group;
pub mod dir;
pub mod inode;
pub mod file;

pub use superblock::*;
pub use block_group::*;
pub use dir::*;
pub use inode::*;
pub use file::*;

use crate::block::CachedBlockDevice;
use crate::fs::vfs::error::VfsError;
use crate::fs::vfs::file::OpenFlags;
use crate::fs::vfs::inode::{FilePermissions, FileType as VfsFileType, VfsInode};
use crate::fs::vfs::mount::{DirEntry as VfsDirEntry, MountOps};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// A mounted ext2 filesystem instance
///
/// Holds the superblock, block group descriptors, and a reference
/// to the underlying block device for filesystem operations.
pub struct Ext2Fs {
    /// The filesystem superblock
    pub superblock: Ext2Superblock,
    /// Block group descriptors
    pub block_groups: Vec<Ext2BlockGroupDesc>,
    /// The underlying block device
    pub device: Arc<CachedBlockDevice>,
}

impl Ext2Fs {
    /// Create a new ext2 filesystem instance from a block device
    ///
    /// Reads and validates the superblock and block group descriptors.
    pub fn new(device: Arc<CachedBlockDevice>) -> Result<Self, &'static str> {
        // Read the superblock
        let superblock = Ext2Superblock::read_from(device.as_ref())
            .map_err(|_| "Failed to read ext2 superblock")?;

        if !superblock.is_valid() {
            return Err("Invalid ext2 magic number");
        }

        // Read block group descriptors
        let block_groups = Ext2BlockGroupDesc::read_table(device.as_ref(), &superblock)
            .map_err(|_| "Failed to read block group descriptors")?;

        Ok(Self {
            superblock,
            block_groups,
            device,
        })
    }

    /// Read an inode from the filesystem
    pub fn read_inode(&self, inode_num: u32) -> Result<Ext2Inode, &'static str> {
        Ext2Inode::read_from(
            self.device.as_ref(),
            inode_num,
            &self.superblock,
            &self.block_groups,
        )
        .map_err(|_| "Failed to read inode")
    }

    /// Read directory entries from an inode
    ///
    /// Returns the raw directory data for parsing with DirReader.
    pub fn read_directory(&self, inode: &Ext2Inode) -> Result<Vec<u8>, &'static str> {
        if !inode.is_dir() {
            return Err("Not a directory");
        }
        read_file(self.device.as_ref(), inode, &self.superblock)
            .map_err(|_| "Failed to read directory data")
    }

    /// Look up a path component in a directory
    ///
    /// Returns the inode number of the matching entry, or None if not found.
    pub fn lookup_in_dir(&self, dir_inode: &Ext2Inode, name: &str) -> Result<Option<u32>, &'static str> {
        let dir_data = self.read_directory(dir_inode)?;
        Ok(find_entry(&dir_data, name).map(|entry| entry.inode))
    }

    /// Resolve a path to an inode number
    ///
    /// Walks the directory tree from root, looking up each path component.
    /// Supports absolute paths starting with "/".
    pub fn resolve_path(&self, path: &str) -> Result<u32, &'static str> {
        // Must start with "/"
        if !path.starts_with('/') {
            return Err("Path must be absolute");
        }

        // Start at root inode (always inode 2 in ext2)
        let mut current_inode_num = EXT2_ROOT_INO;

        // Split path into components, skipping empty parts
        for component in path.split('/').filter(|s| !s.is_empty()) {
            // Read the current directory inode
            let current_inode = self.read_inode(current_inode_num)?;

            // Make sure it's a directory
            if !current_inode.is_dir() {
                return Err("Not a directory in path");
            }

            // Look up the component in this directory
            match self.lookup_in_dir(&current_inode, component)? {
                Some(inode_num) => {
                    current_inode_num = inode_num;
                }
                None => {
                    return Err("Path component not found");
                }
            }
        }

        Ok(current_inode_num)
    }

    /// Read file content from an inode
    pub fn read_file_content(&self, inode: &Ext2Inode) -> Result<Vec<u8>, &'static str> {
        read_file(self.device.as_ref(), inode, &self.superblock)
            .map_err(|_| "Failed to read file content")
    }

    /// Read a range of file content from an inode
    pub fn read_file_range(
        &self,
        inode: &Ext2Inode,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, &'static str> {
        read_file_range(self.device.as_ref(), inode, &self.superblock, offset, length)
            .map_err(|_| "Failed to read file range")
    }
}

fn ext2_filetype_to_vfs(ft: FileType) -> VfsFileType {
    match ft {
        FileType::Regular => VfsFileType::Regular,
        FileType::Directory => VfsFileType::Directory,
        FileType::CharDevice => VfsFileType::CharDevice,
        FileType::BlockDevice => VfsFileType::BlockDevice,
        FileType::Fifo => VfsFileType::Fifo,
        FileType::Socket => VfsFileType::Socket,
        FileType::SymLink => VfsFileType::SymLink,
        FileType::Unknown => VfsFileType::Regular,
    }
}

impl Ext2Fs {
    fn to_vfs_inode(&self, inode_num: u32, inode: &Ext2Inode) -> VfsInode {
        let size = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_size)) };
        let uid = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_uid)) };
        let gid = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_gid)) };
        let links = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_links_count)) };
        let atime = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_atime)) };
        let mtime = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_mtime)) };
        let ctime = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(inode.i_ctime)) };
        VfsInode {
            inode_num: inode_num as u64,
            file_type: ext2_filetype_to_vfs(inode.file_type()),
            size: size as u64,
            permissions: FilePermissions::from_mode(inode.permissions()),
            uid: uid as u32,
            gid: gid as u32,
            link_count: links,
            atime: atime as u64,
            mtime: mtime as u64,
            ctime: ctime as u64,
        }
    }
}

/// ext2 is mounted read-only; every mutating `MountOps` call is rejected.
impl MountOps for Ext2Fs {
    fn open(&self, rel_path: &str, _flags: OpenFlags) -> Result<VfsInode, VfsError> {
        let inode_num = self.resolve_path(rel_path).map_err(|_| VfsError::NotFound)?;
        let inode = self.read_inode(inode_num).map_err(|_| VfsError::IoError)?;
        Ok(self.to_vfs_inode(inode_num, &inode))
    }

    fn close(&self, _inode_num: u64) {}

    fn read(&self, inode_num: u64, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        let inode = self
            .read_inode(inode_num as u32)
            .map_err(|_| VfsError::IoError)?;
        if inode.is_dir() {
            return Err(VfsError::IsDirectory);
        }
        let data = self
            .read_file_range(&inode, offset, buf.len())
            .map_err(|_| VfsError::IoError)?;
        let n = data.len();
        buf[..n].copy_from_slice(&data);
        Ok(n)
    }

    fn write(&self, _inode_num: u64, _offset: u64, _buf: &[u8]) -> Result<usize, VfsError> {
        Err(VfsError::ReadOnly)
    }

    fn readdir(&self, rel_path: &str) -> Result<Vec<VfsDirEntry>, VfsError> {
        let inode_num = self.resolve_path(rel_path).map_err(|_| VfsError::NotFound)?;
        let inode = self.read_inode(inode_num).map_err(|_| VfsError::IoError)?;
        if !inode.is_dir() {
            return Err(VfsError::NotDirectory);
        }
        let data = self.read_directory(&inode).map_err(|_| VfsError::IoError)?;
        let mut out = Vec::new();
        for entry in DirReader::new(&data) {
            out.push(VfsDirEntry {
                name: entry.name.clone(),
                inode_num: entry.inode as u64,
                file_type: match entry.file_type {
                    EXT2_FT_DIR => VfsFileType::Directory,
                    EXT2_FT_CHRDEV => VfsFileType::CharDevice,
                    EXT2_FT_BLKDEV => VfsFileType::BlockDevice,
                    EXT2_FT_FIFO => VfsFileType::Fifo,
                    EXT2_FT_SOCK => VfsFileType::Socket,
                    EXT2_FT_SYMLINK => VfsFileType::SymLink,
                    _ => VfsFileType::Regular,
                },
            });
        }
        Ok(out)
    }

    fn mkdir(&self, _rel_path: &str) -> Result<(), VfsError> {
        Err(VfsError::ReadOnly)
    }

    fn stat(&self, rel_path: &str) -> Result<VfsInode, VfsError> {
        let inode_num = self.resolve_path(rel_path).map_err(|_| VfsError::NotFound)?;
        let inode = self.read_inode(inode_num).map_err(|_| VfsError::IoError)?;
        Ok(self.to_vfs_inode(inode_num, &inode))
    }

    fn create(&self, _rel_path: &str) -> Result<VfsInode, VfsError> {
        Err(VfsError::ReadOnly)
    }

    fn delete(&self, _rel_path: &str) -> Result<(), VfsError> {
        Err(VfsError::ReadOnly)
    }
}

/// Global mounted ext2 root filesystem, shared with the VFS mount table.
static ROOT_EXT2: Mutex<Option<Arc<Ext2Fs>>> = Mutex::new(None);

/// Initialize the root ext2 filesystem
///
/// Mounts the primary block device ("ata0") as the root filesystem.
/// This should be called during kernel initialization after the block
/// layer has probed and registered its drives.
pub fn init_root_fs() -> Result<(), &'static str> {
    // Get the primary block device
    let device = CachedBlockDevice::primary()
        .ok_or("No block device available")?;
    let device = Arc::new(device);

    // Create the ext2 filesystem instance
    let fs = Arc::new(Ext2Fs::new(device)?);

    // Read packed struct fields safely before logging
    let blocks_count = unsafe {
        core::ptr::read_unaligned(core::ptr::addr_of!(fs.superblock.s_blocks_count))
    };
    let inodes_count = unsafe {
        core::ptr::read_unaligned(core::ptr::addr_of!(fs.superblock.s_inodes_count))
    };
    log::info!(
        "ext2: Mounted root filesystem - {} blocks, {} inodes, block size {}",
        blocks_count,
        inodes_count,
        fs.superblock.block_size()
    );

    // Register with the VFS mount table, handing it our vtable
    crate::fs::vfs::mount("/", "ext2", fs.clone() as Arc<dyn MountOps>);

    // Store globally for direct access (debug commands, etc.)
    *ROOT_EXT2.lock() = Some(fs);

    Ok(())
}

/// Access the root ext2 filesystem
///
/// Returns None if the filesystem hasn't been initialized yet.
pub fn root_fs() -> spin::MutexGuard<'static, Option<Arc<Ext2Fs>>> {
    ROOT_EXT2.lock()
}

/// Check if the root filesystem is mounted
pub fn is_mounted() -> bool {
    ROOT_EXT2.lock().is_some()
}
