//! VFS Mount Point Management
//!
//! Manages filesystem mount points and the global mount table. Each mounted
//! filesystem supplies a vtable (`MountOps`); the VFS stores it behind a
//! trait object and passes back the relative path on every call. The VFS
//! itself never inspects filesystem-private state.

use super::error::VfsError;
use super::inode::{FileType, VfsInode};
use super::file::OpenFlags;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// One entry returned by `MountOps::readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode_num: u64,
    pub file_type: FileType,
}

/// The operation vtable a mounted filesystem supplies. Paths passed in are
/// always relative to the mount root (the mount path prefix has already
/// been stripped by the VFS).
pub trait MountOps: Send + Sync {
    fn open(&self, rel_path: &str, flags: OpenFlags) -> Result<VfsInode, VfsError>;
    fn close(&self, inode_num: u64);
    fn read(&self, inode_num: u64, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError>;
    fn write(&self, inode_num: u64, offset: u64, buf: &[u8]) -> Result<usize, VfsError>;
    fn readdir(&self, rel_path: &str) -> Result<Vec<DirEntry>, VfsError>;
    fn mkdir(&self, rel_path: &str) -> Result<(), VfsError>;
    fn stat(&self, rel_path: &str) -> Result<VfsInode, VfsError>;
    fn create(&self, rel_path: &str) -> Result<VfsInode, VfsError>;
    fn delete(&self, rel_path: &str) -> Result<(), VfsError>;
}

/// A mounted filesystem
pub struct MountPoint {
    /// Path where this filesystem is mounted (e.g., "/", "/mnt/data")
    pub mount_path: String,
    /// Unique mount ID
    pub mount_id: usize,
    /// Filesystem type (e.g., "ext2", "tmpfs")
    pub fs_type: &'static str,
    /// Operation vtable for this mount
    pub ops: Arc<dyn MountOps>,
}

/// Global mount table
static MOUNT_TABLE: Mutex<Vec<MountPoint>> = Mutex::new(Vec::new());

/// Next available mount ID
static NEXT_MOUNT_ID: Mutex<usize> = Mutex::new(0);

/// Register a mount point.
///
/// Mount replaces nothing in the in-memory tree; it is purely a table entry
/// consulted during path resolution.
pub fn mount(path: &str, fs_type: &'static str, ops: Arc<dyn MountOps>) -> usize {
    let mut table = MOUNT_TABLE.lock();
    let mut next_id = NEXT_MOUNT_ID.lock();

    let mount_id = *next_id;
    *next_id += 1;

    table.push(MountPoint {
        mount_path: String::from(path),
        mount_id,
        fs_type,
        ops,
    });

    mount_id
}

/// Unmount a filesystem
#[allow(dead_code)] // Part of VFS mount API
pub fn unmount(mount_id: usize) -> Result<(), VfsError> {
    let mut table = MOUNT_TABLE.lock();

    if let Some(pos) = table.iter().position(|m| m.mount_id == mount_id) {
        table.remove(pos);
        Ok(())
    } else {
        Err(VfsError::NotMounted)
    }
}

/// Find the most specific (longest matching) mount point for a path, along
/// with the path remainder relative to that mount's root.
pub fn find_mount(path: &str) -> Option<(usize, String)> {
    let table = MOUNT_TABLE.lock();

    let mut best: Option<(usize, usize)> = None; // (table index, path_len)
    for (i, mount) in table.iter().enumerate() {
        if path.starts_with(mount.mount_path.as_str()) {
            let path_len = mount.mount_path.len();
            if best.map(|(_, len)| path_len > len).unwrap_or(true) {
                best = Some((i, path_len));
            }
        }
    }

    best.map(|(i, prefix_len)| {
        let mount = &table[i];
        let remainder = &path[prefix_len..];
        let remainder = if remainder.is_empty() { "/" } else { remainder };
        (mount.mount_id, String::from(remainder))
    })
}

/// Look up a mount's operation vtable by mount id.
pub fn mount_ops(mount_id: usize) -> Option<Arc<dyn MountOps>> {
    let table = MOUNT_TABLE.lock();
    table.iter().find(|m| m.mount_id == mount_id).map(|m| m.ops.clone())
}

/// Get information about a mount point
#[allow(dead_code)] // Part of VFS mount API
pub fn get_mount_info(mount_id: usize) -> Option<(String, &'static str)> {
    let table = MOUNT_TABLE.lock();
    table
        .iter()
        .find(|m| m.mount_id == mount_id)
        .map(|m| (m.mount_path.clone(), m.fs_type))
}

/// List all mount points
#[allow(dead_code)] // Part of VFS mount API
pub fn list_mounts() -> Vec<(usize, String, &'static str)> {
    let table = MOUNT_TABLE.lock();
    table
        .iter()
        .map(|m| (m.mount_id, m.mount_path.clone(), m.fs_type))
        .collect()
}
