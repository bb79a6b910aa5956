//! Path resolution and the top-level VFS operations.
//!
//! Walks path components from root, honoring "." and "..", and at each
//! resolved path checks whether it falls inside an active mount; if so,
//! the remainder is delegated to that mount's `MountOps`. Absent a
//! matching mount, operations run against the in-memory node tree.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::error::VfsError;
use super::file::{OpenFile, OpenFlags, SeekFrom};
use super::inode::VfsInode;
use super::mount::{self, DirEntry};
use super::tree::{self, NodeId};
use super::fd::{self, Fd};

/// Sentinel `OpenFile::mount_id` marking a file backed by the in-memory tree.
const TREE_MOUNT: usize = usize::MAX;

enum Resolved {
    Mount(usize, String),
    Tree(NodeId),
}

fn normalize(path: &str) -> Result<String, VfsError> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath);
    }
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            c => stack.push(c),
        }
    }
    if stack.is_empty() {
        Ok(String::from("/"))
    } else {
        let mut out = String::new();
        for c in &stack {
            out.push('/');
            out.push_str(c);
        }
        Ok(out)
    }
}

fn split_parent(path: &str) -> Result<(String, String), VfsError> {
    let norm = normalize(path)?;
    if norm == "/" {
        return Err(VfsError::InvalidPath);
    }
    let idx = norm.rfind('/').unwrap();
    let parent = if idx == 0 { String::from("/") } else { norm[..idx].to_string() };
    let name = norm[idx + 1..].to_string();
    Ok((parent, name))
}

fn join_rel(rel: &str, name: &str) -> String {
    let mut target = rel.to_string();
    if !target.ends_with('/') {
        target.push('/');
    }
    target.push_str(name);
    target
}

fn resolve(path: &str) -> Result<Resolved, VfsError> {
    let norm = normalize(path)?;
    if let Some((mount_id, remainder)) = mount::find_mount(&norm) {
        return Ok(Resolved::Mount(mount_id, remainder));
    }

    let mut node = tree::ROOT_NODE;
    for component in norm.split('/').filter(|s| !s.is_empty()) {
        node = tree::lookup_child(node, component)?.ok_or(VfsError::NotFound)?;
    }
    Ok(Resolved::Tree(node))
}

fn ops_for(mount_id: usize) -> Result<alloc::sync::Arc<dyn mount::MountOps>, VfsError> {
    mount::mount_ops(mount_id).ok_or(VfsError::NotMounted)
}

pub fn stat(path: &str) -> Result<VfsInode, VfsError> {
    match resolve(path)? {
        Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.stat(&rel),
        Resolved::Tree(node) => tree::stat(node),
    }
}

pub fn readdir(path: &str) -> Result<Vec<DirEntry>, VfsError> {
    match resolve(path)? {
        Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.readdir(&rel),
        Resolved::Tree(node) => tree::readdir(node),
    }
}

pub fn mkdir(path: &str) -> Result<(), VfsError> {
    match resolve(path) {
        Ok(Resolved::Mount(mount_id, rel)) => ops_for(mount_id)?.mkdir(&rel),
        Ok(Resolved::Tree(_)) => Err(VfsError::AlreadyExists),
        Err(VfsError::NotFound) => {
            let (parent_path, name) = split_parent(path)?;
            match resolve(&parent_path)? {
                Resolved::Tree(parent) => {
                    tree::mkdir(parent, &name)?;
                    Ok(())
                }
                Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.mkdir(&join_rel(&rel, &name)),
            }
        }
        Err(e) => Err(e),
    }
}

pub fn create(path: &str) -> Result<VfsInode, VfsError> {
    match resolve(path) {
        Ok(Resolved::Mount(mount_id, rel)) => ops_for(mount_id)?.create(&rel),
        Ok(Resolved::Tree(_)) => Err(VfsError::AlreadyExists),
        Err(VfsError::NotFound) => {
            let (parent_path, name) = split_parent(path)?;
            match resolve(&parent_path)? {
                Resolved::Tree(parent) => {
                    let node = tree::create(parent, &name)?;
                    tree::stat(node)
                }
                Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.create(&join_rel(&rel, &name)),
            }
        }
        Err(e) => Err(e),
    }
}

pub fn delete(path: &str) -> Result<(), VfsError> {
    match resolve(path)? {
        Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.delete(&rel),
        Resolved::Tree(_) => {
            let (parent_path, name) = split_parent(path)?;
            match resolve(&parent_path)? {
                Resolved::Tree(parent) => tree::delete(parent, &name),
                Resolved::Mount(mount_id, rel) => ops_for(mount_id)?.delete(&join_rel(&rel, &name)),
            }
        }
    }
}

pub fn open(path: &str, flags: OpenFlags) -> Result<Fd, VfsError> {
    let (inode, mount_id) = match resolve(path) {
        Ok(Resolved::Mount(mount_id, rel)) => {
            let ops = ops_for(mount_id)?;
            match ops.open(&rel, flags) {
                Ok(inode) => (inode, mount_id),
                Err(VfsError::NotFound) if flags.create => (ops.create(&rel)?, mount_id),
                Err(e) => return Err(e),
            }
        }
        Ok(Resolved::Tree(node)) => (tree::stat(node)?, TREE_MOUNT),
        Err(VfsError::NotFound) if flags.create => {
            let inode = create(path)?;
            let mount_id = match resolve(path)? {
                Resolved::Mount(id, _) => id,
                Resolved::Tree(_) => TREE_MOUNT,
            };
            (inode, mount_id)
        }
        Err(e) => return Err(e),
    };
    fd::insert(OpenFile::new(inode, flags, mount_id))
}

pub fn read(fd: Fd, buf: &mut [u8]) -> Result<usize, VfsError> {
    let file = fd::get(fd).ok_or(VfsError::NotFound)?;
    if !file.can_read() {
        return Err(VfsError::PermissionDenied);
    }
    let offset = file.tell();
    let n = if file.mount_id == TREE_MOUNT {
        tree::read(file.inode.inode_num as NodeId, offset, buf)?
    } else {
        ops_for(file.mount_id)?.read(file.inode.inode_num, offset, buf)?
    };
    file.seek(SeekFrom::Current(n as i64))?;
    Ok(n)
}

pub fn write(fd: Fd, buf: &[u8]) -> Result<usize, VfsError> {
    let file = fd::get(fd).ok_or(VfsError::NotFound)?;
    if !file.can_write() {
        return Err(VfsError::PermissionDenied);
    }
    let offset = if file.flags.append { file.inode.size } else { file.tell() };
    let n = if file.mount_id == TREE_MOUNT {
        tree::write(file.inode.inode_num as NodeId, offset, buf)?
    } else {
        ops_for(file.mount_id)?.write(file.inode.inode_num, offset, buf)?
    };
    file.seek(SeekFrom::Current(n as i64))?;
    Ok(n)
}

pub fn close(fd: Fd) -> Result<(), VfsError> {
    let file = fd::remove(fd).ok_or(VfsError::NotFound)?;
    if file.mount_id != TREE_MOUNT {
        if let Some(ops) = mount::mount_ops(file.mount_id) {
            ops.close(file.inode.inode_num);
        }
    }
    Ok(())
}
