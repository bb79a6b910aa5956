//! In-memory VFS node tree.
//!
//! Backs every path that isn't inside an active mount. Bounded: a fixed
//! arena of nodes, a fixed child-count ceiling per directory, and a fixed
//! inline-data ceiling per regular file, matching the VFS's "no dynamic
//! unbounded growth" invariant.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

use super::error::VfsError;
use super::inode::{FilePermissions, FileType, VfsInode};
use super::mount::DirEntry;

pub type NodeId = usize;

pub const ROOT_NODE: NodeId = 0;
const MAX_NODES: usize = 256;
const MAX_CHILDREN: usize = 64;
const MAX_INLINE_DATA: usize = 4096;

struct Node {
    name: String,
    parent: NodeId,
    file_type: FileType,
    children: Vec<(String, NodeId)>,
    data: Vec<u8>,
}

struct Tree {
    nodes: Vec<Option<Node>>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = Vec::with_capacity(MAX_NODES);
        nodes.push(Some(Node {
            name: String::from("/"),
            parent: ROOT_NODE,
            file_type: FileType::Directory,
            children: Vec::new(),
            data: Vec::new(),
        }));
        Tree { nodes }
    }

    fn get(&self, id: NodeId) -> Result<&Node, VfsError> {
        self.nodes.get(id).and_then(|n| n.as_ref()).ok_or(VfsError::NotFound)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, VfsError> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut()).ok_or(VfsError::NotFound)
    }
}

static TREE: Mutex<Option<Tree>> = Mutex::new(None);

fn with_tree<T>(f: impl FnOnce(&mut Tree) -> T) -> T {
    let mut guard = TREE.lock();
    if guard.is_none() {
        *guard = Some(Tree::new());
    }
    f(guard.as_mut().unwrap())
}

/// Look up a single child by name under `parent`.
pub fn lookup_child(parent: NodeId, name: &str) -> Result<Option<NodeId>, VfsError> {
    with_tree(|tree| {
        let node = tree.get(parent)?;
        Ok(node.children.iter().find(|(n, _)| n == name).map(|(_, id)| *id))
    })
}

fn alloc_node(tree: &mut Tree, parent: NodeId, name: &str, file_type: FileType) -> Result<NodeId, VfsError> {
    let used = tree.nodes.iter().filter(|n| n.is_some()).count();
    if used >= MAX_NODES {
        return Err(VfsError::NoSpace);
    }

    {
        let parent_node = tree.get(parent)?;
        if parent_node.file_type != FileType::Directory {
            return Err(VfsError::NotDirectory);
        }
        if parent_node.children.len() >= MAX_CHILDREN {
            return Err(VfsError::NoSpace);
        }
        if parent_node.children.iter().any(|(n, _)| n == name) {
            return Err(VfsError::AlreadyExists);
        }
    }

    let id = match tree.nodes.iter().position(|n| n.is_none()) {
        Some(slot) => slot,
        None => {
            tree.nodes.push(None);
            tree.nodes.len() - 1
        }
    };

    tree.nodes[id] = Some(Node {
        name: name.to_string(),
        parent,
        file_type,
        children: Vec::new(),
        data: Vec::new(),
    });

    tree.get_mut(parent)?.children.push((name.to_string(), id));
    Ok(id)
}

pub fn mkdir(parent: NodeId, name: &str) -> Result<NodeId, VfsError> {
    with_tree(|tree| alloc_node(tree, parent, name, FileType::Directory))
}

pub fn create(parent: NodeId, name: &str) -> Result<NodeId, VfsError> {
    with_tree(|tree| alloc_node(tree, parent, name, FileType::Regular))
}

pub fn delete(parent: NodeId, name: &str) -> Result<(), VfsError> {
    with_tree(|tree| {
        let child_id = {
            let parent_node = tree.get(parent)?;
            parent_node
                .children
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
                .ok_or(VfsError::NotFound)?
        };

        if tree.get(child_id)?.file_type == FileType::Directory && !tree.get(child_id)?.children.is_empty() {
            return Err(VfsError::InvalidPath);
        }

        tree.get_mut(parent)?.children.retain(|(n, _)| n != name);
        tree.nodes[child_id] = None;
        Ok(())
    })
}

pub fn read(node: NodeId, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
    with_tree(|tree| {
        let node = tree.get(node)?;
        if node.file_type != FileType::Regular {
            return Err(VfsError::IsDirectory);
        }
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - offset);
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    })
}

pub fn write(node: NodeId, offset: u64, buf: &[u8]) -> Result<usize, VfsError> {
    with_tree(|tree| {
        let node = tree.get_mut(node)?;
        if node.file_type != FileType::Regular {
            return Err(VfsError::IsDirectory);
        }
        let offset = offset as usize;
        if offset + buf.len() > MAX_INLINE_DATA {
            return Err(VfsError::NoSpace);
        }
        if node.data.len() < offset + buf.len() {
            node.data.resize(offset + buf.len(), 0);
        }
        node.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    })
}

pub fn stat(node: NodeId) -> Result<VfsInode, VfsError> {
    with_tree(|tree| {
        let n = tree.get(node)?;
        Ok(VfsInode {
            inode_num: node as u64,
            file_type: n.file_type,
            size: n.data.len() as u64,
            permissions: FilePermissions::from_mode(0o755),
            uid: 0,
            gid: 0,
            link_count: 1,
            atime: 0,
            mtime: 0,
            ctime: 0,
        })
    })
}

pub fn readdir(node: NodeId) -> Result<Vec<DirEntry>, VfsError> {
    with_tree(|tree| {
        let n = tree.get(node)?;
        if n.file_type != FileType::Directory {
            return Err(VfsError::NotDirectory);
        }
        Ok(n.children
            .iter()
            .map(|(name, id)| {
                let file_type = tree.get(*id).map(|n| n.file_type).unwrap_or(FileType::Regular);
                DirEntry {
                    name: name.clone(),
                    inode_num: *id as u64,
                    file_type,
                }
            })
            .collect())
    })
}
