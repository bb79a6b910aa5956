//! Global file descriptor table.
//!
//! Maps small integers to open file handles, per the VFS's
//! `{node-or-fs-fd, offset, flags}` descriptor record.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

use super::error::VfsError;
use super::file::OpenFile;

pub type Fd = i32;

const MAX_OPEN_FILES: usize = 256;

struct FdTable {
    files: BTreeMap<Fd, Arc<OpenFile>>,
    next_fd: Fd,
}

static FD_TABLE: Mutex<FdTable> = Mutex::new(FdTable {
    files: BTreeMap::new(),
    next_fd: 0,
});

pub fn insert(file: OpenFile) -> Result<Fd, VfsError> {
    let mut table = FD_TABLE.lock();
    if table.files.len() >= MAX_OPEN_FILES {
        return Err(VfsError::TooManyOpenFiles);
    }
    let fd = table.next_fd;
    table.next_fd += 1;
    table.files.insert(fd, Arc::new(file));
    Ok(fd)
}

pub fn get(fd: Fd) -> Option<Arc<OpenFile>> {
    FD_TABLE.lock().files.get(&fd).cloned()
}

pub fn remove(fd: Fd) -> Option<Arc<OpenFile>> {
    FD_TABLE.lock().files.remove(&fd)
}
