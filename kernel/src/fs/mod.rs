//! Filesystem abstraction layer
//!
//! Provides support for a read-only ext2 filesystem mounted through the VFS.

pub mod ext2;
pub mod vfs;
