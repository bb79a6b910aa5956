//! Process table: process records, lifecycle, and the global process manager.

pub mod manager;
pub mod process;

pub use manager::{exit_current, init, spawn, with_manager, ProcessManager};
pub use process::{Priority, Process, ProcessId, ProcessState};
