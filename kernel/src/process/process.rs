//! Process record and lifecycle state.
//!
//! A process is the kernel's unit of scheduling: one kernel stack, one saved
//! CPU context, one priority class. There is no userspace address space
//! support here (`page_table_root` exists only so the record matches what a
//! full process table would carry) — every process in this tree runs in the
//! kernel's address space.

use alloc::string::String;
use alloc::vec::Vec;

use crate::task::context::CpuContext;
use crate::memory::kernel_stack::KernelStack;

/// Process identifier. Pid 0 is always the idle/kernel process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const IDLE: ProcessId = ProcessId(0);

    pub fn new(id: u64) -> Self {
        ProcessId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot exists but has never held a live process.
    Unused,
    /// Runnable, waiting for the scheduler to pick it.
    Ready,
    /// Currently executing on the (single) CPU.
    Running,
    /// Waiting on an event (socket data, etc.) with no wake deadline.
    Blocked,
    /// Waiting for an absolute tick deadline (`sleep_deadline`).
    Sleeping,
    /// Exited; kernel stack freed, record kept for reaping.
    Zombie,
}

/// Scheduling priority class. Ordered highest to lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Realtime,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Default time-slice length in scheduler ticks for this class.
    pub fn default_slice(self) -> u32 {
        match self {
            Priority::Realtime => 2,
            Priority::High => 5,
            Priority::Normal => 10,
            Priority::Low => 20,
        }
    }
}

/// A process record: one kernel-scheduled execution context.
pub struct Process {
    pub pid: ProcessId,
    pub ppid: Option<ProcessId>,
    pub state: ProcessState,
    pub priority: Priority,
    pub default_slice: u32,
    pub remaining_slice: u32,

    /// Kernel stack owned exclusively by this process; freed on termination.
    pub kernel_stack: Option<KernelStack>,

    /// Saved CPU context, restored on the next switch into this process.
    pub context: CpuContext,

    pub name: String,
    pub is_user: bool,

    /// Root of a private page table, or `None` for kernel processes sharing
    /// the kernel address space.
    pub page_table_root: Option<u64>,

    pub entry: u64,
    pub exit_code: Option<i32>,

    /// Absolute scheduler-tick deadline while `state == Sleeping`.
    pub sleep_deadline: Option<u64>,

    pub children: Vec<ProcessId>,
}

impl Process {
    /// Build the idle process (pid 0). It never terminates and always has
    /// lowest priority so any other ready process preempts it.
    pub fn idle() -> Self {
        Process {
            pid: ProcessId::IDLE,
            ppid: None,
            state: ProcessState::Ready,
            priority: Priority::Low,
            default_slice: Priority::Low.default_slice(),
            remaining_slice: Priority::Low.default_slice(),
            kernel_stack: None,
            context: CpuContext::zeroed(),
            name: String::from("idle"),
            is_user: false,
            page_table_root: None,
            entry: 0,
            exit_code: None,
            sleep_deadline: None,
            children: Vec::new(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ProcessState::Ready)
    }

    pub fn terminate(&mut self, exit_code: i32) {
        self.state = ProcessState::Zombie;
        self.exit_code = Some(exit_code);
        self.kernel_stack = None;
    }
}
