//! Process table: the single owner of every process record.
//!
//! Mirrors the rest of the kernel's single-writer-under-interrupt-disable
//! concurrency model: one global `Mutex<Option<ProcessManager>>`, entered
//! only from inside `without_interrupts`.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use super::process::{Priority, Process, ProcessId, ProcessState};
use crate::memory::kernel_stack::allocate_kernel_stack;
use crate::task::context::CpuContext;

pub struct ProcessManager {
    processes: BTreeMap<ProcessId, Process>,
    next_pid: u64,
    current: ProcessId,
}

impl ProcessManager {
    fn new() -> Self {
        let mut processes = BTreeMap::new();
        processes.insert(ProcessId::IDLE, Process::idle());
        ProcessManager {
            processes,
            next_pid: 1,
            current: ProcessId::IDLE,
        }
    }

    /// Allocate a process record and kernel stack, and pre-seed the initial
    /// CPU context so the first switch runs `entry` directly.
    ///
    /// Returns an error if the kernel stack slots are exhausted (§7 kind 1:
    /// resource exhaustion with no table slot).
    pub fn create(
        &mut self,
        name: String,
        entry: fn(),
        priority: Priority,
        parent: Option<ProcessId>,
    ) -> Result<ProcessId, &'static str> {
        let stack = allocate_kernel_stack()?;
        let stack_top = stack.top();

        let pid = ProcessId::new(self.next_pid);
        self.next_pid += 1;

        let slice = priority.default_slice();
        let process = Process {
            pid,
            ppid: parent,
            state: ProcessState::Ready,
            priority,
            default_slice: slice,
            remaining_slice: slice,
            kernel_stack: Some(stack),
            context: CpuContext::new_process(entry, stack_top),
            name,
            is_user: false,
            page_table_root: None,
            entry: entry as u64,
            exit_code: None,
            sleep_deadline: None,
            children: Vec::new(),
        };

        if let Some(parent_id) = parent {
            if let Some(parent_proc) = self.processes.get_mut(&parent_id) {
                parent_proc.children.push(pid);
            }
        }

        self.processes.insert(pid, process);
        Ok(pid)
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn current_pid(&self) -> ProcessId {
        self.current
    }

    pub fn set_current(&mut self, pid: ProcessId) {
        self.current = pid;
    }

    /// Every ready, running, or sleeping process, for the scheduler to scan.
    pub fn schedulable(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.values_mut().filter(|p| {
            matches!(p.state, ProcessState::Ready | ProcessState::Running | ProcessState::Sleeping)
        })
    }

    /// Move to zombie, free the kernel stack, reparent children to pid 0.
    pub fn terminate(&mut self, pid: ProcessId, exit_code: i32) {
        let children = if let Some(process) = self.processes.get_mut(&pid) {
            process.terminate(exit_code);
            core::mem::take(&mut process.children)
        } else {
            return;
        };
        for child in children {
            if let Some(child_proc) = self.processes.get_mut(&child) {
                child_proc.ppid = Some(ProcessId::IDLE);
            }
            if let Some(idle) = self.processes.get_mut(&ProcessId::IDLE) {
                idle.children.push(child);
            }
        }
    }

    /// Drop a zombie's record entirely once its exit status has been
    /// collected. Pid 0 is never reaped.
    pub fn reap(&mut self, pid: ProcessId) -> Option<i32> {
        if pid == ProcessId::IDLE {
            return None;
        }
        let is_zombie = matches!(
            self.processes.get(&pid).map(|p| p.state),
            Some(ProcessState::Zombie)
        );
        if !is_zombie {
            return None;
        }
        self.processes.remove(&pid).and_then(|p| p.exit_code)
    }
}

static PROCESS_MANAGER: Mutex<Option<ProcessManager>> = Mutex::new(None);

pub fn init() {
    without_interrupts(|| {
        *PROCESS_MANAGER.lock() = Some(ProcessManager::new());
    });
    log::info!("Process table initialized (pid 0 = idle)");
}

pub fn with_manager<R>(f: impl FnOnce(&mut ProcessManager) -> R) -> R {
    without_interrupts(|| {
        let mut guard = PROCESS_MANAGER.lock();
        let manager = guard.as_mut().expect("process manager not initialized");
        f(manager)
    })
}

/// Create a new kernel process and hand it to the scheduler as ready.
pub fn spawn(name: &str, entry: fn(), priority: Priority) -> Result<ProcessId, &'static str> {
    with_manager(|mgr| {
        let parent = mgr.current_pid();
        mgr.create(String::from(name), entry, priority, Some(parent))
    })
}

/// Called by the running process's own entry trampoline on a normal return,
/// or by an explicit `exit` call.
pub fn exit_current(exit_code: i32) -> ! {
    with_manager(|mgr| {
        let pid = mgr.current_pid();
        mgr.terminate(pid, exit_code);
    });
    crate::task::scheduler::yield_now();
    unreachable!("terminated process was scheduled again");
}
