//! Priority-preemptive scheduler with round-robin within a priority level.
//!
//! On every timer tick the running process's `remaining_slice` is
//! decremented; at zero the scheduler scans all ready processes, picks the
//! highest priority present, and rotates a per-priority cursor among equal
//! candidates for fairness. Sleepers whose deadline has passed move back to
//! `Ready` at their priority's default slice before the scan runs.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

use crate::process::{self, Priority, ProcessId, ProcessState};
use crate::task::context::{perform_context_switch, perform_initial_switch, CpuContext};

static NEED_RESCHED: AtomicBool = AtomicBool::new(false);
static CURRENT_TICK: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct Stats {
    total_switches: u64,
    idle_ticks: u64,
    ticks_realtime: u64,
    ticks_high: u64,
    ticks_normal: u64,
    ticks_low: u64,
}

struct Scheduler {
    stats: Stats,
    /// Rotating fairness cursor, one per priority class, holding the pid
    /// last scheduled at that priority so the scan prefers the next one.
    cursor: [Option<ProcessId>; 4],
    started: bool,
}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

pub fn init() {
    *SCHEDULER.lock() = Some(Scheduler {
        stats: Stats::default(),
        cursor: [None; 4],
        started: false,
    });
    log::info!("Scheduler initialized (priority + round-robin)");
}

fn priority_index(p: Priority) -> usize {
    match p {
        Priority::Realtime => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// Called from the timer interrupt handler once per tick. Returns whether a
/// context switch is needed; the handler performs it outside the interrupt
/// frame via [`tick_and_switch`] since switching *inside* a handler is a
/// declared non-goal.
pub fn on_tick() {
    CURRENT_TICK.fetch_add(1, Ordering::Relaxed);

    process::with_manager(|mgr| {
        let tick = CURRENT_TICK.load(Ordering::Relaxed);
        for proc in mgr.schedulable() {
            if proc.state == ProcessState::Sleeping {
                if let Some(deadline) = proc.sleep_deadline {
                    if tick >= deadline {
                        proc.state = ProcessState::Ready;
                        proc.remaining_slice = proc.default_slice;
                        proc.sleep_deadline = None;
                    }
                }
            }
        }

        let current = mgr.current_pid();
        if let Some(proc) = mgr.get_mut(current) {
            if proc.state == ProcessState::Running {
                if proc.remaining_slice > 0 {
                    proc.remaining_slice -= 1;
                }
                if proc.remaining_slice == 0 {
                    NEED_RESCHED.store(true, Ordering::Release);
                }
            }
        }
    });
}

pub fn need_resched() -> bool {
    NEED_RESCHED.load(Ordering::Acquire)
}

/// Pick the next process to run: highest priority among ready processes,
/// round-robin among ties via the per-priority cursor.
fn pick_next() -> ProcessId {
    process::with_manager(|mgr| {
        let mut best: Option<(Priority, ProcessId)> = None;
        let mut candidates_at_best: alloc::vec::Vec<ProcessId> = alloc::vec::Vec::new();

        for proc in mgr.schedulable() {
            if proc.state != ProcessState::Ready && proc.pid != ProcessId::IDLE {
                continue;
            }
            match best {
                None => {
                    best = Some((proc.priority, proc.pid));
                    candidates_at_best.clear();
                    candidates_at_best.push(proc.pid);
                }
                Some((bp, _)) if proc.priority < bp => {
                    best = Some((proc.priority, proc.pid));
                    candidates_at_best.clear();
                    candidates_at_best.push(proc.pid);
                }
                Some((bp, _)) if proc.priority == bp => {
                    candidates_at_best.push(proc.pid);
                }
                _ => {}
            }
        }

        let Some((priority, _)) = best else {
            return ProcessId::IDLE;
        };
        if candidates_at_best.len() == 1 {
            return candidates_at_best[0];
        }

        let mut sched = SCHEDULER.lock();
        let s = sched.as_mut().expect("scheduler not initialized");
        let idx = priority_index(priority);
        let next = match s.cursor[idx] {
            Some(last) => {
                let pos = candidates_at_best.iter().position(|&p| p == last);
                match pos {
                    Some(i) => candidates_at_best[(i + 1) % candidates_at_best.len()],
                    None => candidates_at_best[0],
                }
            }
            None => candidates_at_best[0],
        };
        s.cursor[idx] = Some(next);
        next
    })
}

/// Run the scheduler's decision: switch into whichever process `pick_next`
/// selects, if it differs from the currently running one. Called after
/// `on_tick` sets `NEED_RESCHED`, and from any explicit yield point.
pub fn yield_now() {
    NEED_RESCHED.store(false, Ordering::Release);
    let next = pick_next();

    let (old_ctx_ptr, new_ctx) = process::with_manager(|mgr| {
        let current = mgr.current_pid();

        if current == next {
            if let Some(proc) = mgr.get_mut(current) {
                if proc.state == ProcessState::Running {
                    return (None, core::ptr::null());
                }
            }
        }

        if let Some(proc) = mgr.get_mut(current) {
            if proc.state == ProcessState::Running {
                proc.state = ProcessState::Ready;
            }
        }

        {
            let next_proc = mgr.get_mut(next).expect("scheduled pid has no record");
            next_proc.state = ProcessState::Running;
            next_proc.remaining_slice = next_proc.remaining_slice.max(1);
        }

        mgr.set_current(next);

        let old_ctx_ptr: *mut CpuContext = if current != next {
            mgr.get_mut(current).map(|p| &mut p.context as *mut CpuContext).unwrap_or(core::ptr::null_mut())
        } else {
            core::ptr::null_mut()
        };
        let new_ctx_ptr: *const CpuContext = &mgr.get(next).unwrap().context as *const CpuContext;

        {
            let mut sched = SCHEDULER.lock();
            let s = sched.as_mut().unwrap();
            s.stats.total_switches += 1;
            match mgr.get(next).unwrap().priority {
                Priority::Realtime => s.stats.ticks_realtime += 1,
                Priority::High => s.stats.ticks_high += 1,
                Priority::Normal => s.stats.ticks_normal += 1,
                Priority::Low => s.stats.ticks_low += 1,
            }
            if next == ProcessId::IDLE {
                s.stats.idle_ticks += 1;
            }
        }

        (Some(old_ctx_ptr), new_ctx_ptr)
    });

    let Some(old_ctx_ptr) = old_ctx_ptr else {
        return;
    };
    if old_ctx_ptr.is_null() {
        // The very first switch out of boot context: nothing to save into.
        unsafe { perform_initial_switch(&*new_ctx) };
    } else {
        unsafe { perform_context_switch(&mut *old_ctx_ptr, &*new_ctx) };
    }
}

/// Put the current process to sleep until `deadline` (absolute tick count).
pub fn sleep_until(deadline: u64) {
    process::with_manager(|mgr| {
        let pid = mgr.current_pid();
        if let Some(proc) = mgr.get_mut(pid) {
            proc.state = ProcessState::Sleeping;
            proc.sleep_deadline = Some(deadline);
        }
    });
    yield_now();
}

pub fn current_tick() -> u64 {
    CURRENT_TICK.load(Ordering::Relaxed)
}

/// Start running: yields from boot context into the highest-priority ready
/// process (or pid 0's idle loop if none exists yet).
pub fn start() -> ! {
    {
        let mut sched = SCHEDULER.lock();
        sched.as_mut().unwrap().started = true;
    }
    yield_now();
    unreachable!("scheduler start must switch away from boot context");
}
