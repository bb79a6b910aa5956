//! Per-CPU bookkeeping accessed via the GS segment.
//!
//! Alteo is single-CPU only, but the GS-relative layout is kept because it's
//! how the exception/IRQ entry points read preempt and IRQ-nesting state
//! without taking a lock.

use core::ptr;
use core::sync::atomic::{compiler_fence, AtomicBool, Ordering};
use x86_64::registers::model_specific::{GsBase, KernelGsBase};
use x86_64::VirtAddr;

#[repr(C, align(64))]
pub struct PerCpuData {
    pub cpu_id: u64,
    /// Bits 0-7: PREEMPT nesting. Bits 16-25: HARDIRQ nesting.
    pub preempt_count: u32,
    _pad: [u8; 4],
}

const PREEMPT_OFFSET: u32 = 1;
const PREEMPT_MASK: u32 = 0x0000_00FF;
const HARDIRQ_SHIFT: u32 = 16;
const HARDIRQ_OFFSET: u32 = 1 << HARDIRQ_SHIFT;
const HARDIRQ_MASK: u32 = 0x03FF_0000;

const PREEMPT_COUNT_OFFSET: usize = 8;

impl PerCpuData {
    pub const fn new(cpu_id: usize) -> Self {
        Self {
            cpu_id: cpu_id as u64,
            preempt_count: 0,
            _pad: [0; 4],
        }
    }
}

static mut CPU0_DATA: PerCpuData = PerCpuData::new(0);
static PER_CPU_INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn is_initialized() -> bool {
    PER_CPU_INITIALIZED.load(Ordering::Acquire)
}

pub fn init() {
    let cpu_data_ptr = &raw mut CPU0_DATA as *mut PerCpuData;
    let cpu_data_addr = cpu_data_ptr as u64;

    GsBase::write(VirtAddr::new(cpu_data_addr));
    KernelGsBase::write(VirtAddr::new(cpu_data_addr));

    PER_CPU_INITIALIZED.store(true, Ordering::Release);
    log::info!("Per-CPU data initialized at {:#x}", cpu_data_addr);
}

/// Is any interrupt nesting level (hardware IRQ) currently active?
pub fn in_interrupt() -> bool {
    (preempt_count() & HARDIRQ_MASK) != 0
}

/// Enter hardware IRQ context.
pub fn irq_enter() {
    if !PER_CPU_INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    unsafe {
        core::arch::asm!(
            "add dword ptr gs:[{offset}], {inc:e}",
            inc = in(reg) HARDIRQ_OFFSET,
            offset = const PREEMPT_COUNT_OFFSET,
            options(nostack, preserves_flags)
        );
    }
}

/// Exit hardware IRQ context.
pub fn irq_exit() {
    if !PER_CPU_INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    unsafe {
        core::arch::asm!(
            "sub dword ptr gs:[{offset}], {dec:e}",
            dec = in(reg) HARDIRQ_OFFSET,
            offset = const PREEMPT_COUNT_OFFSET,
            options(nostack, preserves_flags)
        );
    }
}

/// Disable preemption (exception entry). Nests.
pub fn preempt_disable() {
    if !PER_CPU_INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    unsafe {
        compiler_fence(Ordering::Acquire);
        core::arch::asm!(
            "add dword ptr gs:[{offset}], {inc:e}",
            inc = in(reg) PREEMPT_OFFSET,
            offset = const PREEMPT_COUNT_OFFSET,
            options(nostack, preserves_flags)
        );
        compiler_fence(Ordering::Release);
    }
}

/// Re-enable preemption (exception exit). Nests with `preempt_disable`.
pub fn preempt_enable() {
    if !PER_CPU_INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    unsafe {
        compiler_fence(Ordering::Acquire);
        core::arch::asm!(
            "sub dword ptr gs:[{offset}], {dec:e}",
            dec = in(reg) PREEMPT_OFFSET,
            offset = const PREEMPT_COUNT_OFFSET,
            options(nostack, preserves_flags)
        );
        compiler_fence(Ordering::Release);
    }
}

/// Current preempt/IRQ nesting count (raw bitfield, mostly for logging).
pub fn preempt_count() -> u32 {
    if !PER_CPU_INITIALIZED.load(Ordering::Acquire) {
        return 0;
    }
    unsafe {
        let count: u32;
        core::arch::asm!(
            "mov {count:e}, dword ptr gs:[{offset}]",
            count = out(reg) count,
            offset = const PREEMPT_COUNT_OFFSET,
            options(nostack, readonly)
        );
        count
    }
}

/// Base address and size of the per-CPU block, for boot-log diagnostics.
pub fn get_percpu_info() -> (u64, usize) {
    let cpu_data_ptr = ptr::addr_of_mut!(CPU0_DATA) as u64;
    (cpu_data_ptr, core::mem::size_of::<PerCpuData>())
}
