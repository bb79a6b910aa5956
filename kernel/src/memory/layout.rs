//! Canonical kernel memory layout constants.
//!
//! Defines the standard memory layout for kernel space, including per-CPU
//! stacks and other kernel regions, so every page table built during boot
//! agrees on where things live.

use x86_64::VirtAddr;

pub const KERNEL_LOW_BASE: u64 = 0x100000; // Current low-half kernel base (1MB)
pub const KERNEL_BASE: u64 = 0xffffffff80000000; // Upper half kernel base

#[allow(dead_code)]
pub const HHDM_BASE: u64 = 0xffff800000000000; // Higher-half direct map
#[allow(dead_code)]
pub const PERCPU_BASE: u64 = 0xfffffe0000000000; // Per-CPU area
#[allow(dead_code)]
pub const FIXMAP_BASE: u64 = 0xfffffd0000000000; // Fixed mappings (GDT/IDT/TSS)
#[allow(dead_code)]
pub const MMIO_BASE: u64 = 0xffffe00000000000; // MMIO regions

/// Kernel stack guard-page bookkeeping keys off this range even though no
/// userspace exists; it's the boundary `memory::stack::check_user_stack_bounds`
/// validates against.
pub const USER_STACK_REGION_START: u64 = 0x7FFF_FF00_0000;
pub const USER_STACK_REGION_END: u64 = 0x8000_0000_0000;

#[allow(dead_code)]
pub const USER_STACK_SIZE: usize = 64 * 1024;

#[allow(dead_code)]
pub const BOOTSTRAP_PML4_INDEX: u64 = 3; // Bootstrap stack at 0x180000000000

#[allow(dead_code)]
pub const KERNEL_HIGHER_HALF_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Base address for per-CPU kernel stacks region (PML4[402]).
pub const PERCPU_STACK_REGION_BASE: u64 = 0xffffc90000000000;

/// Size of each per-CPU kernel stack (32 KiB).
pub const PERCPU_STACK_SIZE: usize = 32 * 1024;

/// Size of guard page between stacks (4 KiB).
pub const PERCPU_STACK_GUARD_SIZE: usize = 4 * 1024;

/// Stride between per-CPU stack regions (2 MiB aligned).
pub const PERCPU_STACK_STRIDE: usize = 2 * 1024 * 1024;

/// Maximum number of CPUs the stack region is sized for. Alteo only ever
/// brings up CPU 0, but the virtual address space is reserved up front.
pub const MAX_CPUS: usize = 256;

pub const PERCPU_STACK_REGION_SIZE: usize = MAX_CPUS * PERCPU_STACK_STRIDE;

/// Base address for kernel TLS allocation, within the same PDPT entry as
/// the per-CPU stacks (0x00000000..0x20000000: stacks, 0x20000000..0x30000000:
/// dynamic kernel stacks, 0x30000000..0x40000000: TLS blocks).
#[allow(dead_code)]
pub const KERNEL_TLS_REGION_BASE: u64 = PERCPU_STACK_REGION_BASE + 0x3000_0000;

/// Base address of the stack region for the given CPU. The stack grows
/// downward from `base + PERCPU_STACK_SIZE`.
pub fn percpu_stack_base(cpu_id: usize) -> VirtAddr {
    assert!(cpu_id < MAX_CPUS, "CPU ID {} exceeds MAX_CPUS", cpu_id);
    let offset = cpu_id * PERCPU_STACK_STRIDE;
    VirtAddr::new(PERCPU_STACK_REGION_BASE + offset as u64)
}

/// Top of the stack for a specific CPU (where RSP starts).
pub fn percpu_stack_top(cpu_id: usize) -> VirtAddr {
    let base = percpu_stack_base(cpu_id);
    base + PERCPU_STACK_SIZE as u64
}

/// Guard page address for a specific CPU's stack, placed just below it.
#[allow(dead_code)]
pub fn percpu_stack_guard(cpu_id: usize) -> VirtAddr {
    let base = percpu_stack_base(cpu_id);
    base - PERCPU_STACK_GUARD_SIZE as u64
}

pub fn log_layout() {
    log::info!("LAYOUT: Kernel memory layout initialized:");
    log::info!(
        "LAYOUT: percpu stack base={:#x}, size={} KiB, stride={} MiB, guard={} KiB",
        PERCPU_STACK_REGION_BASE,
        PERCPU_STACK_SIZE / 1024,
        PERCPU_STACK_STRIDE / (1024 * 1024),
        PERCPU_STACK_GUARD_SIZE / 1024
    );
    log::info!("LAYOUT: Max CPUs supported: {}", MAX_CPUS);
    log::info!(
        "LAYOUT: Total stack region size: {} MiB",
        PERCPU_STACK_REGION_SIZE / (1024 * 1024)
    );

    for cpu_id in 0..4.min(MAX_CPUS) {
        log::info!(
            "LAYOUT: CPU {} stack: base={:#x}, top={:#x}",
            cpu_id,
            percpu_stack_base(cpu_id).as_u64(),
            percpu_stack_top(cpu_id).as_u64()
        );
    }
}

/// Check if an address is in the bootstrap stack region.
#[allow(dead_code)]
#[inline]
pub fn is_bootstrap_address(addr: VirtAddr) -> bool {
    let pml4_index = (addr.as_u64() >> 39) & 0x1FF;
    pml4_index == BOOTSTRAP_PML4_INDEX
}

/// Convert a low-half kernel address to its high-half alias.
#[allow(dead_code)]
#[inline]
pub fn high_alias_from_low(low: u64) -> u64 {
    low - KERNEL_LOW_BASE + KERNEL_BASE
}

// TODO: provide real symbols via linker script instead of these approximate ranges.
#[allow(dead_code)]
pub fn get_kernel_image_range() -> (usize, usize) {
    (0x100000, 0x300000)
}

#[allow(dead_code)]
pub fn get_kernel_text_range() -> (usize, usize) {
    (0x100000, 0x200000)
}

#[allow(dead_code)]
pub fn get_kernel_rodata_range() -> (usize, usize) {
    (0x200000, 0x250000)
}

#[allow(dead_code)]
pub fn get_kernel_data_range() -> (usize, usize) {
    (0x250000, 0x280000)
}

#[allow(dead_code)]
pub fn get_kernel_bss_range() -> (usize, usize) {
    (0x280000, 0x300000)
}

pub fn log_kernel_layout() {
    let (image_start, image_end) = get_kernel_image_range();
    let (text_start, text_end) = get_kernel_text_range();
    let (rodata_start, rodata_end) = get_kernel_rodata_range();
    let (data_start, data_end) = get_kernel_data_range();
    let (bss_start, bss_end) = get_kernel_bss_range();

    log::info!(
        "KLAYOUT: image={:#x}..{:#x} text={:#x}..{:#x} rodata={:#x}..{:#x} data={:#x}..{:#x} bss={:#x}..{:#x}",
        image_start, image_end,
        text_start, text_end,
        rodata_start, rodata_end,
        data_start, data_end,
        bss_start, bss_end
    );

    log_control_structures();
}

fn log_control_structures() {
    use crate::gdt;
    use crate::interrupts;
    use crate::per_cpu;

    let gdt_info = gdt::get_gdt_info();
    log::info!("KLAYOUT: GDT base={:#x} limit={}", gdt_info.0, gdt_info.1);

    let idt_info = interrupts::get_idt_info();
    log::info!("KLAYOUT: IDT base={:#x} limit={}", idt_info.0, idt_info.1);

    let tss_info = gdt::get_tss_info();
    log::info!("KLAYOUT: TSS base={:#x} RSP0={:#x}", tss_info.0, tss_info.1);

    let percpu_info = per_cpu::get_percpu_info();
    log::info!(
        "KLAYOUT: Per-CPU base={:#x} size={:#x}",
        percpu_info.0, percpu_info.1
    );
}
