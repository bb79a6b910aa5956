//! Local APIC and I/O APIC configuration.
//!
//! Takes over interrupt routing from the legacy 8259 once MADT discovery in
//! [`crate::acpi`] has found a usable I/O APIC: the Local APIC is enabled via
//! its MSR and spurious-vector register, every I/O APIC redirection entry is
//! masked, then the ISA IRQs this kernel cares about (timer, keyboard,
//! serial) are routed to the same vectors the IDT already wires up. The
//! LAPIC timer is calibrated against PIT channel 2 and programmed to
//! replace the PIT as the periodic tick source.

use core::sync::atomic::{AtomicBool, Ordering};
use x86_64::instructions::port::Port;
use x86_64::VirtAddr;

use crate::acpi::{self, Polarity, TriggerMode};

const IA32_APIC_BASE_MSR: u32 = 0x1B;
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;

const LAPIC_ID: usize = 0x020;
const LAPIC_EOI: usize = 0x0B0;
const LAPIC_SPURIOUS: usize = 0x0F0;
const LAPIC_LVT_TIMER: usize = 0x320;
const LAPIC_TIMER_INITIAL_COUNT: usize = 0x380;
const LAPIC_TIMER_CURRENT_COUNT: usize = 0x390;
const LAPIC_TIMER_DIVIDE_CONFIG: usize = 0x3E0;

const LVT_TIMER_PERIODIC: u32 = 1 << 17;
const LVT_MASKED: u32 = 1 << 16;

const IOAPIC_IOREGSEL: usize = 0x00;
const IOAPIC_IOWIN: usize = 0x10;
const IOAPIC_REG_VER: u32 = 0x01;
const IOAPIC_REDTBL_BASE: u32 = 0x10;

const REDTBL_MASKED: u64 = 1 << 16;
const REDTBL_LEVEL_TRIGGERED: u64 = 1 << 15;
const REDTBL_ACTIVE_LOW: u64 = 1 << 13;

/// ISA IRQ -> vector routing this kernel wants from the I/O APIC, matching
/// the handlers already wired into the IDT in `interrupts.rs`.
const ISA_ROUTES: &[(u8, u8)] = &[
    (0, 32), // PIT / LAPIC timer -> Timer vector
    (1, 33), // PS/2 keyboard -> Keyboard vector
    (4, 36), // COM1 -> Serial vector
];

static USING_APIC: AtomicBool = AtomicBool::new(false);
static LAPIC_VIRT_BASE: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);
static TIMER_INITIAL_COUNT: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

pub fn using_apic() -> bool {
    USING_APIC.load(Ordering::Relaxed)
}

fn lapic_base() -> VirtAddr {
    VirtAddr::new(LAPIC_VIRT_BASE.load(Ordering::Relaxed))
}

unsafe fn lapic_read(reg: usize) -> u32 {
    let ptr = (lapic_base().as_u64() as usize + reg) as *const u32;
    unsafe { core::ptr::read_volatile(ptr) }
}

unsafe fn lapic_write(reg: usize, value: u32) {
    let ptr = (lapic_base().as_u64() as usize + reg) as *mut u32;
    unsafe { core::ptr::write_volatile(ptr, value) }
}

fn ioapic_virt(ioapic_phys: u32) -> VirtAddr {
    let offset = crate::memory::physical_memory_offset();
    crate::memory::phys_to_virt(x86_64::PhysAddr::new(ioapic_phys as u64), offset)
}

unsafe fn ioapic_read(base: VirtAddr, reg: u32) -> u32 {
    let sel = (base.as_u64() as usize + IOAPIC_IOREGSEL) as *mut u32;
    let win = (base.as_u64() as usize + IOAPIC_IOWIN) as *mut u32;
    unsafe {
        core::ptr::write_volatile(sel, reg);
        core::ptr::read_volatile(win)
    }
}

unsafe fn ioapic_write(base: VirtAddr, reg: u32, value: u32) {
    let sel = (base.as_u64() as usize + IOAPIC_IOREGSEL) as *mut u32;
    let win = (base.as_u64() as usize + IOAPIC_IOWIN) as *mut u32;
    unsafe {
        core::ptr::write_volatile(sel, reg);
        core::ptr::write_volatile(win, value);
    }
}

unsafe fn ioapic_write_redirection(base: VirtAddr, index: u32, value: u64) {
    let reg = IOAPIC_REDTBL_BASE + index * 2;
    unsafe {
        ioapic_write(base, reg, value as u32);
        ioapic_write(base, reg + 1, (value >> 32) as u32);
    }
}

fn enable_local_apic(lapic_phys: u64) {
    let offset = crate::memory::physical_memory_offset();
    let virt = crate::memory::phys_to_virt(x86_64::PhysAddr::new(lapic_phys), offset);
    LAPIC_VIRT_BASE.store(virt.as_u64(), Ordering::Relaxed);

    unsafe {
        let msr = x86_64::registers::model_specific::Msr::new(IA32_APIC_BASE_MSR);
        let base = msr.read();
        x86_64::registers::model_specific::Msr::new(IA32_APIC_BASE_MSR)
            .write(base | APIC_GLOBAL_ENABLE);

        // Spurious interrupt vector 0xFF, APIC software-enabled (bit 8).
        lapic_write(LAPIC_SPURIOUS, 0x1FF);

        log::info!("apic: Local APIC {:#x} enabled, id {}", lapic_phys, lapic_read(LAPIC_ID) >> 24);
    }
}

/// Mask every entry of every I/O APIC discovered via MADT.
fn mask_all_redirections(info: &acpi::PlatformInfo) {
    for ioapic in &info.io_apics {
        let base = ioapic_virt(ioapic.address);
        let max_entries = unsafe { (ioapic_read(base, IOAPIC_REG_VER) >> 16) & 0xFF } + 1;
        for i in 0..max_entries {
            unsafe { ioapic_write_redirection(base, i, REDTBL_MASKED) };
        }
    }
}

/// Program the redirection entries this kernel actually uses, resolving
/// polarity/trigger mode from any MADT interrupt source override.
fn route_isa_irqs(info: &acpi::PlatformInfo) {
    let lapic_id = unsafe { lapic_read(LAPIC_ID) >> 24 };

    for &(isa_irq, vector) in ISA_ROUTES {
        let (gsi, polarity, trigger) = info.isa_irq_to_gsi(isa_irq);
        let Some(ioapic) = info.io_apic_for_gsi(gsi) else {
            log::warn!("apic: no I/O APIC covers GSI {} (ISA IRQ {})", gsi, isa_irq);
            continue;
        };

        let mut entry: u64 = vector as u64;
        if polarity == Polarity::ActiveLow {
            entry |= REDTBL_ACTIVE_LOW;
        }
        if trigger == TriggerMode::Level {
            entry |= REDTBL_LEVEL_TRIGGERED;
        }
        entry |= (lapic_id as u64) << 56;

        let base = ioapic_virt(ioapic.address);
        let index = gsi - ioapic.gsi_base;
        unsafe { ioapic_write_redirection(base, index, entry) };

        log::info!(
            "apic: routed ISA IRQ {} -> GSI {} -> vector {} on I/O APIC {}",
            isa_irq, gsi, vector, ioapic.id,
        );
    }
}

/// Mask every legacy PIC line; the I/O APIC now owns these IRQs.
fn mask_legacy_pic() {
    unsafe {
        let mut data1: Port<u8> = Port::new(0x21);
        let mut data2: Port<u8> = Port::new(0xA1);
        data1.write(0xFF);
        data2.write(0xFF);
    }
}

/// Calibrate the LAPIC timer against PIT channel 2, mirroring the gating
/// technique used for TSC calibration, then program it periodic for 1 kHz.
fn calibrate_and_start_timer() {
    const PIT_CHANNEL2_PORT: u16 = 0x42;
    const PIT_COMMAND_PORT: u16 = 0x43;
    const PIT_GATE_PORT: u16 = 0x61;
    const CALIBRATION_TICKS: u16 = 11932; // ~10ms at 1.193182 MHz
    const TICK_HZ: u64 = 1000;

    unsafe {
        lapic_write(LAPIC_TIMER_DIVIDE_CONFIG, 0x3); // divide by 16
        lapic_write(LAPIC_LVT_TIMER, LVT_MASKED);
        lapic_write(LAPIC_TIMER_INITIAL_COUNT, 0xFFFF_FFFF);

        let mut ch2: Port<u8> = Port::new(PIT_CHANNEL2_PORT);
        let mut cmd: Port<u8> = Port::new(PIT_COMMAND_PORT);
        let mut gate: Port<u8> = Port::new(PIT_GATE_PORT);

        let orig_gate = gate.read();
        gate.write((orig_gate & 0xFC) | 0x01);
        cmd.write(0xB0);
        ch2.write((CALIBRATION_TICKS & 0xFF) as u8);
        ch2.write((CALIBRATION_TICKS >> 8) as u8);

        let g = gate.read();
        gate.write(g & 0xFE);
        gate.write(g | 0x01);

        loop {
            if (gate.read() & 0x20) != 0 {
                break;
            }
        }

        let elapsed = 0xFFFF_FFFFu32 - lapic_read(LAPIC_TIMER_CURRENT_COUNT);
        gate.write(orig_gate);

        // ticks-per-10ms -> ticks-per-tick-at-TICK_HZ
        let ticks_per_second = elapsed as u64 * 100;
        let initial_count = (ticks_per_second / TICK_HZ) as u32;
        TIMER_INITIAL_COUNT.store(initial_count, Ordering::Relaxed);

        lapic_write(LAPIC_TIMER_INITIAL_COUNT, 0);
        lapic_write(LAPIC_LVT_TIMER, 32 | LVT_TIMER_PERIODIC);
        lapic_write(LAPIC_TIMER_DIVIDE_CONFIG, 0x3);
        lapic_write(LAPIC_TIMER_INITIAL_COUNT, initial_count);

        log::info!(
            "apic: LAPIC timer calibrated, {} ticks/{}Hz, programmed periodic",
            initial_count, TICK_HZ,
        );
    }
}

/// Send End-Of-Interrupt to the Local APIC.
pub fn send_eoi() {
    unsafe { lapic_write(LAPIC_EOI, 0) };
}

/// Discover MADT data and switch interrupt routing from the 8259 to the
/// Local/I-O APIC pair. Returns `Err` and leaves the legacy PIC path
/// untouched if no usable APIC topology was found.
pub fn init() -> Result<(), &'static str> {
    let info = acpi::init()?;

    enable_local_apic(info.local_apic_address);
    mask_all_redirections(info);
    route_isa_irqs(info);
    mask_legacy_pic();
    calibrate_and_start_timer();

    USING_APIC.store(true, Ordering::Relaxed);
    Ok(())
}
