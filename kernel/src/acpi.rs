//! ACPI platform discovery: RSDP/RSDT/XSDT lookup and MADT/FADT parsing.
//!
//! The RSDP is found with the legacy BIOS scan (EBDA, then 0xE0000-0xFFFFF),
//! which the `acpi` crate performs for us with the proper checksum
//! validation. From there we read the MADT for APIC topology and the FADT
//! for the registers used to reset or power off the machine.

use acpi::fadt::Fadt;
use acpi::madt::{Madt, MadtEntry};
use acpi::{AcpiError, AcpiHandler, AcpiTables, PhysicalMapping};
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use core::ptr::NonNull;
use x86_64::PhysAddr;

static PLATFORM_INFO: OnceCell<PlatformInfo> = OnceCell::uninit();

/// Physical-memory-offset-mapped handler: the bootloader maps all of
/// physical memory at a fixed virtual offset, so ACPI tables never need
/// their own mapping.
#[derive(Clone)]
struct OffsetAcpiHandler;

unsafe impl Send for OffsetAcpiHandler {}

impl AcpiHandler for OffsetAcpiHandler {
    unsafe fn map_physical_region<T>(
        &self,
        physical_address: usize,
        size: usize,
    ) -> PhysicalMapping<Self, T> {
        let offset = crate::memory::physical_memory_offset();
        let virt = crate::memory::phys_to_virt(PhysAddr::new(physical_address as u64), offset);
        let ptr = NonNull::new(virt.as_mut_ptr::<T>()).expect("null ACPI physical address");
        unsafe { PhysicalMapping::new(physical_address, ptr, size, size, self.clone()) }
    }

    fn unmap_physical_region<T>(_region: &PhysicalMapping<Self, T>) {
        // Physical memory stays mapped for the kernel's entire lifetime.
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalApicEntry {
    pub processor_id: u8,
    pub apic_id: u8,
    pub enabled: bool,
    pub online_capable: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IoApicEntry {
    pub id: u8,
    pub address: u32,
    pub gsi_base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    ConformsToBus,
    ActiveHigh,
    ActiveLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    ConformsToBus,
    Edge,
    Level,
}

#[derive(Debug, Clone, Copy)]
pub struct InterruptSourceOverride {
    pub bus: u8,
    pub source_irq: u8,
    pub gsi: u32,
    pub polarity: Polarity,
    pub trigger_mode: TriggerMode,
}

#[derive(Debug, Clone, Copy)]
pub struct ResetRegister {
    pub address_space: u8,
    pub address: u64,
    pub value: u8,
}

pub struct PlatformInfo {
    pub local_apic_address: u64,
    pub local_apics: Vec<LocalApicEntry>,
    pub io_apics: Vec<IoApicEntry>,
    pub interrupt_overrides: Vec<InterruptSourceOverride>,
    pub pcat_compat: bool,
    pub reset_reg: Option<ResetRegister>,
}

impl PlatformInfo {
    /// Resolve an ISA IRQ (as wired on the legacy 8259) to the GSI that an
    /// I/O APIC redirection entry must target, applying any override.
    pub fn isa_irq_to_gsi(&self, isa_irq: u8) -> (u32, Polarity, TriggerMode) {
        for over in &self.interrupt_overrides {
            if over.bus == 0 && over.source_irq == isa_irq {
                return (over.gsi, over.polarity, over.trigger_mode);
            }
        }
        (isa_irq as u32, Polarity::ConformsToBus, TriggerMode::ConformsToBus)
    }

    /// Find the I/O APIC whose GSI range covers `gsi`.
    pub fn io_apic_for_gsi(&self, gsi: u32) -> Option<&IoApicEntry> {
        self.io_apics.iter().min_by_key(|a| gsi.checked_sub(a.gsi_base).unwrap_or(u32::MAX))
            .filter(|a| gsi >= a.gsi_base)
    }
}

fn decode_polarity(flags: u16) -> Polarity {
    match flags & 0b11 {
        0b01 => Polarity::ActiveHigh,
        0b11 => Polarity::ActiveLow,
        _ => Polarity::ConformsToBus,
    }
}

fn decode_trigger(flags: u16) -> TriggerMode {
    match (flags >> 2) & 0b11 {
        0b01 => TriggerMode::Edge,
        0b11 => TriggerMode::Level,
        _ => TriggerMode::ConformsToBus,
    }
}

fn parse_madt(tables: &AcpiTables<OffsetAcpiHandler>, info: &mut PlatformInfo) -> Result<(), &'static str> {
    let madt_mapping = tables.find_table::<Madt>().map_err(|_| "MADT table not found")?;
    let madt = madt_mapping.get();

    info.local_apic_address = madt.local_apic_address as u64;
    info.pcat_compat = (madt.flags & 1) != 0;

    for entry in madt.entries() {
        match entry {
            MadtEntry::LocalApic(lapic) => {
                let enabled = lapic.flags & 0x1 != 0;
                let online_capable = lapic.flags & 0x2 != 0;
                info.local_apics.push(LocalApicEntry {
                    processor_id: lapic.processor_id,
                    apic_id: lapic.apic_id,
                    enabled,
                    online_capable,
                });
            }
            MadtEntry::IoApic(ioapic) => {
                info.io_apics.push(IoApicEntry {
                    id: ioapic.io_apic_id,
                    address: ioapic.io_apic_address,
                    gsi_base: ioapic.global_system_interrupt_base,
                });
            }
            MadtEntry::InterruptSourceOverride(iso) => {
                info.interrupt_overrides.push(InterruptSourceOverride {
                    bus: iso.bus,
                    source_irq: iso.irq,
                    gsi: iso.global_system_interrupt,
                    polarity: decode_polarity(iso.flags),
                    trigger_mode: decode_trigger(iso.flags),
                });
            }
            MadtEntry::LocalApicAddressOverride(over) => {
                info.local_apic_address = over.local_apic_address;
            }
            _ => {}
        }
    }

    log::info!(
        "acpi: MADT - LAPIC base {:#x}, {} LAPIC(s), {} I/O APIC(s), {} override(s), 8259 present: {}",
        info.local_apic_address,
        info.local_apics.len(),
        info.io_apics.len(),
        info.interrupt_overrides.len(),
        info.pcat_compat,
    );

    if info.io_apics.is_empty() {
        return Err("no I/O APIC described by MADT");
    }

    Ok(())
}

fn parse_fadt(tables: &AcpiTables<OffsetAcpiHandler>, info: &mut PlatformInfo) {
    let fadt_mapping = match tables.find_table::<Fadt>() {
        Ok(f) => f,
        Err(_) => {
            log::warn!("acpi: FADT table not found, shutdown/reboot via ACPI unavailable");
            return;
        }
    };
    let fadt = fadt_mapping.get();

    if let Ok(reset_reg) = fadt.reset_register() {
        info.reset_reg = Some(ResetRegister {
            address_space: reset_reg.address_space_id as u8,
            address: reset_reg.address,
            value: fadt.reset_value,
        });
        log::info!(
            "acpi: FADT reset register at {:#x} (space {}), value {:#x}",
            reset_reg.address,
            reset_reg.address_space_id as u8,
            fadt.reset_value,
        );
    }
}

/// Locate the RSDP via the legacy BIOS scan, then parse MADT and FADT.
///
/// Returns `Err` if no RSDP/MADT could be found, or the MADT describes no
/// usable I/O APIC - in either case the caller should keep running on the
/// legacy 8259 PIC.
pub fn init() -> Result<&'static PlatformInfo, &'static str> {
    if let Some(info) = PLATFORM_INFO.get() {
        return Ok(info);
    }

    let tables = unsafe { AcpiTables::search_for_rsdp_bios(OffsetAcpiHandler) }
        .map_err(acpi_error_str)?;

    let mut info = PlatformInfo {
        local_apic_address: 0,
        local_apics: Vec::new(),
        io_apics: Vec::new(),
        interrupt_overrides: Vec::new(),
        pcat_compat: true,
        reset_reg: None,
    };

    parse_madt(&tables, &mut info)?;
    parse_fadt(&tables, &mut info);

    Ok(PLATFORM_INFO.init_once(|| info))
}

pub fn platform_info() -> Option<&'static PlatformInfo> {
    PLATFORM_INFO.get()
}

fn acpi_error_str(_e: AcpiError) -> &'static str {
    "failed to locate/parse ACPI tables"
}

/// Reset the machine through the FADT reset register, if one was found.
///
/// Per the ACPI spec the register may live in I/O space or in MMIO; only
/// I/O space is implemented, which covers every platform this kernel boots
/// on (QEMU, real PC hardware via the PS/2-era chipset reset port).
pub fn reset() -> ! {
    if let Some(info) = PLATFORM_INFO.get() {
        if let Some(reg) = info.reset_reg {
            if reg.address_space == 1 {
                // SystemIO
                let mut port: x86_64::instructions::port::Port<u8> =
                    x86_64::instructions::port::Port::new(reg.address as u16);
                unsafe { port.write(reg.value) };
            }
        }
    }
    // Fall back to the keyboard controller's pulse-reset line (port 0x64,
    // command 0xFE), which predates ACPI and works on essentially anything.
    let mut kbc: x86_64::instructions::port::Port<u8> = x86_64::instructions::port::Port::new(0x64);
    unsafe { kbc.write(0xFE) };
    crate::hlt_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_platform() -> PlatformInfo {
        PlatformInfo {
            local_apic_address: 0xFEE0_0000,
            local_apics: Vec::new(),
            io_apics: alloc::vec![
                IoApicEntry { id: 0, address: 0xFEC0_0000, gsi_base: 0 },
                IoApicEntry { id: 1, address: 0xFEC1_0000, gsi_base: 24 },
            ],
            interrupt_overrides: alloc::vec![InterruptSourceOverride {
                bus: 0,
                source_irq: 0,
                gsi: 2,
                polarity: Polarity::ActiveHigh,
                trigger_mode: TriggerMode::Edge,
            }],
            pcat_compat: true,
            reset_reg: None,
        }
    }

    #[test]
    fn isa_irq_override_is_applied() {
        let info = sample_platform();
        let (gsi, polarity, trigger) = info.isa_irq_to_gsi(0);
        assert_eq!(gsi, 2);
        assert_eq!(polarity, Polarity::ActiveHigh);
        assert_eq!(trigger, TriggerMode::Edge);
    }

    #[test]
    fn isa_irq_without_override_maps_identity() {
        let info = sample_platform();
        let (gsi, polarity, trigger) = info.isa_irq_to_gsi(4);
        assert_eq!(gsi, 4);
        assert_eq!(polarity, Polarity::ConformsToBus);
        assert_eq!(trigger, TriggerMode::ConformsToBus);
    }

    #[test]
    fn io_apic_for_gsi_picks_covering_apic() {
        let info = sample_platform();
        assert_eq!(info.io_apic_for_gsi(5).unwrap().id, 0);
        assert_eq!(info.io_apic_for_gsi(24).unwrap().id, 1);
        assert_eq!(info.io_apic_for_gsi(30).unwrap().id, 1);
    }

    #[test]
    fn polarity_and_trigger_decode_mps_flags() {
        assert_eq!(decode_polarity(0b01), Polarity::ActiveHigh);
        assert_eq!(decode_polarity(0b11), Polarity::ActiveLow);
        assert_eq!(decode_polarity(0b00), Polarity::ConformsToBus);
        assert_eq!(decode_trigger(0b0100), TriggerMode::Edge);
        assert_eq!(decode_trigger(0b1100), TriggerMode::Level);
        assert_eq!(decode_trigger(0b0000), TriggerMode::ConformsToBus);
    }
}
