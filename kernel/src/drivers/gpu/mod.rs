//! NVIDIA GPU command submission (PFIFO).
//!
//! Covers just enough of the PFIFO engine to open command channels, bind
//! engine-class objects to a subchannel, and drive push-buffer submission
//! with fence-based completion tracking. No 2D/3D/copy engine programming
//! lives here - this is the plumbing those engines sit on top of.

pub mod pfifo;

use crate::drivers::pci;

/// Chipset family boundary: NV50 introduced the IB_BASE/IB_LIMIT/GP_PUT
/// channel-control scheme this module targets; everything older used
/// PFIFO_MODE/PFIFO_DMA/CACHE1 instead.
const NV50_CHIPSET: u32 = 0x50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuFamily {
    Nv50Plus,
    PreNv50,
}

pub struct GpuInfo {
    pub device: pci::Device,
    pub mmio_base_phys: u64,
    pub mmio_virt: usize,
    pub mmio_size: usize,
    pub family: GpuFamily,
}

/// Read PMC_BOOT_0 at MMIO offset 0 to identify the chipset generation,
/// the same register every open NVIDIA driver probes first.
fn read_boot0(mmio_virt: usize) -> u32 {
    unsafe { core::ptr::read_volatile(mmio_virt as *const u32) }
}

fn chipset_from_boot0(boot0: u32) -> u32 {
    // Bits 28-31 hold a fixed 0x0 prefix on NV4+ parts; the actual
    // chipset major number lives in bits 20-27 (nouveau's `NV_PMC_BOOT_0`
    // decode).
    (boot0 >> 20) & 0xFF
}

/// Probe PCI for an NVIDIA device, map its first MMIO BAR, and identify
/// which PFIFO generation it implements.
pub fn probe() -> Option<GpuInfo> {
    let device = pci::find_nvidia_devices().into_iter().next()?;

    let bar0 = device.bars.iter().find(|b| !b.is_io && b.is_valid())?;
    let mmio_virt = crate::memory::map_mmio(bar0.address, bar0.size as usize).ok()?;

    let boot0 = read_boot0(mmio_virt);
    let chipset = chipset_from_boot0(boot0);
    let family = if chipset >= NV50_CHIPSET {
        GpuFamily::Nv50Plus
    } else {
        GpuFamily::PreNv50
    };

    log::info!(
        "gpu: NVIDIA device {:04x}:{:04x} at {:02x}:{:02x}.{} - chipset {:#x} ({:?})",
        device.vendor_id, device.device_id, device.bus, device.device, device.function,
        chipset, family,
    );

    Some(GpuInfo {
        device,
        mmio_base_phys: bar0.address,
        mmio_virt,
        mmio_size: bar0.size as usize,
        family,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv50_and_later_chipsets_classify_as_nv50_plus() {
        // Chipset 0x50 (G80) sits in bits 20-27 of PMC_BOOT_0.
        let boot0: u32 = 0x50 << 20;
        assert_eq!(chipset_from_boot0(boot0), 0x50);
    }

    #[test]
    fn pre_nv50_chipsets_classify_below_boundary() {
        let boot0: u32 = 0x44 << 20; // NV44
        let chipset = chipset_from_boot0(boot0);
        assert!(chipset < NV50_CHIPSET);
    }
}
