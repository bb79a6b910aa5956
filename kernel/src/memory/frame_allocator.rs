//! Physical memory manager: a bitmap allocator over 4 KiB frames.
//!
//! One bit per frame across the whole physical address space the
//! bootloader reports as usable. `alloc_block` is first-fit over the
//! bitmap; `free_block` clears a bit. There is no multi-page contiguous
//! allocation — every caller (heap, kernel stacks, page tables, block
//! cache, device buffers) takes frames one at a time.

use alloc::vec::Vec;
use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, PhysFrame, Size4KiB};
use x86_64::PhysAddr;

#[cfg(feature = "testing")]
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

const FRAME_SIZE: u64 = 4096;

/// Frames below 1 MiB are never handed out (BIOS/firmware reserved area,
/// and frame 0 would be indistinguishable from a null physical address).
const LOW_MEMORY_FLOOR: u64 = 0x100000;

struct Bitmap {
    /// One bit per frame; bit set == allocated.
    bits: Vec<u64>,
    base_frame: u64,
    frame_count: u64,
    total_bytes: u64,
    reserved_bytes: u64,
    free_frames: u64,
    next_scan: u64,
}

impl Bitmap {
    fn word_bit(&self, frame: u64) -> (usize, u32) {
        let idx = frame - self.base_frame;
        ((idx / 64) as usize, (idx % 64) as u32)
    }

    fn is_allocated(&self, frame: u64) -> bool {
        let (word, bit) = self.word_bit(frame);
        (self.bits[word] >> bit) & 1 == 1
    }

    fn set_allocated(&mut self, frame: u64, allocated: bool) {
        let (word, bit) = self.word_bit(frame);
        if allocated {
            self.bits[word] |= 1 << bit;
        } else {
            self.bits[word] &= !(1 << bit);
        }
    }
}

static BITMAP: Mutex<Option<Bitmap>> = Mutex::new(None);

#[cfg(feature = "testing")]
static SIMULATE_OOM: AtomicBool = AtomicBool::new(false);

#[cfg(feature = "testing")]
pub fn enable_oom_simulation() {
    SIMULATE_OOM.store(true, Ordering::SeqCst);
}

#[cfg(feature = "testing")]
pub fn disable_oom_simulation() {
    SIMULATE_OOM.store(false, Ordering::SeqCst);
}

/// Build the bitmap from the bootloader's memory map. Any region marked
/// reserved (kernel image, firmware, MMIO) simply never gets a usable
/// frame entry and can never be allocated or freed.
pub fn init(memory_regions: &'static MemoryRegions) {
    let mut min_frame = u64::MAX;
    let mut max_frame = 0u64;
    let mut total_bytes = 0u64;

    for region in memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable && region.end > LOW_MEMORY_FLOOR {
            let start = region.start.max(LOW_MEMORY_FLOOR);
            min_frame = min_frame.min(start / FRAME_SIZE);
            max_frame = max_frame.max(region.end.div_ceil(FRAME_SIZE));
            total_bytes += region.end - start;
        }
    }

    if min_frame == u64::MAX {
        panic!("no usable memory regions reported by bootloader");
    }

    let frame_count = max_frame - min_frame;
    let words = frame_count.div_ceil(64) as usize;
    // Start fully reserved; usable ranges are cleared below.
    let mut bits = alloc::vec![u64::MAX; words];

    for region in memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable && region.end > LOW_MEMORY_FLOOR {
            let start = region.start.max(LOW_MEMORY_FLOOR);
            let first = (start / FRAME_SIZE) - min_frame;
            let last = (region.end / FRAME_SIZE).saturating_sub(min_frame);
            for f in first..last.min(frame_count) {
                let word = (f / 64) as usize;
                let bit = f % 64;
                bits[word] &= !(1 << bit);
            }
        }
    }

    let free_frames = bits.iter().map(|w| w.count_zeros() as u64).sum();
    let reserved_bytes = frame_count * FRAME_SIZE - free_frames * FRAME_SIZE;

    log::info!(
        "PMM bitmap initialized: {} MiB usable across {} frames",
        total_bytes / (1024 * 1024),
        free_frames,
    );

    *BITMAP.lock() = Some(Bitmap {
        bits,
        base_frame: min_frame,
        frame_count,
        total_bytes,
        reserved_bytes,
        free_frames,
        next_scan: 0,
    });
}

/// `alloc_block`: first-fit scan over the bitmap starting where the last
/// scan left off, wrapping once. Returns a frame not currently allocated.
pub fn allocate_frame() -> Option<PhysFrame> {
    #[cfg(feature = "testing")]
    if SIMULATE_OOM.load(Ordering::SeqCst) {
        return None;
    }

    let mut guard = BITMAP.lock();
    let bitmap = guard.as_mut()?;
    if bitmap.free_frames == 0 {
        return None;
    }

    let start = bitmap.next_scan;
    for offset in 0..bitmap.frame_count {
        let frame = (start + offset) % bitmap.frame_count;
        if !bitmap.is_allocated(bitmap.base_frame + frame) {
            bitmap.set_allocated(bitmap.base_frame + frame, true);
            bitmap.free_frames -= 1;
            bitmap.next_scan = (frame + 1) % bitmap.frame_count;
            let addr = (bitmap.base_frame + frame) * FRAME_SIZE;
            return Some(PhysFrame::containing_address(PhysAddr::new(addr)));
        }
    }
    None
}

/// Allocate `count` physically contiguous frames (first-fit run scan).
/// Used by device drivers that need a DMA-visible buffer spanning more
/// than one page, such as a GPU push buffer.
pub fn allocate_contiguous(count: u64) -> Option<PhysFrame> {
    if count == 0 {
        return None;
    }

    #[cfg(feature = "testing")]
    if SIMULATE_OOM.load(Ordering::SeqCst) {
        return None;
    }

    let mut guard = BITMAP.lock();
    let bitmap = guard.as_mut()?;
    if bitmap.free_frames < count {
        return None;
    }

    let mut run_start = 0u64;
    let mut run_len = 0u64;
    for frame in 0..bitmap.frame_count {
        if bitmap.is_allocated(bitmap.base_frame + frame) {
            run_len = 0;
            continue;
        }
        if run_len == 0 {
            run_start = frame;
        }
        run_len += 1;
        if run_len == count {
            for f in run_start..run_start + count {
                bitmap.set_allocated(bitmap.base_frame + f, true);
            }
            bitmap.free_frames -= count;
            let addr = (bitmap.base_frame + run_start) * FRAME_SIZE;
            return Some(PhysFrame::containing_address(PhysAddr::new(addr)));
        }
    }
    None
}

/// `free_block`: clears the bitmap bit. A double-free is rejected rather
/// than silently corrupting the free count.
pub fn deallocate_frame(frame: PhysFrame) {
    let addr = frame.start_address().as_u64();
    if addr < LOW_MEMORY_FLOOR {
        log::warn!("refusing to free reserved frame {:#x}", addr);
        return;
    }
    let frame_num = addr / FRAME_SIZE;

    let mut guard = BITMAP.lock();
    let Some(bitmap) = guard.as_mut() else { return };
    if frame_num < bitmap.base_frame || frame_num >= bitmap.base_frame + bitmap.frame_count {
        log::warn!("free_block: frame {:#x} outside managed range", addr);
        return;
    }
    if !bitmap.is_allocated(frame_num) {
        log::warn!("free_block: double free of frame {:#x} ignored", addr);
        return;
    }
    bitmap.set_allocated(frame_num, false);
    bitmap.free_frames += 1;
}

pub struct MemoryStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub reserved_bytes: u64,
}

/// `stats() -> {total, free, reserved}`.
pub fn stats() -> MemoryStats {
    let guard = BITMAP.lock();
    match guard.as_ref() {
        Some(bitmap) => MemoryStats {
            total_bytes: bitmap.total_bytes,
            free_bytes: bitmap.free_frames * FRAME_SIZE,
            reserved_bytes: bitmap.reserved_bytes,
        },
        None => MemoryStats { total_bytes: 0, free_bytes: 0, reserved_bytes: 0 },
    }
}

/// Adapter so the bitmap allocator can back the `x86_64` crate's page
/// mapper, which wants a `FrameAllocator` impl for intermediate table pages.
pub struct GlobalFrameAllocator;

unsafe impl FrameAllocator<Size4KiB> for GlobalFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        allocate_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_bit_roundtrip() {
        let mut bm = Bitmap {
            bits: alloc::vec![0u64; 2],
            base_frame: 10,
            frame_count: 128,
            total_bytes: 128 * 4096,
            reserved_bytes: 0,
            free_frames: 128,
            next_scan: 0,
        };
        assert!(!bm.is_allocated(10));
        bm.set_allocated(10, true);
        assert!(bm.is_allocated(10));
        bm.set_allocated(10, false);
        assert!(!bm.is_allocated(10));
    }
}
