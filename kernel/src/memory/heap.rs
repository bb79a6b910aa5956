//! Kernel heap: a linear bump+freelist allocator over a fixed virtual range.
//!
//! The whole range is mapped up front (frame-by-frame, like every other
//! fixed kernel region), so `kmalloc` never needs to extend the mapping —
//! it only ever bumps a cursor through already-mapped memory or reuses a
//! freed block. Every block carries an in-band header {size, free, next};
//! free blocks form a singly linked list kept in address order so adjacent
//! free neighbours can be coalesced on both sides as soon as a block is
//! freed.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use spin::Mutex;
use x86_64::structures::paging::{Mapper, OffsetPageTable, Page, PageTableFlags, Size4KiB};
use x86_64::VirtAddr;

use crate::memory::frame_allocator::GlobalFrameAllocator;

pub const HEAP_START: u64 = 0x_4444_4444_0000;
pub const HEAP_SIZE: u64 = 32 * 1024 * 1024;

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();
const ALIGN: usize = 8;
const MIN_BLOCK_DATA: usize = 16;

#[repr(C)]
struct BlockHeader {
    size: usize,
    free: bool,
    next: Option<NonNull<BlockHeader>>,
}

struct HeapState {
    /// First byte not yet carved out of the arena.
    bump: usize,
    end: usize,
    free_list: Option<NonNull<BlockHeader>>,
}

unsafe impl Send for HeapState {}

struct KernelHeap {
    state: Mutex<Option<HeapState>>,
}

impl KernelHeap {
    const fn new() -> Self {
        KernelHeap { state: Mutex::new(None) }
    }

    fn align_up(n: usize, align: usize) -> usize {
        (n + align - 1) & !(align - 1)
    }

    /// Split `block` if the remainder can host another block header plus a
    /// minimum-size payload; otherwise hand the whole block over unsplit.
    unsafe fn split_if_possible(block: NonNull<BlockHeader>, needed_data: usize) {
        let header = block.as_ptr();
        let total = (*header).size;
        let remainder = total.saturating_sub(needed_data);
        if remainder < HEADER_SIZE + MIN_BLOCK_DATA {
            return;
        }
        let new_block_addr = (header as usize) + HEADER_SIZE + needed_data;
        let new_header = new_block_addr as *mut BlockHeader;
        new_header.write(BlockHeader {
            size: remainder - HEADER_SIZE,
            free: true,
            next: (*header).next,
        });
        (*header).size = needed_data;
        (*header).next = NonNull::new(new_header);
    }

    /// Insert `block` into the free list in address order, then coalesce it
    /// with whichever of its neighbours turn out to be memory-adjacent.
    unsafe fn insert_free_sorted(state: &mut HeapState, block: NonNull<BlockHeader>) {
        let addr = block.as_ptr() as usize;
        (*block.as_ptr()).free = true;

        let mut prev: Option<NonNull<BlockHeader>> = None;
        let mut cur = state.free_list;
        while let Some(c) = cur {
            if (c.as_ptr() as usize) > addr {
                break;
            }
            prev = Some(c);
            cur = (*c.as_ptr()).next;
        }

        (*block.as_ptr()).next = cur;
        match prev {
            Some(p) => (*p.as_ptr()).next = Some(block),
            None => state.free_list = Some(block),
        }

        Self::coalesce_around(state, block);
    }

    unsafe fn coalesce_around(state: &mut HeapState, block: NonNull<BlockHeader>) {
        let header = block.as_ptr();

        // Merge with the following free block, if it directly abuts us.
        if let Some(next) = (*header).next {
            let next_addr = next.as_ptr() as usize;
            let end_of_block = (header as usize) + HEADER_SIZE + (*header).size;
            if end_of_block == next_addr {
                (*header).size += HEADER_SIZE + (*next.as_ptr()).size;
                (*header).next = (*next.as_ptr()).next;
            }
        }

        // Merge into the preceding free block, if it directly abuts us.
        // The list is address-sorted, so a single walk finds our predecessor.
        let mut cur = state.free_list;
        while let Some(c) = cur {
            let cheader = c.as_ptr();
            if let Some(n) = (*cheader).next {
                if n == block {
                    let end_of_prev = (cheader as usize) + HEADER_SIZE + (*cheader).size;
                    if end_of_prev == (header as usize) {
                        (*cheader).size += HEADER_SIZE + (*header).size;
                        (*cheader).next = (*header).next;
                    }
                    break;
                }
            }
            cur = (*cheader).next;
        }
    }

    unsafe fn alloc_impl(&self, layout: Layout) -> *mut u8 {
        let data_size = Self::align_up(layout.size().max(MIN_BLOCK_DATA), ALIGN);

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return core::ptr::null_mut() };

        // First-fit scan of the free list.
        let mut prev: Option<NonNull<BlockHeader>> = None;
        let mut cur = state.free_list;
        while let Some(c) = cur {
            let header = c.as_ptr();
            if (*header).free && (*header).size >= data_size {
                Self::split_if_possible(c, data_size);
                (*header).free = false;
                let next = (*header).next;
                match prev {
                    Some(p) => (*p.as_ptr()).next = next,
                    None => state.free_list = next,
                }
                return (header as usize + HEADER_SIZE) as *mut u8;
            }
            prev = Some(c);
            cur = (*header).next;
        }

        // No reusable block: bump-allocate a fresh one from the arena.
        let block_addr = state.bump;
        let needed = HEADER_SIZE + data_size;
        if block_addr + needed > state.end {
            return core::ptr::null_mut();
        }
        state.bump += needed;

        let header = block_addr as *mut BlockHeader;
        header.write(BlockHeader { size: data_size, free: false, next: None });
        (block_addr + HEADER_SIZE) as *mut u8
    }

    /// `kfree`: a no-op on null. Double-free is not detected — freeing an
    /// already-free block simply re-links it, matching the data model's
    /// single free-flag rather than a reference count.
    unsafe fn dealloc_impl(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header_addr = ptr as usize - HEADER_SIZE;
        let Some(block) = NonNull::new(header_addr as *mut BlockHeader) else { return };

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };
        Self::insert_free_sorted(state, block);
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.alloc_impl(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.dealloc_impl(ptr)
    }
}

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap::new();

/// Map the whole heap range and hand the allocator an empty arena to bump
/// into. Mirrors the frame-by-frame mapping loop used for kernel stacks.
pub fn init(mapper: &mut OffsetPageTable<'static>) -> Result<(), &'static str> {
    let heap_start = VirtAddr::new(HEAP_START);
    let heap_end = heap_start + HEAP_SIZE - 1u64;
    let heap_start_page = Page::<Size4KiB>::containing_address(heap_start);
    let heap_end_page = Page::<Size4KiB>::containing_address(heap_end);

    log::info!("Mapping heap pages from {:?} to {:?}", heap_start_page, heap_end_page);

    let mut frame_allocator = GlobalFrameAllocator;
    for page in Page::range_inclusive(heap_start_page, heap_end_page) {
        let frame = crate::memory::frame_allocator::allocate_frame().ok_or("out of memory")?;
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        unsafe {
            mapper
                .map_to(page, frame, flags, &mut frame_allocator)
                .map_err(|_| "failed to map heap page")?
                .flush();
        }
    }

    *ALLOCATOR.state.lock() = Some(HeapState {
        bump: HEAP_START as usize,
        end: (HEAP_START + HEAP_SIZE) as usize,
        free_list: None,
    });

    log::info!("Heap initialized at {:#x} with size {} KiB", HEAP_START, HEAP_SIZE / 1024);
    Ok(())
}

#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn fresh_heap(size: usize) -> (KernelHeap, Vec<u8>) {
        let mut backing: Vec<u8> = alloc::vec![0u8; size];
        let base = backing.as_mut_ptr() as usize;
        let heap = KernelHeap::new();
        *heap.state.lock() = Some(HeapState { bump: base, end: base + size, free_list: None });
        (heap, backing)
    }

    #[test]
    fn alloc_then_free_is_idempotent() {
        let (heap, _backing) = fresh_heap(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let p1 = unsafe { heap.alloc_impl(layout) };
        assert!(!p1.is_null());
        unsafe { heap.dealloc_impl(p1) };

        let p2 = unsafe { heap.alloc_impl(layout) };
        assert!(!p2.is_null());
        unsafe { heap.dealloc_impl(p2) };

        let guard = heap.state.lock();
        assert!(guard.as_ref().unwrap().free_list.is_some());
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_block() {
        let (heap, _backing) = fresh_heap(4096);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let a = unsafe { heap.alloc_impl(layout) };
        let b = unsafe { heap.alloc_impl(layout) };
        let c = unsafe { heap.alloc_impl(layout) };

        unsafe { heap.dealloc_impl(a) };
        unsafe { heap.dealloc_impl(b) };
        unsafe { heap.dealloc_impl(c) };

        let guard = heap.state.lock();
        let head = guard.as_ref().unwrap().free_list.unwrap();
        unsafe {
            assert!((*head.as_ptr()).next.is_none());
        }
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let (heap, _backing) = fresh_heap(4096);
        unsafe { heap.dealloc_impl(core::ptr::null_mut()) };
    }
}
