use conquer_once::spin::OnceCell;
use spin::Mutex;
use x86_64::structures::paging::{
    Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

/// The global page table mapper
static PAGE_TABLE_MAPPER: OnceCell<Mutex<OffsetPageTable<'static>>> = OnceCell::uninit();

/// Initialize paging with the given physical memory offset
///
/// # Safety
/// Caller must ensure that the complete physical memory is mapped to virtual memory
/// at the provided `physical_memory_offset`.
pub unsafe fn init(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = active_level_4_table(physical_memory_offset);
    let mapper = OffsetPageTable::new(level_4_table, physical_memory_offset);

    // Store a copy in the global static
    PAGE_TABLE_MAPPER.init_once(|| {
        let level_4_table = active_level_4_table(physical_memory_offset);
        Mutex::new(OffsetPageTable::new(level_4_table, physical_memory_offset))
    });

    log::info!("Page table initialized");
    mapper
}

/// Returns a mutable reference to the active level 4 page table
///
/// # Safety
/// Caller must ensure that the complete physical memory is mapped to virtual memory
/// at the provided `physical_memory_offset`.
unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    use x86_64::registers::control::Cr3;

    let (level_4_table_frame, _) = Cr3::read();

    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();

    &mut *page_table_ptr
}

/// Get the global mapper instance
///
/// # Safety
/// Caller must ensure that init() has been called first.
pub unsafe fn get_mapper() -> OffsetPageTable<'static> {
    let physical_memory_offset = crate::memory::physical_memory_offset();
    get_mapper_with_offset(physical_memory_offset)
}

/// Get a new mapper instance for manual page table operations
///
/// # Safety
/// Caller must ensure that the complete physical memory is mapped to virtual memory
/// at the provided `physical_memory_offset`.
pub unsafe fn get_mapper_with_offset(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = active_level_4_table(physical_memory_offset);
    OffsetPageTable::new(level_4_table, physical_memory_offset)
}

/// Base address for the kernel/user split
/// Addresses >= this value are kernel-only
#[allow(dead_code)]
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Check if an address is in kernel space
#[allow(dead_code)]
pub fn is_kernel_address(addr: VirtAddr) -> bool {
    addr.as_u64() >= KERNEL_BASE
}

/// Get page flags for a kernel mapping (present, optionally writable).
/// There is no userspace in this design, so every mapping is kernel-only.
#[allow(dead_code)]
pub fn get_page_flags(writable: bool) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT;

    if writable {
        flags |= PageTableFlags::WRITABLE;
    }

    flags
}

/// Return the kernel's PML4, i.e. the single page-table tree this kernel
/// runs with. There is no per-process address space: every mapping, user
/// and device alike, lives in this one tree.
pub fn get_kernel_pml4() -> &'static Mutex<OffsetPageTable<'static>> {
    PAGE_TABLE_MAPPER
        .get()
        .expect("paging::init must run before get_kernel_pml4")
}

/// Map `virt` to `phys` in `pml4` with `flags`. The PRESENT bit is set as
/// the final step of the mapping, as required by the page-table writer.
pub fn map_page(
    pml4: &Mutex<OffsetPageTable<'static>>,
    virt: VirtAddr,
    phys: PhysAddr,
    flags: PageTableFlags,
) -> Result<(), &'static str> {
    let page = Page::<Size4KiB>::containing_address(virt);
    let frame = PhysFrame::<Size4KiB>::containing_address(phys);

    let mut mapper = pml4.lock();
    unsafe {
        mapper
            .map_to(
                page,
                frame,
                flags | PageTableFlags::PRESENT,
                &mut crate::memory::frame_allocator::GlobalFrameAllocator,
            )
            .map_err(|_| "failed to map page")?
            .flush();
    }

    Ok(())
}

/// Unmap `virt` in `pml4`, returning the physical frame that was backing
/// it. The caller decides whether to return that frame to the PMM.
pub fn unmap_page(
    pml4: &Mutex<OffsetPageTable<'static>>,
    virt: VirtAddr,
) -> Result<PhysFrame<Size4KiB>, &'static str> {
    let page = Page::<Size4KiB>::containing_address(virt);

    let mut mapper = pml4.lock();
    let (frame, flush) = mapper.unmap(page).map_err(|_| "failed to unmap page")?;
    flush.flush();

    Ok(frame)
}

/// Enable global pages support (CR4.PGE)
/// 
/// This allows the CPU to keep kernel pages in the TLB across CR3 changes,
/// significantly improving performance during context switches.
/// 
/// # Safety
/// Should be called after kernel page tables are set up but before userspace processes start.
pub unsafe fn enable_global_pages() {
    use x86_64::registers::control::{Cr4, Cr4Flags};
    
    // Read current CR4 value
    let mut cr4 = Cr4::read();
    
    // Check if PGE is already enabled
    if cr4.contains(Cr4Flags::PAGE_GLOBAL) {
        log::info!("CR4.PGE already enabled");
        return;
    }
    
    // Enable the PGE bit
    cr4 |= Cr4Flags::PAGE_GLOBAL;
    Cr4::write(cr4);
    
    log::info!("PHASE2: Enabled global pages support (CR4.PGE)");
}
