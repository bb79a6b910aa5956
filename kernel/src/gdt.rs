//! Global Descriptor Table and Task State Segment setup.
//!
//! Alteo runs entirely in ring 0: there is no userspace, so the GDT only
//! needs a kernel code/data pair plus the TSS. The TSS exists to supply
//! IST stacks for double-fault and page-fault handlers, which run on a
//! dedicated stack so a kernel stack overflow doesn't double-fault into
//! more stack overflow.

use conquer_once::spin::OnceCell;
use core::sync::atomic::{AtomicPtr, Ordering};
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
pub const PAGE_FAULT_IST_INDEX: u16 = 1;

static TSS: OnceCell<TaskStateSegment> = OnceCell::uninit();
static GDT: OnceCell<(GlobalDescriptorTable, Selectors)> = OnceCell::uninit();
static TSS_PTR: AtomicPtr<TaskStateSegment> = AtomicPtr::new(core::ptr::null_mut());

/// Kept alive for the life of the kernel; their top addresses are wired
/// into the TSS IST slots by [`update_ist_stacks`].
static DOUBLE_FAULT_STACK: OnceCell<crate::memory::kernel_stack::KernelStack> = OnceCell::uninit();
static PAGE_FAULT_STACK: OnceCell<crate::memory::kernel_stack::KernelStack> = OnceCell::uninit();

struct Selectors {
    code_selector: SegmentSelector,
    tss_selector: SegmentSelector,
    data_selector: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS};
    use x86_64::instructions::tables::load_tss;

    TSS.init_once(|| {
        let mut tss = TaskStateSegment::new();
        // IST stacks are filled in later by update_ist_stacks(), once the
        // kernel stack allocator is available.
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = VirtAddr::new(0);
        tss.interrupt_stack_table[PAGE_FAULT_IST_INDEX as usize] = VirtAddr::new(0);
        tss.privilege_stack_table[0] = VirtAddr::new(0);
        tss.iomap_base = core::mem::size_of::<TaskStateSegment>() as u16;
        tss
    });

    let tss_ref = TSS.get().unwrap();
    TSS_PTR.store(tss_ref as *const _ as *mut _, Ordering::Release);

    GDT.init_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(TSS.get().unwrap()));

        (
            gdt,
            Selectors {
                code_selector,
                tss_selector,
                data_selector,
            },
        )
    });

    let (gdt, selectors) = GDT.get().unwrap();
    gdt.load();

    unsafe {
        CS::set_reg(selectors.code_selector);
        DS::set_reg(selectors.data_selector);
        load_tss(selectors.tss_selector);
    }

    log::info!("GDT initialized");
    log::debug!("  Kernel code: {:#x}", selectors.code_selector.0);
    log::debug!("  Kernel data: {:#x}", selectors.data_selector.0);
    log::debug!("  TSS: {:#x}", selectors.tss_selector.0);
}

pub fn kernel_code_selector() -> SegmentSelector {
    GDT.get().expect("GDT not initialized").1.code_selector
}

pub fn kernel_data_selector() -> SegmentSelector {
    GDT.get().expect("GDT not initialized").1.data_selector
}

/// Allocate dedicated stacks for the double-fault and page-fault IST
/// entries. Must run after the kernel stack allocator is initialized.
pub fn update_ist_stacks() {
    let tss_ptr = TSS_PTR.load(Ordering::Acquire);
    if tss_ptr.is_null() {
        panic!("TSS not initialized");
    }

    let df_stack = DOUBLE_FAULT_STACK.init_once(|| {
        crate::memory::kernel_stack::allocate_kernel_stack()
            .expect("failed to allocate double-fault IST stack")
    });
    let pf_stack = PAGE_FAULT_STACK.init_once(|| {
        crate::memory::kernel_stack::allocate_kernel_stack()
            .expect("failed to allocate page-fault IST stack")
    });

    unsafe {
        (*tss_ptr).interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = df_stack.top();
        (*tss_ptr).interrupt_stack_table[PAGE_FAULT_IST_INDEX as usize] = pf_stack.top();
    }

    log::info!(
        "IST stacks ready: double-fault={:#x} page-fault={:#x}",
        df_stack.top(),
        pf_stack.top()
    );
}

pub fn set_kernel_stack(stack_top: VirtAddr) {
    let tss_ptr = TSS_PTR.load(Ordering::Acquire);
    if tss_ptr.is_null() {
        panic!("TSS not initialized");
    }
    unsafe {
        (*tss_ptr).privilege_stack_table[0] = stack_top;
    }
}

/// Get GDT base and limit for logging
pub fn get_gdt_info() -> (u64, u16) {
    let gdtr = x86_64::instructions::tables::sgdt();
    (gdtr.base.as_u64(), gdtr.limit)
}

/// Get TSS base address and RSP0 for logging
pub fn get_tss_info() -> (u64, u64) {
    let tss_ptr = TSS_PTR.load(Ordering::Acquire);
    if tss_ptr.is_null() {
        return (0, 0);
    }
    let base = tss_ptr as u64;
    let rsp0 = unsafe { (*tss_ptr).privilege_stack_table[0].as_u64() };
    (base, rsp0)
}
