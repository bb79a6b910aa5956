use crate::gdt;

use pic8259::ChainedPics;
use spin::Once;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

mod timer;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    // Skip COM2 (IRQ3)
    Serial = PIC_1_OFFSET + 4, // COM1 is IRQ4
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

static IDT: Once<InterruptDescriptorTable> = Once::new();

/// Number of legacy IRQ lines (0-15) `install_handler` can register against.
const IRQ_COUNT: usize = 16;

type IrqHandlerFn = fn();

/// Runtime table indexed by IRQ number. Dispatch consults this after the
/// vector's own fixed low-level work (demux, drain, scancode decode) and
/// before issuing the end-of-interrupt.
static IRQ_HANDLERS: spin::Mutex<[Option<IrqHandlerFn>; IRQ_COUNT]> =
    spin::Mutex::new([None; IRQ_COUNT]);

/// Register `handler` to run on every occurrence of `irq`. Overwrites any
/// previously installed handler for that line.
pub fn install_handler(irq: u8, handler: IrqHandlerFn) {
    if let Some(slot) = IRQ_HANDLERS.lock().get_mut(irq as usize) {
        *slot = Some(handler);
    }
}

fn dispatch_irq(irq: u8) {
    let handler = IRQ_HANDLERS.lock().get(irq as usize).copied().flatten();
    if let Some(handler) = handler {
        handler();
    }
}

pub fn init() {
    gdt::init();
    init_idt();
}

pub fn init_idt() {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_by_zero_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.stack_segment_fault
            .set_handler_fn(stack_segment_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        unsafe {
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(gdt::PAGE_FAULT_IST_INDEX);
        }

        idt[InterruptIndex::Timer.as_u8()].set_handler_fn(timer::timer_interrupt_handler);
        idt[InterruptIndex::Keyboard.as_u8()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Serial.as_u8()].set_handler_fn(serial_interrupt_handler);

        for i in 32..=255 {
            if i != InterruptIndex::Timer.as_u8()
                && i != InterruptIndex::Keyboard.as_u8()
                && i != InterruptIndex::Serial.as_u8()
            {
                idt[i].set_handler_fn(generic_handler);
            }
        }

        idt
    });

    let idt = IDT.get().unwrap();
    idt.load();
    log::info!("IDT loaded at {:#x}", idt as *const _ as u64);
}

/// Initialize the legacy 8259 PIC and unmask timer, keyboard, and serial.
pub fn init_pic() {
    unsafe {
        PICS.lock().initialize();

        use x86_64::instructions::port::Port;
        let mut port1: Port<u8> = Port::new(0x21); // PIC1 data port
        let mask1 = port1.read() & !0b0001_0011; // clear bit 0 (timer), 1 (keyboard), 4 (serial)
        port1.write(mask1);

        // Drain any pending keyboard data so the controller starts clean.
        let mut kb_status: Port<u8> = Port::new(0x64);
        let mut kb_data: Port<u8> = Port::new(0x60);
        for _ in 0..10 {
            if (kb_status.read() & 0x01) != 0 {
                let _ = kb_data.read();
            } else {
                break;
            }
        }
    }
}

/// Get IDT base and limit for logging.
pub fn get_idt_info() -> (u64, u16) {
    let idtr = x86_64::instructions::tables::sidt();
    (idtr.base.as_u64(), idtr.limit)
}

/// Check if interrupts are currently enabled.
#[allow(dead_code)]
pub fn are_interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

extern "x86-interrupt" fn debug_handler(stack_frame: InterruptStackFrame) {
    crate::per_cpu::preempt_disable();
    log::info!(
        "#DB (Debug Exception) at {:#x}",
        stack_frame.instruction_pointer.as_u64()
    );
    crate::per_cpu::preempt_enable();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::per_cpu::preempt_disable();
    log::debug!(
        "Breakpoint at {:#x}",
        stack_frame.instruction_pointer.as_u64()
    );
    crate::per_cpu::preempt_enable();
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    use x86_64::registers::control::{Cr2, Cr3};

    let cr2 = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    let (cr3_frame, _) = Cr3::read();

    log::error!("==================== DOUBLE FAULT ====================");
    log::error!("CR2 (faulting address): {:#x}", cr2);
    log::error!("Error Code: {:#x}", error_code);
    log::error!("RIP: {:#x}", stack_frame.instruction_pointer.as_u64());
    log::error!("RSP: {:#x}", stack_frame.stack_pointer.as_u64());
    log::error!("CR3: {:#x}", cr3_frame.start_address().as_u64());
    if cr2 != 0 {
        log::error!("Likely caused by page fault at {:#x}", cr2);
    }
    log::error!("======================================================");

    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    use x86_64::instructions::port::Port;

    crate::per_cpu::irq_enter();

    // PS/2 demux (critical contract): keyboard (IRQ1) and mouse (IRQ12)
    // share the 8042 controller. Status bit 0 says a byte is waiting;
    // status bit 5 says it belongs to the auxiliary (mouse) device rather
    // than the keyboard. A byte meant for the mouse must still be drained
    // here or it corrupts the next scancode read.
    let mut status_port: Port<u8> = Port::new(0x64);
    let status = unsafe { status_port.read() };

    if status & 0x01 != 0 {
        let mut kb_port: Port<u8> = Port::new(0x60);
        let byte = unsafe { kb_port.read() };
        if status & 0x20 == 0 {
            crate::keyboard::add_scancode(byte);
        }
        // else: byte belongs to the mouse; drained above and discarded.
    }

    dispatch_irq(InterruptIndex::Keyboard.as_u8() - PIC_1_OFFSET);

    if crate::apic::using_apic() {
        crate::apic::send_eoi();
    } else {
        unsafe {
            PICS.lock()
                .notify_end_of_interrupt(InterruptIndex::Keyboard.as_u8());
        }
    }

    crate::per_cpu::irq_exit();
}

extern "x86-interrupt" fn serial_interrupt_handler(_stack_frame: InterruptStackFrame) {
    use x86_64::instructions::port::Port;

    crate::per_cpu::irq_enter();

    let mut lsr_port = Port::<u8>::new(0x3F8 + 5); // Line Status Register
    let mut data_port = Port::<u8>::new(0x3F8);

    while unsafe { lsr_port.read() } & 0x01 != 0 {
        let byte = unsafe { data_port.read() };
        crate::serial::add_serial_byte(byte);
    }

    dispatch_irq(InterruptIndex::Serial.as_u8() - PIC_1_OFFSET);

    if crate::apic::using_apic() {
        crate::apic::send_eoi();
    } else {
        unsafe {
            PICS.lock()
                .notify_end_of_interrupt(InterruptIndex::Serial.as_u8());
        }
    }

    crate::per_cpu::irq_exit();
}

extern "x86-interrupt" fn divide_by_zero_handler(stack_frame: InterruptStackFrame) {
    crate::per_cpu::preempt_disable();

    log::error!("EXCEPTION: DIVIDE BY ZERO\n{:#?}", stack_frame);
    #[cfg(feature = "test_divide_by_zero")]
    {
        log::info!("TEST_MARKER: DIVIDE_BY_ZERO_HANDLED");
        crate::exit_qemu(crate::QemuExitCode::Success);
    }
    #[cfg(not(feature = "test_divide_by_zero"))]
    {
        crate::per_cpu::preempt_enable();
        panic!("Kernel halted due to divide by zero exception");
    }
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    crate::per_cpu::preempt_disable();

    log::error!(
        "EXCEPTION: INVALID OPCODE at {:#x}\n{:#?}",
        stack_frame.instruction_pointer.as_u64(),
        stack_frame
    );
    #[cfg(feature = "test_invalid_opcode")]
    {
        log::info!("TEST_MARKER: INVALID_OPCODE_HANDLED");
        crate::exit_qemu(crate::QemuExitCode::Success);
    }
    #[cfg(not(feature = "test_invalid_opcode"))]
    {
        crate::per_cpu::preempt_enable();
        panic!("Kernel halted due to invalid opcode exception");
    }
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::per_cpu::preempt_disable();

    let accessed_addr = Cr2::read().unwrap_or(x86_64::VirtAddr::zero());

    if let Some(stack) = crate::memory::stack::is_guard_page_fault(accessed_addr) {
        log::error!("STACK OVERFLOW DETECTED!");
        log::error!("Attempted to access guard page at: {:?}", accessed_addr);
        log::error!("Stack bottom (guard page): {:?}", stack.guard_page());
        log::error!("Stack range: {:?} - {:?}", stack.bottom(), stack.top());
        panic!("Stack overflow - guard page accessed");
    }

    log::error!("EXCEPTION: PAGE FAULT");
    log::error!("Accessed Address: {:?}", accessed_addr);
    log::error!("Error Code: {:?}", error_code);
    log::error!("{:#?}", stack_frame);

    #[cfg(feature = "test_page_fault")]
    {
        log::info!("TEST_MARKER: PAGE_FAULT_HANDLED");
        crate::exit_qemu(crate::QemuExitCode::Success);
    }
    #[cfg(not(feature = "test_page_fault"))]
    {
        crate::per_cpu::preempt_enable();
        panic!("Unrecoverable page fault");
    }
}

extern "x86-interrupt" fn stack_segment_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::per_cpu::preempt_disable();
    log::error!("EXCEPTION: STACK SEGMENT FAULT (#SS)");
    log::error!("  Error Code: {:#x}", error_code);
    log::error!("  RIP: {:#x}", stack_frame.instruction_pointer.as_u64());
    log::error!("  RSP: {:#x}", stack_frame.stack_pointer.as_u64());
    panic!("Stack segment fault\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::per_cpu::preempt_disable();

    let external = (error_code & 1) != 0;
    let table = (error_code >> 1) & 0b11;
    let index = (error_code >> 3) & 0x1FFF;
    let table_name = match table {
        0b00 => "GDT",
        0b10 => "LDT",
        _ => "IDT",
    };

    log::error!("EXCEPTION: GENERAL PROTECTION FAULT (#GP)");
    log::error!("  Error Code: {:#x}", error_code);
    log::error!(
        "  Decoded: external={}, table={} ({}), index={}",
        external, table, table_name, index
    );
    log::error!("  RIP: {:#x}", stack_frame.instruction_pointer.as_u64());
    log::error!("{:#?}", stack_frame);

    panic!("General Protection Fault");
}

extern "x86-interrupt" fn generic_handler(stack_frame: InterruptStackFrame) {
    crate::per_cpu::irq_enter();

    log::warn!(
        "UNHANDLED INTERRUPT from RIP {:#x}",
        stack_frame.instruction_pointer.as_u64()
    );

    // Any vector in 32-47 is a PIC IRQ; ack both controllers since we don't
    // know which one raised it. The x86-interrupt ABI gives us no way to
    // recover which vector fired here, so a registered `install_handler`
    // entry for an IRQ line other than timer/keyboard/serial can't be
    // reached from this catch-all - those three dispatch to the table
    // directly from their own hardcoded vectors instead.
    if crate::apic::using_apic() {
        crate::apic::send_eoi();
    } else {
        unsafe {
            PICS.lock().notify_end_of_interrupt(PIC_2_OFFSET + 7);
        }
    }

    crate::per_cpu::irq_exit();
}
