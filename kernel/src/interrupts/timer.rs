//! Timer interrupt handler.
//!
//! Does the minimal amount of work on every tick: bump the global tick
//! count, let the scheduler decrement the running process's slice, and send
//! EOI. Preemption inside the interrupt handler itself is out of scope —
//! `scheduler::on_tick` only flags that a reschedule is due; the switch
//! happens the next time something calls `scheduler::yield_now`.

use x86_64::structures::idt::InterruptStackFrame;

use crate::task::scheduler;

pub extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::per_cpu::irq_enter();

    crate::time::timer_interrupt();
    scheduler::on_tick();

    super::dispatch_irq(super::InterruptIndex::Timer.as_u8() - super::PIC_1_OFFSET);

    if crate::apic::using_apic() {
        crate::apic::send_eoi();
    } else {
        unsafe {
            super::PICS
                .lock()
                .notify_end_of_interrupt(super::InterruptIndex::Timer.as_u8());
        }
    }

    crate::per_cpu::irq_exit();
}
