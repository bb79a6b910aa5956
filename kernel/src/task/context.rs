//! Saved CPU context and the raw context-switch assembly.
//!
//! `CpuContext` is the in-memory equivalent of the stack frame a real
//! context switch pops: 16 general-purpose registers, RIP and RFLAGS, laid
//! out at the fixed byte offsets the assembly below indexes into directly.
//! A process's first switch executes its entry point and, if that entry
//! point ever returns, falls through to [`process_entry_trampoline`]'s call
//! to `exit(0)` — this is the "pre-seeded stack frame" the process table
//! builds at `create()` time, expressed as an explicit struct instead of
//! literal bytes pushed onto the new stack.

use core::arch::global_asm;
use core::mem::transmute;
use x86_64::VirtAddr;

#[derive(Debug, Clone)]
#[repr(C)]
pub struct CpuContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl CpuContext {
    pub fn zeroed() -> Self {
        CpuContext {
            rax: 0, rbx: 0, rcx: 0, rdx: 0, rsi: 0, rdi: 0, rbp: 0, rsp: 0,
            r8: 0, r9: 0, r10: 0, r11: 0, r12: 0, r13: 0, r14: 0, r15: 0,
            rip: 0, rflags: 0x002,
        }
    }

    /// Build the initial context for a freshly-created process.
    ///
    /// `entry` is the process's real entry point; it is not placed directly
    /// in `rip` (that would skip the exit-on-return behaviour below).
    /// Instead `rip` points at [`process_entry_trampoline`] and `entry` is
    /// passed through `rdi` per the System V calling convention, matching
    /// how a pre-seeded stack frame would hand the trampoline its argument.
    pub fn new_process(entry: fn(), stack_top: VirtAddr) -> Self {
        let mut ctx = Self::zeroed();
        ctx.rsp = stack_top.as_u64();
        ctx.rip = process_entry_trampoline as u64;
        ctx.rdi = entry as u64;
        // Kernel code/data selectors; IF set so the tick timer can preempt.
        ctx.rflags = 0x202;
        ctx
    }
}

/// Every process entry point runs through here. A normal return from
/// `entry` (rather than an explicit `exit` call) still terminates cleanly.
extern "C" fn process_entry_trampoline(entry: u64) -> ! {
    let f: fn() = unsafe { transmute(entry) };
    f();
    crate::process::exit_current(0);
}

global_asm!(r#"
.global switch_context
.global switch_to_process

// switch_context(old: *mut CpuContext, new: *const CpuContext)
// RDI = old, RSI = new
switch_context:
    mov [rdi + 0x00], rax
    mov [rdi + 0x08], rbx
    mov [rdi + 0x10], rcx
    mov [rdi + 0x18], rdx
    mov [rdi + 0x20], rsi
    mov [rdi + 0x28], rdi
    mov [rdi + 0x30], rbp
    mov [rdi + 0x38], rsp
    mov [rdi + 0x40], r8
    mov [rdi + 0x48], r9
    mov [rdi + 0x50], r10
    mov [rdi + 0x58], r11
    mov [rdi + 0x60], r12
    mov [rdi + 0x68], r13
    mov [rdi + 0x70], r14
    mov [rdi + 0x78], r15

    mov rax, [rsp]
    mov [rdi + 0x80], rax

    pushfq
    pop rax
    mov [rdi + 0x88], rax

    mov rax, [rsi + 0x88]
    push rax
    popfq

    mov rax, [rsi + 0x00]
    mov rbx, [rsi + 0x08]
    mov rcx, [rsi + 0x10]
    mov rdx, [rsi + 0x18]
    mov rbp, [rsi + 0x30]
    mov r8,  [rsi + 0x40]
    mov r9,  [rsi + 0x48]
    mov r10, [rsi + 0x50]
    mov r11, [rsi + 0x58]
    mov r12, [rsi + 0x60]
    mov r13, [rsi + 0x68]
    mov r14, [rsi + 0x70]
    mov r15, [rsi + 0x78]

    mov rax, [rsi + 0x80]
    mov rsp, [rsi + 0x38]

    mov rdi, [rsi + 0x28]
    mov rsi, [rsi + 0x20]

    jmp rax

// switch_to_process(new: *const CpuContext) -> !
// First switch into a process; nothing to save.
switch_to_process:
    mov rax, [rdi + 0x88]
    push rax
    popfq

    mov rax, [rdi + 0x00]
    mov rbx, [rdi + 0x08]
    mov rcx, [rdi + 0x10]
    mov rdx, [rdi + 0x18]
    mov rsi, [rdi + 0x20]
    mov rbp, [rdi + 0x30]
    mov rsp, [rdi + 0x38]
    mov r8,  [rdi + 0x40]
    mov r9,  [rdi + 0x48]
    mov r10, [rdi + 0x50]
    mov r11, [rdi + 0x58]
    mov r12, [rdi + 0x60]
    mov r13, [rdi + 0x68]
    mov r14, [rdi + 0x70]
    mov r15, [rdi + 0x78]

    mov rax, [rdi + 0x80]
    mov rdi, [rdi + 0x28]

    jmp rax
"#);

extern "C" {
    fn switch_context(old_context: *mut CpuContext, new_context: *const CpuContext);
    fn switch_to_process(new_context: *const CpuContext) -> !;
}

/// # Safety
/// Both pointers must be valid, live, and properly aligned `CpuContext`s.
pub unsafe fn perform_context_switch(old_context: &mut CpuContext, new_context: &CpuContext) {
    switch_context(old_context as *mut CpuContext, new_context as *const CpuContext);
}

/// # Safety
/// `new_context` must be valid and fully initialized.
pub unsafe fn perform_initial_switch(new_context: &CpuContext) -> ! {
    switch_to_process(new_context as *const CpuContext);
}
