//! The context-switch primitive and the bootstrap trampoline new tasks
//! start in.
//!
//! Only the callee-saved registers and RFLAGS are switched here; everything
//! caller-saved is already on the outgoing task's kernel stack, spilled by
//! the compiler at the call site.

use core::arch::naked_asm;

/// Save the current callee-saved state on the running stack, record the
/// stack pointer through `prev_sp`, and resume whatever `next_sp` last
/// saved (or the staged bootstrap frame of a brand-new task).
///
/// # Safety
/// Interrupts must be disabled. `next_sp` must be a stack staged by
/// [`crate::task::task::Task::with_raw_entry`] or a previous call to this
/// function.
#[unsafe(naked)]
pub unsafe extern "sysv64" fn context_switch(prev_sp: *mut u64, next_sp: u64) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "pushfq",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Enter the very first task on this CPU. The boot stack is abandoned.
///
/// # Safety
/// Same staging requirements as [`context_switch`]; never returns.
#[unsafe(naked)]
pub unsafe extern "sysv64" fn first_context_switch(next_sp: u64) -> ! {
    naked_asm!(
        "mov rsp, rdi",
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Where `ret` lands on a freshly-created task. The stack above holds, in
/// order: an alignment slot, the entry point, then its three arguments.
/// Releases the task we switched away from, then jumps to
/// `entry(arg1, arg2, arg3)`.
#[unsafe(naked)]
pub(crate) unsafe extern "sysv64" fn task_bootstrap() {
    naked_asm!(
        "sub rsp, 8",
        "call {finish}",
        "add rsp, 16",
        "pop rax",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "sub rsp, 8",
        "sti",
        "jmp rax",
        finish = sym crate::task::scheduler::finish_switch,
    );
}
