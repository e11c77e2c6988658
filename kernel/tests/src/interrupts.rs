use crate::TestResult;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel::interrupt::{HandlerResult, RegisterFrame, register_interrupt_handler};

static SOFTWARE_INT_ARG: AtomicU64 = AtomicU64::new(0);

fn software_int_handler(frame: &mut RegisterFrame) -> HandlerResult {
    // The dispatcher hands us the full register snapshot; echo an argument
    // back through it like the syscall path does
    SOFTWARE_INT_ARG.store(frame.rdi, Ordering::SeqCst);
    frame.rax = frame.rdi + 1;
    HandlerResult::Handled
}

/// A registered vector is reachable with a software interrupt, sees the
/// caller's registers, and its writes land back in them.
pub fn software_interrupt_dispatch() -> TestResult {
    register_interrupt_handler(200, software_int_handler);

    let result: u64;
    unsafe {
        core::arch::asm!(
            "int 200",
            inlateout("rdi") 41u64 => _,
            out("rax") result,
        );
    }

    if SOFTWARE_INT_ARG.load(Ordering::SeqCst) != 41 {
        return TestResult::Failed("handler did not observe the caller's rdi".into());
    }
    if result != 42 {
        return TestResult::Failed("handler's rax write was not restored to the caller".into());
    }
    TestResult::Ok
}
