#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod amc;
pub mod interrupts;
pub mod scheduler;

use alloc::string::String;

pub enum TestResult {
    Ok,
    Failed(String),
}

pub struct KernelTest {
    pub name: &'static str,
    pub run: fn() -> TestResult,
}

pub fn tests() -> &'static [KernelTest] {
    &[
        KernelTest {
            name: "scheduler::simple_task_creation",
            run: scheduler::simple_task_creation,
        },
        KernelTest {
            name: "scheduler::task_spawn_and_run",
            run: scheduler::task_spawn_and_run,
        },
        KernelTest {
            name: "scheduler::quantum_demotion",
            run: scheduler::quantum_demotion,
        },
        KernelTest {
            name: "scheduler::priority_boost",
            run: scheduler::priority_boost,
        },
        KernelTest {
            name: "scheduler::blocked_task_not_selected",
            run: scheduler::blocked_task_not_selected,
        },
        KernelTest {
            name: "amc::fifo_within_sender",
            run: amc::fifo_within_sender,
        },
        KernelTest {
            name: "amc::await_from_filters_by_source",
            run: amc::await_from_filters_by_source,
        },
        KernelTest {
            name: "amc::send_to_nonexistent_service_is_dropped",
            run: amc::send_to_nonexistent_service_is_dropped,
        },
        KernelTest {
            name: "amc::service_death_notifies_subscriber",
            run: amc::service_death_notifies_subscriber,
        },
        KernelTest {
            name: "interrupts::software_interrupt_dispatch",
            run: interrupts::software_interrupt_dispatch,
        },
    ]
}

/// Runs inside a spawned kernel task so tests can block and be preempted.
pub fn run_tests() -> ! {
    let tests = tests();
    log::info!("Running {} kernel tests", tests.len());

    let mut failed = 0;
    for test in tests {
        log::info!("{}:", test.name);
        match (test.run)() {
            TestResult::Ok => log::info!("\x1b[32m[ok]\x1b[0m"),
            TestResult::Failed(reason) => {
                failed += 1;
                log::error!("\x1b[31m[failed]\x1b[0m {reason}");
            }
        }
    }

    if failed == 0 {
        exit_qemu(QemuExitCode::Success)
    } else {
        log::error!("{failed} tests failed");
        exit_qemu(QemuExitCode::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    use x86_64::instructions::port::Port;

    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    kernel::hlt_loop();
}

/// Busy-wait on the wall clock without giving up the CPU (used to burn a
/// task's quantum down).
pub fn spin_for_ms(duration: u64) {
    let start = kernel::time::ms_since_boot();
    while kernel::time::ms_since_boot() - start < duration {
        core::hint::spin_loop();
    }
}

/// Wait for `condition` to become true, yielding between polls.
pub fn wait_for(timeout_ms: u64, condition: impl Fn() -> bool) -> bool {
    let start = kernel::time::ms_since_boot();
    while kernel::time::ms_since_boot() - start < timeout_ms {
        if condition() {
            return true;
        }
        kernel::task::scheduler::task_switch();
    }
    condition()
}
