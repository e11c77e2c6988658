//! Boot image for the in-QEMU kernel test suite: the normal BSP bring-up,
//! then a test-runner task instead of AWM.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod boot {
    use core::sync::atomic::{AtomicBool, Ordering};
    use kernel::limine_requests::{BASE_REVISION, MEMORY_MAP_REQUEST, RSDP_REQUEST};
    use kernel::memory::address_space::AddressSpace;
    use kernel::memory::cpu_local_data::{get_local, mark_current_cpu_ready};
    use kernel::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
    use kernel::task::{reaper, scheduler};
    use kernel::{acpi_tables, apic, gdt, interrupt, logger, syscall, time};
    use tests::{QemuExitCode, exit_qemu};

    #[unsafe(no_mangle)]
    unsafe extern "C" fn kernel_main() -> ! {
        assert!(BASE_REVISION.is_supported());

        logger::init().unwrap();
        log::info!("kernel test image booting");

        let memory_map = MEMORY_MAP_REQUEST.get_response().unwrap();
        unsafe { kernel::memory::init_bsp(memory_map) };
        unsafe { kernel::memory::cpu_local_data::init_bsp() };

        GuardedStack::new_kernel(
            NORMAL_STACK_SIZE,
            StackId {
                _type: StackType::Normal,
                cpu_id: get_local().kernel_id,
            },
        )
        .switch(init_bsp);

        kernel::hlt_loop();
    }

    extern "sysv64" fn init_bsp() -> ! {
        gdt::init();
        interrupt::pic::remap_and_mask_all();
        interrupt::idt::init();

        let rsdp = RSDP_REQUEST.get_response().unwrap();
        let tables = acpi_tables::parse(rsdp);
        apic::init_bsp(&tables);
        apic::init_local_apic();

        time::init();
        time::lapic_timer::init();

        interrupt::register_interrupt_handler(
            u8::from(interrupt::InterruptVector::LocalApicTimer),
            interrupt::handlers::lapic_timer_handler,
        );
        interrupt::register_interrupt_handler(
            u8::from(interrupt::InterruptVector::Reschedule),
            interrupt::handlers::reschedule_ipi_handler,
        );
        syscall::init();

        scheduler::init_cpu(AddressSpace::kernel_base());

        scheduler::task_spawn("reaper", reaper::reaper_task);
        scheduler::task_spawn("test-runner", test_runner_task);

        // The suite runs single-CPU: APs stay parked so scheduling
        // assertions see deterministic queue movement

        mark_current_cpu_ready();
        scheduler::enter_scheduler();
    }

    extern "sysv64" fn test_runner_task(_: u64, _: u64, _: u64) -> ! {
        tests::run_tests()
    }

    static DID_PANIC: AtomicBool = AtomicBool::new(false);

    #[panic_handler]
    fn rust_panic(info: &core::panic::PanicInfo) -> ! {
        if !DID_PANIC.swap(true, Ordering::Relaxed) {
            log::error!("TEST IMAGE PANIC: {info}");
        }
        exit_qemu(QemuExitCode::Failed)
    }
}
