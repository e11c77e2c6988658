#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

// The kernel image is only meaningful on the freestanding target; host
// builds of the workspace get an empty placeholder binary.
#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
extern crate alloc;
#[cfg(target_os = "none")]
extern crate kernel;

#[cfg(target_os = "none")]
mod boot {
use core::sync::atomic::{AtomicBool, Ordering};
use kernel::limine_requests::{AWM_PATH, BASE_REVISION, MEMORY_MAP_REQUEST, MP_REQUEST, RSDP_REQUEST};
use kernel::memory::address_space::AddressSpace;
use kernel::memory::cpu_local_data::{get_local, mark_current_cpu_crashed, mark_current_cpu_ready};
use kernel::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
use kernel::task::{reaper, scheduler};
use kernel::{acpi_tables, apic, drivers, gdt, hlt_loop, interrupt, logger, project_version, syscall, time, user_task_from_elf};

#[unsafe(no_mangle)]
unsafe extern "C" fn kernel_main() -> ! {
    assert!(BASE_REVISION.is_supported());

    logger::init().unwrap();
    log::info!("axle kernel booting, v{}", project_version());

    let memory_map = MEMORY_MAP_REQUEST.get_response().unwrap();
    unsafe { kernel::memory::init_bsp(memory_map) };
    unsafe { kernel::memory::cpu_local_data::init_bsp() };
    log::info!("BSP memory initialized");

    GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: get_local().kernel_id,
        },
    )
    .switch(init_bsp);

    hlt_loop();
}

/// BSP - Bootstrap Processor
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

    // IRQ handlers fill fixed rings; the forwarder task drains them into AMC
    drivers::keyboard::init();
    drivers::mouse::init();

    scheduler::task_spawn("reaper", reaper::reaper_task);
    scheduler::task_spawn("input-forwarder", drivers::input_forwarder_task);
    user_task_from_elf::spawn_from_module("awm", AWM_PATH);

    let mp_response = MP_REQUEST.get_response().unwrap();
    for cpu in mp_response.cpus() {
        if cpu.lapic_id != mp_response.bsp_lapic_id() {
            cpu.goto_address.write(ap_entry);
        }
    }

    mark_current_cpu_ready();
    log::info!("BSP entering scheduler");
    scheduler::enter_scheduler();
}

/// AP - Application processor
unsafe extern "C" fn ap_entry(cpu: &limine::mp::Cpu) -> ! {
    unsafe { kernel::memory::init_ap() };
    unsafe { kernel::memory::cpu_local_data::init_ap(cpu) };

    GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: get_local().kernel_id,
        },
    )
    .switch(init_ap);

    hlt_loop();
}

extern "sysv64" fn init_ap() -> ! {
    let cpu_id = get_local().kernel_id;
    gdt::init();
    interrupt::idt::init();
    apic::init_local_apic();
    time::lapic_timer::init();

    scheduler::init_cpu(AddressSpace::kernel_base());

    mark_current_cpu_ready();
    log::info!("AP {cpu_id} entering scheduler");
    scheduler::enter_scheduler();
}

static DID_PANIC: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    mark_current_cpu_crashed();
    if !DID_PANIC.swap(true, Ordering::Relaxed) {
        log::error!("KERNEL PANIC: {info}");
    }
    hlt_loop();
}
}
