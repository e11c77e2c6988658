use crate::interrupt::{HandlerResult, RegisterFrame};
use crate::memory::cpu_local_data::get_local;
use crate::memory::guarded_stack::STACK_GUARD_PAGES;
use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};

pub static TIMER_INTERRUPT_COUNT: AtomicU64 = AtomicU64::new(0);

// CPU-fault policy: dump state and halt. Translating user-mode faults into
// task termination is unresolved; see DESIGN.md.

pub extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    panic!("Divide error! Stack frame: {stack_frame:#?}");
}

pub extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("Invalid opcode! Stack frame: {stack_frame:#?}");
}

pub extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::info!("Breakpoint! Stack frame: {stack_frame:#?}");
}

pub extern "x86-interrupt" fn nmi_handler(stack_frame: InterruptStackFrame) {
    log::error!("Non-maskable interrupt! Stack frame: {stack_frame:#?}");
}

pub extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let accessed_address = Cr2::read_raw();
    log::error!(
        "Page fault at {:#x}, error: {error_code:#?}, ip: {:#x}",
        accessed_address,
        stack_frame.instruction_pointer.as_u64()
    );
    let accessed_address = x86_64::VirtAddr::new(accessed_address);
    if let Some(stack) = STACK_GUARD_PAGES.lock().iter().find_map(|(page, stack_id)| {
        if accessed_address.align_down(4096u64) == page.start_address() {
            Some(*stack_id)
        } else {
            None
        }
    }) {
        panic!("Stack overflow: {stack:#X?}");
    } else {
        panic!(
            "Page fault! Stack frame: {stack_frame:#?}. Error code: {error_code:#?}. Accessed address: {accessed_address:?}."
        );
    }
}

pub extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!("General Protection Fault! Stack frame: {stack_frame:#?}. Error code: {error_code}.")
}

pub extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    panic!("Double Fault! Stack frame: {stack_frame:#?}. Error code: {error_code}.")
}

/// The scheduler's heartbeat. EOI is signalled up front: the tick below may
/// context-switch away and not return to this frame until the interrupted
/// task is next scheduled.
pub fn lapic_timer_handler(_frame: &mut RegisterFrame) -> HandlerResult {
    TIMER_INTERRUPT_COUNT.fetch_add(1, Ordering::Relaxed);

    let cpu = get_local();
    if let Some(local_apic) = cpu.local_apic.get() {
        unsafe { (*local_apic.get()).end_of_interrupt() };
    }

    crate::task::scheduler::timer_tick();
    HandlerResult::EoiSent
}

/// Another CPU queued work for us; the interrupt alone breaks `hlt`. Give
/// the scheduler a chance to pick the new task up immediately.
pub fn reschedule_ipi_handler(_frame: &mut RegisterFrame) -> HandlerResult {
    let cpu = get_local();
    if let Some(local_apic) = cpu.local_apic.get() {
        unsafe { (*local_apic.get()).end_of_interrupt() };
    }
    crate::task::scheduler::timer_tick();
    HandlerResult::EoiSent
}
