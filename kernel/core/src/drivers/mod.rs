//! Input drivers. IRQ handlers only touch fixed ring buffers; a dedicated
//! forwarder task drains them into AMC so no allocation ever happens in
//! interrupt context.

use crate::amc;
use crate::task::scheduler::{
    current_task, task_switch, tasking_park_task, tasking_unblock_task_with_reason,
};
use crate::task::task::{Task, TaskStatus, UnblockReason};
use alloc::sync::Arc;
use kernel_api_types::amc::{AWM_SERVICE_NAME, KB_DRIVER_SERVICE_NAME, MOUSE_DRIVER_SERVICE_NAME};
use spin::Mutex;
use x86_64::instructions::interrupts;

pub mod keyboard;
pub mod mouse;

/// The forwarder task, parked here while both rings are empty. Only ever
/// written with interrupts disabled.
static INPUT_WAITER: Mutex<Option<Arc<Task>>> = Mutex::new(None);

/// Called from the IRQ handlers after pushing into a ring.
pub(crate) fn wake_input_forwarder() {
    if let Some(task) = INPUT_WAITER.lock().take() {
        tasking_unblock_task_with_reason(&task, UnblockReason::IrqReady);
    }
}

/// Drains both input rings into AMC, parking in `IrqWait` when idle.
pub extern "sysv64" fn input_forwarder_task(_: u64, _: u64, _: u64) -> ! {
    loop {
        let mut forwarded = false;
        while let Some(event) = keyboard::pop_event() {
            amc::message_send_from(
                KB_DRIVER_SERVICE_NAME,
                AWM_SERVICE_NAME,
                amc::struct_as_bytes(&event),
            );
            forwarded = true;
        }
        while let Some(packet) = mouse::pop_packet() {
            amc::message_send_from(
                MOUSE_DRIVER_SERVICE_NAME,
                AWM_SERVICE_NAME,
                amc::struct_as_bytes(&packet),
            );
            forwarded = true;
        }
        if forwarded {
            continue;
        }

        let current = current_task();
        interrupts::without_interrupts(|| {
            // Park, then re-check: an IRQ firing after the check but before
            // the switch below finds the waiter set and re-wakes us
            if keyboard::has_pending() || mouse::has_pending() {
                return;
            }
            *INPUT_WAITER.lock() = Some(current.clone());
            tasking_park_task(&current, TaskStatus::IrqWait, None);
        });
        if current.status.load(core::sync::atomic::Ordering::Acquire) == TaskStatus::IrqWait {
            task_switch();
        }
    }
}
