//! The reaper: a kernel task that frees zombie TCBs.
//!
//! Dying tasks enqueue their own TCB pointer to `com.axle.reaper` before
//! flipping to `Zombie`, so cleanup happens even if they are preempted in
//! between. Each message carries a +1 strong count on the TCB, consumed
//! here.

use crate::amc;
use crate::task::scheduler::{destroy_task, task_switch};
use crate::task::task::Task;
use alloc::sync::Arc;
use kernel_api_types::amc::{CORE_SERVICE_NAME, REAPER_SERVICE_NAME};

pub extern "sysv64" fn reaper_task(_: u64, _: u64, _: u64) -> ! {
    amc::register_service(REAPER_SERVICE_NAME).expect("reaper service name already taken");
    // Yield immediately so boot continues without waiting for preemption
    task_switch();

    loop {
        let msg = amc::message_await_any();
        if msg.source != CORE_SERVICE_NAME {
            log::warn!("reaper ignoring message from [{}]", msg.source);
            continue;
        }
        let Ok(raw) = <[u8; 8]>::try_from(msg.body.as_slice()) else {
            log::warn!("reaper ignoring malformed message ({} bytes)", msg.body.len());
            continue;
        };
        let tcb_ptr = u64::from_le_bytes(raw) as *const Task;
        // Safety: produced by Arc::into_raw in task_die; this reclaims the
        // strong count the message carried.
        let zombie = unsafe { Arc::from_raw(tcb_ptr) };
        destroy_task(zombie);
    }
}
