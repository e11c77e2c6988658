//! Commands addressed to `com.axle.core`. The core is not a task with an
//! inbox: commands are executed inline in the sender's context, which lets
//! the sleep command block the sender directly.

use crate::amc;
use crate::consts::FRAMEBUFFER_USER_VADDR;
use crate::limine_requests::FRAME_BUFFER_REQUEST;
use crate::memory::address_space::{SharedRegion, frames_covering};
use crate::memory::hhdm_offset::hhdm_offset;
use crate::task::task::Task;
use alloc::sync::Arc;
use kernel_api_types::amc::{
    AMC_AWM_MAP_FRAMEBUFFER, AMC_AWM_MAP_FRAMEBUFFER_RESPONSE, AMC_FLUSH_MESSAGES_TO_SERVICE,
    AMC_REGISTER_NOTIFICATION_SERVICE_DIED, AMC_SHARED_MEMORY_CREATE_REQUEST,
    AMC_SHARED_MEMORY_CREATE_RESPONSE, AMC_SLEEP_UNTIL_TIMESTAMP_OR_MESSAGE, AmcFlushMessagesToService,
    AmcFramebufferInfo, AmcNotifyWhenServiceDies, AmcSharedMemoryCreateRequest,
    AmcSharedMemoryCreateResponse, AmcSleepUntilTimestampOrMessage, service_name_from_buf,
};
use kernel_api_types::awm::event_tag;
use x86_64::PhysAddr;
use x86_64::VirtAddr;
use x86_64::structures::paging::PageTableFlags;

fn read_struct<T: Copy>(body: &[u8]) -> Option<T> {
    if body.len() < size_of::<T>() {
        return None;
    }
    Some(unsafe { core::ptr::read_unaligned(body.as_ptr() as *const T) })
}

pub fn handle(sender: &Arc<Task>, sender_service: &str, body: &[u8]) {
    let Some(event) = event_tag(body) else {
        log::warn!("core command from [{sender_service}] too short for an event tag");
        return;
    };

    match event {
        AMC_AWM_MAP_FRAMEBUFFER => map_framebuffer(sender, sender_service),
        AMC_SLEEP_UNTIL_TIMESTAMP_OR_MESSAGE => {
            let Some(msg) = read_struct::<AmcSleepUntilTimestampOrMessage>(body) else {
                return;
            };
            amc::sleep_until_timestamp_or_message(msg.delay_ms as u64);
        }
        AMC_SHARED_MEMORY_CREATE_REQUEST => {
            let Some(msg) = read_struct::<AmcSharedMemoryCreateRequest>(body) else {
                return;
            };
            shared_memory_create(sender, sender_service, &msg);
        }
        AMC_REGISTER_NOTIFICATION_SERVICE_DIED => {
            let Some(msg) = read_struct::<AmcNotifyWhenServiceDies>(body) else {
                return;
            };
            amc::notify_when_service_dies(
                sender_service,
                service_name_from_buf(&msg.remote_service),
            );
        }
        AMC_FLUSH_MESSAGES_TO_SERVICE => {
            let Some(msg) = read_struct::<AmcFlushMessagesToService>(body) else {
                return;
            };
            amc::flush_messages_to_service(
                sender_service,
                service_name_from_buf(&msg.remote_service),
            );
        }
        _ => {
            log::warn!("unknown core command {event} from [{sender_service}]");
        }
    }
}

/// The boot handshake with AWM: map the linear framebuffer into the
/// sender's address space and describe it.
fn map_framebuffer(sender: &Arc<Task>, sender_service: &str) {
    let framebuffer_response = FRAME_BUFFER_REQUEST.get_response().unwrap();
    let framebuffer = framebuffer_response
        .framebuffers()
        .next()
        .expect("no framebuffer available");

    let size = framebuffer.pitch() * framebuffer.height();
    // Limine hands out a direct-map pointer; recover the physical range
    let phys = PhysAddr::new(framebuffer.addr() as u64 - u64::from(hhdm_offset()));
    let frames = frames_covering(phys, size);
    sender
        .vas
        .map_range_exact(
            VirtAddr::new(FRAMEBUFFER_USER_VADDR),
            &frames,
            PageTableFlags::WRITE_THROUGH | PageTableFlags::NO_CACHE,
        )
        .expect("failed to map framebuffer for AWM");

    let response = AmcFramebufferInfo {
        event: AMC_AWM_MAP_FRAMEBUFFER_RESPONSE,
        address: FRAMEBUFFER_USER_VADDR,
        size,
        width: framebuffer.width() as u32,
        height: framebuffer.height() as u32,
        bytes_per_pixel: (framebuffer.bpp() / 8) as u32,
        bits_per_pixel: framebuffer.bpp() as u32,
    };
    log::info!(
        "mapped {}x{} framebuffer ({size} bytes) for [{sender_service}]",
        framebuffer.width(),
        framebuffer.height()
    );
    amc::message_send_from_core(sender_service, amc::struct_as_bytes(&response));
}

/// Create a page-rounded shared region, map it into both the requester's
/// and the remote service's address spaces, and reply with both addresses.
fn shared_memory_create(
    sender: &Arc<Task>,
    sender_service: &str,
    request: &AmcSharedMemoryCreateRequest,
) {
    let remote_name = service_name_from_buf(&request.remote_service);
    let Some(remote_task) = amc::task_of_service(remote_name) else {
        log::warn!(
            "[{sender_service}] asked for shared memory with nonexistent service [{remote_name}]"
        );
        return;
    };

    let Some(region) = SharedRegion::allocate(request.buffer_size as u64) else {
        log::error!("out of memory creating shared region for [{sender_service}]");
        return;
    };

    let local_addr = sender.vas.reserve_range(region.n_pages());
    sender
        .vas
        .map_range_exact(local_addr, region.frames(), PageTableFlags::empty())
        .expect("failed to map shared region locally");
    let remote_addr = remote_task.vas.reserve_range(region.n_pages());
    remote_task
        .vas
        .map_range_exact(remote_addr, region.frames(), PageTableFlags::empty())
        .expect("failed to map shared region remotely");

    sender.shared_regions.lock().push(region.clone());
    remote_task.shared_regions.lock().push(region);

    let response = AmcSharedMemoryCreateResponse {
        event: AMC_SHARED_MEMORY_CREATE_RESPONSE,
        local_buffer_start: local_addr.as_u64(),
        remote_buffer_start: remote_addr.as_u64(),
    };
    amc::message_send_from_core(sender_service, amc::struct_as_bytes(&response));
}
