#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

// Only the freestanding build is a real program; host builds of the
// workspace get an empty placeholder binary.
#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod server {
use awm::desktop::Desktop;
use awm::input::CoalescedMouse;
use kernel_api_types::amc::{
    AMC_SERVICE_DIED_NOTIFICATION, AMC_FLUSH_MESSAGES_TO_SERVICE, AWM_DOCK_SERVICE_NAME,
    AWM_SERVICE_NAME, AmcFlushMessagesToService, AmcServiceDiedNotification, CORE_SERVICE_NAME,
    KB_DRIVER_SERVICE_NAME, KeyEventMsg, MOUSE_DRIVER_SERVICE_NAME, MousePacket,
    service_name_buf, service_name_from_buf,
};
use kernel_api_types::awm::{
    AWM_CLOSE_WINDOW, AWM_CREATE_WINDOW_REQUEST, AWM_DOCK_TASK_VIEW_CLICKED,
    AWM_DOCK_TASK_VIEW_HOVER_EXITED, AWM_DOCK_TASK_VIEW_HOVERED,
    AWM_DOCK_WINDOW_MINIMIZE_WITH_INFO, AWM_UPDATE_WINDOW_TITLE, AWM_WINDOW_REDRAW_READY,
    AwmCreateWindowRequest, AwmDockTaskViewClicked, AwmDockTaskViewHovered,
    AwmDockWindowMinimizeWithInfo, AwmWindowTitle,
};
use ulib::amc::AmcMessage;

#[global_allocator]
static ALLOCATOR: ulib::UserAllocator = ulib::new_allocator();

const HEAP_SIZE: u64 = 64 * 0x400 * 0x400;

#[unsafe(no_mangle)]
unsafe extern "sysv64" fn entry_point() -> ! {
    ulib::claim_heap(&ALLOCATOR, HEAP_SIZE);
    ulib::init_logger();
    ulib::amc::register_service(AWM_SERVICE_NAME);

    let mut desktop = Desktop::init();
    log::info!("awm entering event loop");
    event_loop(&mut desktop)
}

/// Block for the next message — or only until the next timer is due while
/// animations are in flight — then drain everything, dispatch timers, and
/// render one compositor frame. ~60 fps while animating, zero CPU idle.
fn event_loop(desktop: &mut Desktop) -> ! {
    loop {
        let mut should_block_indefinitely = true;
        if let Some(ms_until_timer) = desktop.ms_until_next_timer() {
            should_block_indefinitely = false;
            if ms_until_timer > 0 {
                ulib::amc::sleep_until_timestamp_or_message(ms_until_timer as u32);
            }
        }

        process_amc_messages(desktop, should_block_indefinitely);
        desktop.dispatch_ready_timers();
        desktop.compositor_render_frame();
    }
}

fn process_amc_messages(desktop: &mut Desktop, should_block: bool) {
    let mut coalesced_mouse = CoalescedMouse::default();

    if !should_block && !ulib::amc::has_message() {
        return;
    }

    loop {
        let msg = ulib::amc::message_await_any();

        // The prospective mouse flags track whatever the cursor is over now
        desktop.mouse_reset_prospective_action_flags();

        match msg.source.as_str() {
            KB_DRIVER_SERVICE_NAME => {
                if let Some(event) = msg.body_as::<KeyEventMsg>() {
                    desktop.handle_keystroke(&event);
                }
            }
            MOUSE_DRIVER_SERVICE_NAME => {
                if let Some(packet) = msg.body_as::<MousePacket>() {
                    let state_changed = desktop.apply_mouse_packet(&packet, &mut coalesced_mouse);
                    if state_changed {
                        flush_coalesced_mouse(desktop, &mut coalesced_mouse);
                    }
                }
            }
            CORE_SERVICE_NAME => handle_core_message(desktop, &msg),
            _ => handle_user_message(desktop, &msg),
        }

        if !ulib::amc::has_message() {
            break;
        }
    }

    // Whatever movement was left after the last button change
    flush_coalesced_mouse(desktop, &mut coalesced_mouse);
}

fn flush_coalesced_mouse(desktop: &mut Desktop, coalesced: &mut CoalescedMouse) {
    if coalesced.combined_msg_count == 0 {
        return;
    }
    let pos = desktop.mouse.mouse_pos;
    desktop.mouse_dispatch_events(
        coalesced.state,
        pos,
        coalesced.rel_x,
        coalesced.rel_y,
        coalesced.rel_z,
    );
    *coalesced = CoalescedMouse::default();
}

fn handle_core_message(desktop: &mut Desktop, msg: &AmcMessage) {
    match msg.event() {
        Some(AMC_SERVICE_DIED_NOTIFICATION) => {
            let Some(notification) = msg.body_as::<AmcServiceDiedNotification>() else {
                return;
            };
            let dead_service = service_name_from_buf(&notification.dead_service);
            log::info!("client [{dead_service}] died; closing its window");
            desktop.window_begin_close(dead_service);
            // Ask the kernel to drop anything we already sent the corpse
            let flush = AmcFlushMessagesToService {
                event: AMC_FLUSH_MESSAGES_TO_SERVICE,
                remote_service: service_name_buf(dead_service),
            };
            ulib::amc::send_struct(CORE_SERVICE_NAME, &flush);
        }
        other => {
            log::warn!("unknown message {other:?} from the kernel core");
        }
    }
}

fn handle_user_message(desktop: &mut Desktop, msg: &AmcMessage) {
    let Some(event) = msg.event() else {
        log::warn!("dropping runt message from [{}]", msg.source);
        return;
    };

    // The dock's control messages are not available to ordinary clients
    if msg.source == AWM_DOCK_SERVICE_NAME {
        match event {
            AWM_DOCK_WINDOW_MINIMIZE_WITH_INFO => {
                if let Some(info) = msg.body_as::<AwmDockWindowMinimizeWithInfo>() {
                    desktop.window_minimize_from_message(&info);
                }
                return;
            }
            AWM_DOCK_TASK_VIEW_CLICKED => {
                if let Some(clicked) = msg.body_as::<AwmDockTaskViewClicked>() {
                    // A minimized window restores; anything else just rises
                    if desktop
                        .window_with_id(clicked.window_id)
                        .is_some_and(|window| window.is_minimized)
                    {
                        desktop.window_unminimize_from_message(&clicked);
                    } else {
                        desktop.window_move_to_top(clicked.window_id);
                    }
                }
                return;
            }
            AWM_DOCK_TASK_VIEW_HOVERED => {
                if let Some(hovered) = msg.body_as::<AwmDockTaskViewHovered>() {
                    desktop.minimized_preview_display(hovered.window_id, hovered.task_view_frame);
                }
                return;
            }
            AWM_DOCK_TASK_VIEW_HOVER_EXITED => {
                desktop.minimized_preview_clear();
                return;
            }
            _ => {}
        }
    }

    match event {
        AWM_CREATE_WINDOW_REQUEST => {
            if let Some(request) = msg.body_as::<AwmCreateWindowRequest>() {
                desktop.window_create(&msg.source, request.window_size);
            }
        }
        AWM_WINDOW_REDRAW_READY => {
            if let Some(id) = desktop.window_id_for_service(&msg.source) {
                desktop.window_queue_fetch(id);
            }
        }
        AWM_UPDATE_WINDOW_TITLE => {
            if let Some(title) = msg.body_as::<AwmWindowTitle>() {
                desktop.update_window_title(&msg.source, &title);
            }
        }
        AWM_CLOSE_WINDOW => {
            desktop.window_begin_close(&msg.source);
        }
        unknown => {
            log::info!("unknown message {unknown} from [{}]", msg.source);
        }
    }
}

#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    ulib::default_panic(info)
}
}
