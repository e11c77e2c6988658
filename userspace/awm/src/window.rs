//! The window model: decorated frames over client-shared content buffers,
//! two draw lists (z-ordered user windows, pinned overlays), and the
//! drawable-region bookkeeping the compositor consumes.

use crate::animations::Animation;
use crate::compositor::update_occlusions;
use crate::desktop::{Desktop, ViewHandle};
use crate::layer::{Color, Layer, blit_layer};
use crate::{
    CLOSE_WINDOW_ANIMATION_MS, DOCK_HEIGHT, MINIMIZE_WINDOW_ANIMATION_MS,
    OPEN_WINDOW_ANIMATION_MS, UNMINIMIZE_WINDOW_ANIMATION_MS, WINDOW_BORDER_MARGIN,
    WINDOW_TITLE_BAR_HEIGHT,
};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_8X13;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::text::Text;
use embedded_graphics::Drawable;
use kernel_api_types::amc::{
    AMC_REGISTER_NOTIFICATION_SERVICE_DIED, AMC_SHARED_MEMORY_CREATE_RESPONSE,
    AMC_SHARED_MEMORY_CREATE_REQUEST, AmcNotifyWhenServiceDies, AmcSharedMemoryCreateRequest,
    AmcSharedMemoryCreateResponse, AWM_DOCK_SERVICE_NAME, CORE_SERVICE_NAME, service_name_buf,
};
use kernel_api_types::awm::{
    AWM_CREATE_WINDOW_RESPONSE, AWM_DOCK_WINDOW_CREATED, AWM_DOCK_WINDOW_MINIMIZE_REQUESTED,
    AWM_DOCK_WINDOW_TITLE_UPDATED, AWM_KEY_DOWN, AWM_KEY_UP, AWM_MOUSE_ENTERED, AWM_MOUSE_EXITED,
    AWM_MOUSE_LEFT_CLICK, AWM_MOUSE_LEFT_CLICK_ENDED, AWM_MOUSE_MOVED, AWM_WINDOW_RESIZED,
    AwmCreateWindowResponse, AwmDockTaskViewClicked, AwmDockWindowCreated,
    AwmDockWindowMinimizeRequested, AwmDockWindowMinimizeWithInfo, AwmDockWindowTitleUpdated,
    AwmMouseLeftClick, AwmWindowResized, AwmWindowTitle, WindowId, title_buf, title_from_buf,
};
use kernel_api_types::geometry::{Point, Rect, Size};

pub struct UserWindow {
    pub id: WindowId,
    pub owner_service: String,
    pub title: String,
    /// Outer frame in screen coordinates.
    pub frame: Rect,
    /// Full-screen-sized compositing surface; decorations and fetched
    /// content are rendered here.
    pub layer: Layer,
    /// Content sub-frame in window coordinates.
    pub content_view_frame: Rect,
    /// The client's shared framebuffer, also pre-sized to the whole screen
    /// so resizing never reallocates.
    pub content_layer: Layer,

    pub drawable_rects: Vec<Rect>,
    pub extra_draws_this_cycle: Vec<Rect>,

    pub has_done_first_draw: bool,
    pub remote_process_died: bool,
    pub has_title_bar: bool,
    pub is_movable: bool,
    pub is_resizable: bool,
    pub is_minimized: bool,
    pub is_mouse_within_content_view: bool,

    /// Button hit areas in window coordinates, cached by the title-bar
    /// renderer.
    pub close_button_frame: Rect,
    pub minimize_button_frame: Rect,

    /// Frame to restore on unminimize, and the content snapshot shown in
    /// dock previews.
    pub unminimized_frame: Rect,
    pub unminimized_snapshot: Option<Layer>,
}

impl UserWindow {
    /// Content-view frame for a window of the given outer size.
    pub fn content_frame_for_size(size: Size, has_title_bar: bool) -> Rect {
        if has_title_bar {
            Rect::from_parts(
                WINDOW_BORDER_MARGIN,
                WINDOW_TITLE_BAR_HEIGHT,
                size.width - WINDOW_BORDER_MARGIN * 2,
                size.height - WINDOW_BORDER_MARGIN - WINDOW_TITLE_BAR_HEIGHT,
            )
        } else {
            Rect::from_parts(
                WINDOW_BORDER_MARGIN,
                0,
                size.width - WINDOW_BORDER_MARGIN * 2,
                size.height - WINDOW_BORDER_MARGIN,
            )
        }
    }

    pub fn title_bar_frame(&self) -> Rect {
        Rect::from_parts(0, 0, self.frame.size.width, WINDOW_TITLE_BAR_HEIGHT)
    }
}

// Client event forwarding; a dead remote silently drops at the AMC layer,
// but the flag spares the traffic.

pub fn window_send_event(window: &UserWindow, event: u32) {
    if !window.remote_process_died {
        ulib::amc::send_event(&window.owner_service, event);
    }
}

pub fn window_handle_mouse_entered(window: &UserWindow) {
    window_send_event(window, AWM_MOUSE_ENTERED);
}

pub fn window_handle_mouse_exited(window: &UserWindow) {
    window_send_event(window, AWM_MOUSE_EXITED);
}

pub fn window_handle_mouse_moved(window: &UserWindow, mouse_within_window: Point) {
    if window.content_view_frame.contains_point(mouse_within_window) {
        let p = mouse_within_window.translate(window.content_view_frame);
        ulib::amc::send_event_u32_2(&window.owner_service, AWM_MOUSE_MOVED, p.x as u32, p.y as u32);
    }
}

pub fn window_handle_left_click(window: &UserWindow, mouse_within_window: Point) {
    if window.content_view_frame.contains_point(mouse_within_window) {
        let msg = AwmMouseLeftClick {
            event: AWM_MOUSE_LEFT_CLICK,
            click_point: mouse_within_window.translate(window.content_view_frame),
        };
        ulib::amc::send_struct(&window.owner_service, &msg);
    }
}

pub fn window_handle_left_click_ended(window: &UserWindow, mouse_within_window: Point) {
    if window.content_view_frame.contains_point(mouse_within_window) {
        let p = mouse_within_window.translate(window.content_view_frame);
        ulib::amc::send_event_u32_2(
            &window.owner_service,
            AWM_MOUSE_LEFT_CLICK_ENDED,
            p.x as u32,
            p.y as u32,
        );
    }
}

pub fn window_handle_keyboard_event(window: &UserWindow, pressed: bool, key: u32) {
    let event = if pressed { AWM_KEY_DOWN } else { AWM_KEY_UP };
    ulib::amc::send_event_u32_2(&window.owner_service, event, key, 0);
}

// Pure z-order helpers over an id list; index 0 is front-most.

pub fn z_order_move_to_front(z_order: &mut Vec<WindowId>, id: WindowId) -> bool {
    let Some(pos) = z_order.iter().position(|&candidate| candidate == id) else {
        return false;
    };
    z_order.remove(pos);
    z_order.insert(0, id);
    true
}

pub fn z_order_top(z_order: &[WindowId]) -> Option<WindowId> {
    z_order.first().copied()
}

pub fn z_order_bottom(z_order: &[WindowId]) -> Option<WindowId> {
    z_order.last().copied()
}

impl Desktop {
    pub fn window_is_in_z_order(&self, id: WindowId) -> bool {
        self.windows_with_z_order.contains(&id)
    }

    /// Raise a z-ordered window; overlays are not reorderable. Every view
    /// the window intersects gets its visible region recomputed.
    pub fn window_move_to_top(&mut self, id: WindowId) {
        if !z_order_move_to_front(&mut self.windows_with_z_order, id) {
            log::info!("window {id} is outside the z-order hierarchy; ignoring move-to-top");
            return;
        }
        let frame = self.view_frame(ViewHandle::Window(id));
        self.invalidate_drawable_regions_in_rect(frame);
        self.compositor.queue_rect(frame);
    }

    pub fn windows_get_top_window(&self) -> Option<WindowId> {
        z_order_top(&self.windows_with_z_order)
    }

    pub fn windows_get_bottom_window(&self) -> Option<WindowId> {
        z_order_bottom(&self.windows_with_z_order)
    }

    /// Hit-test: overlays first, then z-ordered windows front to back.
    /// Minimized and (optionally) dead windows pass clicks through.
    pub fn window_containing_point(&self, point: Point, ignore_zombies: bool) -> Option<WindowId> {
        let candidates = self
            .windows_without_z_order
            .iter()
            .chain(self.windows_with_z_order.iter());
        for &id in candidates {
            let Some(window) = self.window_with_id(id) else {
                continue;
            };
            if ignore_zombies && window.remote_process_died {
                continue;
            }
            if window.is_minimized {
                continue;
            }
            if window.frame.contains_point(point) {
                return Some(id);
            }
        }
        None
    }

    /// Create a window for `owner_service`: subscribe to the service's
    /// death, set up the screen-sized shared framebuffer, reply with the
    /// buffer, and play the open animation. The dock is recognised by name
    /// and pinned as an overlay instead.
    pub fn window_create(&mut self, owner_service: &str, request_size: Size) -> WindowId {
        // Find out when this process dies so the window can be torn down
        let death_sub = AmcNotifyWhenServiceDies {
            event: AMC_REGISTER_NOTIFICATION_SERVICE_DIED,
            remote_service: service_name_buf(owner_service),
        };
        ulib::amc::send_struct(CORE_SERVICE_NAME, &death_sub);

        // The shared buffer covers the whole screen so future resizes never
        // need a fresh handshake
        let resolution = self.screen.resolution;
        let shmem_size =
            (resolution.width * resolution.height) as u32 * self.screen.bytes_per_pixel;
        let shmem_request = AmcSharedMemoryCreateRequest {
            event: AMC_SHARED_MEMORY_CREATE_REQUEST,
            remote_service: service_name_buf(owner_service),
            buffer_size: shmem_size,
        };
        ulib::amc::send_struct(CORE_SERVICE_NAME, &shmem_request);
        let response =
            ulib::amc::message_await_event(CORE_SERVICE_NAME, AMC_SHARED_MEMORY_CREATE_RESPONSE);
        let shmem: AmcSharedMemoryCreateResponse =
            response.body_as().expect("malformed shared memory response");

        let id = self.next_window_id;
        self.next_window_id += 1;

        let is_dock = owner_service == AWM_DOCK_SERVICE_NAME;
        let origin = Point::new(
            resolution.width / 2 - request_size.width / 2,
            (resolution.height - DOCK_HEIGHT) / 2 - request_size.height / 2,
        );
        let content_layer =
            unsafe { Layer::from_raw(shmem.local_buffer_start as *mut u32, resolution) };

        let mut window = UserWindow {
            id,
            owner_service: String::from(owner_service),
            title: String::from(owner_service),
            frame: Rect::new(origin, Size::zero()),
            layer: Layer::new(resolution),
            content_view_frame: Rect::zero(),
            content_layer,
            drawable_rects: Vec::new(),
            extra_draws_this_cycle: Vec::new(),
            has_done_first_draw: false,
            remote_process_died: false,
            has_title_bar: !is_dock,
            is_movable: !is_dock,
            is_resizable: !is_dock,
            is_minimized: false,
            is_mouse_within_content_view: false,
            close_button_frame: Rect::zero(),
            minimize_button_frame: Rect::zero(),
            unminimized_frame: Rect::zero(),
            unminimized_snapshot: None,
        };

        let open_animation = if is_dock {
            let initial = Rect::from_parts(0, resolution.height, resolution.width, DOCK_HEIGHT);
            let dest = Rect::from_parts(
                0,
                resolution.height - DOCK_HEIGHT,
                resolution.width,
                DOCK_HEIGHT,
            );
            window.frame = initial;
            Animation::open_window(OPEN_WINDOW_ANIMATION_MS, id, initial, dest)
        } else {
            // The outer frame is a little bigger than the client asked for,
            // to hold the decorations
            let full_size = Size::new(
                request_size.width + WINDOW_BORDER_MARGIN * 2,
                request_size.height + WINDOW_TITLE_BAR_HEIGHT + WINDOW_BORDER_MARGIN,
            );
            let initial = open_animation_origin_frame(resolution);
            window.frame = initial;
            Animation::open_window(
                OPEN_WINDOW_ANIMATION_MS,
                id,
                initial,
                Rect::new(origin, full_size),
            )
        };

        self.windows.push(window);
        if is_dock {
            self.windows_without_z_order.push(id);
        } else {
            self.windows_with_z_order.insert(0, id);
        }

        // Hand the client its framebuffer
        let create_response = AwmCreateWindowResponse {
            event: AWM_CREATE_WINDOW_RESPONSE,
            screen_resolution: resolution,
            bytes_per_pixel: self.screen.bytes_per_pixel,
            framebuffer: shmem.remote_buffer_start,
        };
        ulib::amc::send_struct(owner_service, &create_response);

        self.animation_start(open_animation);

        if !is_dock {
            let (title, title_len) = title_buf(owner_service);
            let dock_event = AwmDockWindowCreated {
                event: AWM_DOCK_WINDOW_CREATED,
                window_id: id,
                title_len,
                title,
            };
            ulib::amc::send_struct(AWM_DOCK_SERVICE_NAME, &dock_event);
        }

        log::info!("created window {id} for [{owner_service}]");
        id
    }

    /// Remove the window everywhere and repaint what it covered.
    pub fn window_destroy(&mut self, id: WindowId) {
        let Some(pos) = self.windows.iter().position(|window| window.id == id) else {
            return;
        };
        let frame = self.windows[pos].frame;

        self.windows_with_z_order.retain(|&candidate| candidate != id);
        self.windows_without_z_order.retain(|&candidate| candidate != id);
        self.windows_to_fetch_this_cycle.retain(|&candidate| candidate != id);
        self.views_to_composite_this_cycle
            .retain(|&handle| handle != ViewHandle::Window(id));
        if self.mouse.active_window == Some(id) {
            self.mouse.active_window = None;
        }
        // Layers (and the shared-memory view) die with the struct
        self.windows.remove(pos);

        self.invalidate_drawable_regions_in_rect(frame);
        self.compositor.queue_rect(frame);
    }

    /// Resize the outer frame, recompute decorations, and optionally tell
    /// the client its content area changed.
    pub fn window_resize(&mut self, id: WindowId, new_size: Size, inform_owner: bool) {
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        let original_frame = window.frame;
        window.frame.size = new_size;
        window.content_view_frame =
            UserWindow::content_frame_for_size(new_size, window.has_title_bar);
        let owner = window.owner_service.clone();
        let content_size = window.content_view_frame.size;
        let remote_died = window.remote_process_died;
        let new_frame = window.frame;

        if self.window_with_id(id).is_some_and(|w| w.has_title_bar) {
            self.window_redraw_title_bar(id, false, false, false);
        }

        self.compositor.queue_rect_difference(original_frame, new_frame);
        self.invalidate_drawable_regions_in_rect(original_frame.union(new_frame));

        if inform_owner && !remote_died {
            let msg = AwmWindowResized {
                event: AWM_WINDOW_RESIZED,
                new_size: content_size,
            };
            ulib::amc::send_struct(&owner, &msg);
        }
    }

    /// Re-render the title bar with hover-dependent button states and cache
    /// the button hit areas.
    pub fn window_redraw_title_bar(
        &mut self,
        id: WindowId,
        title_bar_active: bool,
        close_button_active: bool,
        minimize_button_active: bool,
    ) {
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        if !window.has_title_bar {
            return;
        }

        let title_bar_frame = window.title_bar_frame();
        window
            .layer
            .fill_rect(title_bar_frame, Color::new(0xc8, 0xc8, 0xce));
        if title_bar_active {
            window
                .layer
                .draw_rect_outline(title_bar_frame, Color::new(0xe8, 0xe8, 0xe8));
        }

        let icon_edge = 12;
        let icon_y = (WINDOW_TITLE_BAR_HEIGHT - icon_edge) / 2;
        window.close_button_frame =
            Rect::from_parts(icon_edge + icon_edge / 2, icon_y, icon_edge, icon_edge);
        window.minimize_button_frame =
            Rect::from_parts(icon_edge * 3, icon_y, icon_edge, icon_edge);

        let close_color = if close_button_active {
            Color::new(0xe3, 0x3e, 0x32)
        } else {
            Color::new(0x9a, 0x9a, 0x9a)
        };
        let minimize_color = if minimize_button_active {
            Color::new(0xe8, 0xa0, 0x2d)
        } else {
            Color::new(0x9a, 0x9a, 0x9a)
        };
        let close_frame = window.close_button_frame;
        let minimize_frame = window.minimize_button_frame;
        window.layer.fill_rect(close_frame, close_color);
        window.layer.fill_rect(minimize_frame, minimize_color);

        // Centered title text
        let title_len = window.title.len() as i32;
        let char_width = 8;
        let text_origin = Point::new(
            window.frame.size.width / 2 - (title_len * char_width) / 2,
            WINDOW_TITLE_BAR_HEIGHT / 2 + 4,
        );
        let style = MonoTextStyle::new(&FONT_8X13, Rgb888::new(0x32, 0x32, 0x32));
        let title = window.title.clone();
        let _ = Text::new(
            &title,
            embedded_graphics::geometry::Point::new(text_origin.x, text_origin.y),
            style,
        )
        .draw(&mut window.layer);

        let frame_origin = window.frame.origin;
        let bar_size = Size::new(window.frame.size.width, WINDOW_TITLE_BAR_HEIGHT);
        self.compositor.queue_rect(Rect::new(frame_origin, bar_size));
    }

    /// Copy the client's shared buffer into the compositing layer. Skipped
    /// for dead and minimized windows.
    fn window_fetch_framebuf(&mut self, id: WindowId) {
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        if window.remote_process_died || window.is_minimized {
            return;
        }
        window.has_done_first_draw = true;
        let content_frame = window.content_view_frame;
        // Split borrow: the compositing layer and the shared content layer
        // are different fields
        let UserWindow {
            layer,
            content_layer,
            ..
        } = window;
        blit_layer(
            layer,
            content_layer,
            content_frame,
            Rect::new(Point::zero(), content_frame.size),
        );
    }

    pub fn window_queue_fetch(&mut self, id: WindowId) {
        if !self.windows_to_fetch_this_cycle.contains(&id) {
            self.windows_to_fetch_this_cycle.push(id);
        }
        self.queue_composite(ViewHandle::Window(id));
    }

    pub fn windows_fetch_queued_windows(&mut self) {
        let queued = core::mem::take(&mut self.windows_to_fetch_this_cycle);
        for id in &queued {
            self.window_fetch_framebuf(*id);
        }
        self.windows_to_fetch_this_cycle = queued;
    }

    pub fn views_flush_queues(&mut self) {
        self.windows_to_fetch_this_cycle.clear();
        self.views_to_composite_this_cycle.clear();
        for window in &mut self.windows {
            window.extra_draws_this_cycle.clear();
        }
        for shortcut in &mut self.shortcuts {
            shortcut.view.extra_draws_this_cycle.clear();
        }
        if let Some(view) = self.minimized_preview.as_mut() {
            view.extra_draws_this_cycle.clear();
        }
    }

    /// Recompute the visible-rect set of every view intersecting `rect`:
    /// reset to the full frame, then subtract each in-front view's frame.
    pub fn invalidate_drawable_regions_in_rect(&mut self, rect: Rect) {
        let order = self.draw_order();
        for i in (0..order.len()).rev() {
            let frame = self.view_frame(order[i]);
            if !frame.intersects(rect) {
                continue;
            }

            let mut drawable_rects = vec![frame];
            for occluder in order[..i].iter() {
                let occluder_frame = self.view_frame(*occluder);
                if !occluder_frame.intersects(frame) {
                    continue;
                }
                drawable_rects = update_occlusions(drawable_rects, occluder_frame);
                if drawable_rects.is_empty() {
                    break;
                }
            }

            let fully_occluded = drawable_rects.is_empty();
            self.set_view_drawable_rects(order[i], drawable_rects);
            if !fully_occluded {
                self.queue_composite(order[i]);
            }
        }
    }

    pub fn set_view_drawable_rects(&mut self, handle: ViewHandle, rects: Vec<Rect>) {
        match handle {
            ViewHandle::Window(id) => {
                if let Some(window) = self.window_with_id_mut(id) {
                    window.drawable_rects = rects;
                }
            }
            ViewHandle::Shortcut(idx) => {
                self.shortcuts[idx].view.drawable_rects = rects;
            }
            ViewHandle::MinimizedPreview => {
                if let Some(view) = self.minimized_preview.as_mut() {
                    view.drawable_rects = rects;
                }
            }
        }
    }

    // --- Minimize / unminimize (driven by the dock) ---

    /// Close/minimize buttons route through the dock so it can hand back
    /// the task-view frame to animate towards.
    pub fn window_initiate_minimize(&mut self, id: WindowId) {
        let msg = AwmDockWindowMinimizeRequested {
            event: AWM_DOCK_WINDOW_MINIMIZE_REQUESTED,
            window_id: id,
        };
        ulib::amc::send_struct(AWM_DOCK_SERVICE_NAME, &msg);
    }

    pub fn window_minimize_from_message(&mut self, msg: &AwmDockWindowMinimizeWithInfo) {
        let screen_height = self.screen.resolution.height;
        let Some(window) = self.window_with_id_mut(msg.window_id) else {
            log::info!("no window found with id {}", msg.window_id);
            return;
        };
        if window.is_minimized {
            return;
        }

        window.is_minimized = true;
        window.unminimized_frame = window.frame;
        let snapshot_frame = Rect::new(Point::zero(), window.frame.size);
        window.unminimized_snapshot = Some(window.layer.snapshot(snapshot_frame));

        let original_frame = window.frame;
        let dest_frame = Rect::new(
            Point::new(msg.task_view_frame.min_x(), screen_height),
            msg.task_view_frame.size,
        );
        self.animation_start(Animation::minimize_window(
            MINIMIZE_WINDOW_ANIMATION_MS,
            msg.window_id,
            original_frame,
            dest_frame,
        ));

        // Mouse control passes to whatever is behind the minimized window
        self.mouse_recompute_status();
    }

    pub fn window_unminimize_from_message(&mut self, msg: &AwmDockTaskViewClicked) {
        let Some(window) = self.window_with_id_mut(msg.window_id) else {
            return;
        };
        if !window.is_minimized {
            return;
        }
        window.is_minimized = false;
        window.unminimized_snapshot = None;
        let current_frame = window.frame;
        let dest_frame = window.unminimized_frame;

        // The hover preview is stale the moment the restore begins
        self.minimized_preview_clear();

        // Unminimized windows always land on top
        self.window_move_to_top(msg.window_id);
        self.animation_start(Animation::unminimize_window(
            UNMINIMIZE_WINDOW_ANIMATION_MS,
            msg.window_id,
            current_frame,
            dest_frame,
        ));
    }

    /// Show a scaled snapshot of a minimized window above the dock while
    /// its task view is hovered.
    pub fn minimized_preview_display(&mut self, id: WindowId, task_view_frame: Rect) {
        let Some(window) = self.window_with_id(id) else {
            log::info!("no window found with id {id}");
            return;
        };
        if !window.is_minimized {
            return;
        }
        let Some(snapshot) = window.unminimized_snapshot.as_ref() else {
            return;
        };

        const PREVIEW_SIZE: Size = Size::new(240, 180);
        const PREVIEW_INSET: i32 = 4;
        let frame = self.rect_bind_to_screen_frame(Rect::new(
            Point::new(
                task_view_frame.min_x(),
                self.screen.resolution.height - DOCK_HEIGHT - PREVIEW_SIZE.height - 10,
            ),
            PREVIEW_SIZE,
        ));

        let mut view = crate::shortcuts::View::new(frame);
        view.layer.fill(Color::new(0x20, 0x26, 0x30));
        crate::layer::blit_layer_scaled(
            &mut view.layer,
            snapshot,
            Rect::new(Point::zero(), PREVIEW_SIZE).inset_by(PREVIEW_INSET, PREVIEW_INSET),
            snapshot.frame(),
        );
        view.layer.draw_rect_outline(
            Rect::new(Point::zero(), PREVIEW_SIZE),
            Color::new(0x78, 0x84, 0x96),
        );

        self.minimized_preview = Some(view);
        self.invalidate_drawable_regions_in_rect(frame);
        self.queue_composite(ViewHandle::MinimizedPreview);
        self.compositor.queue_rect(frame);
    }

    pub fn minimized_preview_clear(&mut self) {
        let Some(view) = self.minimized_preview.take() else {
            return;
        };
        self.views_to_composite_this_cycle
            .retain(|&handle| handle != ViewHandle::MinimizedPreview);
        self.invalidate_drawable_regions_in_rect(view.frame);
        self.compositor.queue_rect(view.frame);
    }

    // --- Title updates ---

    pub fn update_window_title(&mut self, owner_service: &str, msg: &AwmWindowTitle) {
        let Some(id) = self.window_id_for_service(owner_service) else {
            log::info!("failed to find a window for [{owner_service}]");
            return;
        };
        let title = String::from(title_from_buf(&msg.title, msg.len));
        if let Some(window) = self.window_with_id_mut(id) {
            window.title = title.clone();
        }
        let size = self.window_with_id(id).map(|window| window.frame.size).unwrap();
        self.window_resize(id, size, false);

        let (title_wire, title_len) = title_buf(&title);
        let dock_msg = AwmDockWindowTitleUpdated {
            event: AWM_DOCK_WINDOW_TITLE_UPDATED,
            window_id: id,
            title_len,
            title: title_wire,
        };
        ulib::amc::send_struct(AWM_DOCK_SERVICE_NAME, &dock_msg);
    }

    /// A client asked to close, or its service died: play the close
    /// animation, which destroys the window when it lands.
    pub fn window_begin_close(&mut self, owner_service: &str) {
        let Some(id) = self.window_id_for_service(owner_service) else {
            return;
        };
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        // Already being torn down; don't restart the animation
        if window.remote_process_died {
            return;
        }
        window.remote_process_died = true;
        let original_frame = window.frame;

        if self.mouse.active_window == Some(id) {
            self.mouse.active_window = None;
        }

        let dest_frame = close_animation_destination_frame(self.screen.resolution);
        self.animation_start(Animation::close_window(
            CLOSE_WINDOW_ANIMATION_MS,
            id,
            original_frame,
            dest_frame,
        ));
    }
}

/// Open animations grow out of a small rect at the bottom-centre of the
/// screen; close animations shrink back into it.
pub fn open_animation_origin_frame(resolution: Size) -> Rect {
    let size = Size::new(resolution.height / 10, resolution.width / 10);
    Rect::new(
        Point::new(
            resolution.width / 2 - size.width / 2,
            resolution.height - size.height,
        ),
        size,
    )
}

pub fn close_animation_destination_frame(resolution: Size) -> Rect {
    open_animation_origin_frame(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_to_front_reorders() {
        let mut z_order = vec![10, 20, 30];
        assert!(z_order_move_to_front(&mut z_order, 30));
        assert_eq!(z_order, vec![30, 10, 20]);
        assert_eq!(z_order_top(&z_order), Some(30));
        assert_eq!(z_order_bottom(&z_order), Some(20));
    }

    #[test]
    fn move_to_front_of_absent_id_is_rejected() {
        let mut z_order = vec![1, 2];
        assert!(!z_order_move_to_front(&mut z_order, 99));
        assert_eq!(z_order, vec![1, 2]);
    }

    #[test]
    fn content_frame_accounts_for_decorations() {
        let with_bar = UserWindow::content_frame_for_size(Size::new(400, 300), true);
        assert_eq!(with_bar.min_y(), WINDOW_TITLE_BAR_HEIGHT);
        assert_eq!(with_bar.size.width, 400 - WINDOW_BORDER_MARGIN * 2);
        assert_eq!(
            with_bar.size.height,
            300 - WINDOW_TITLE_BAR_HEIGHT - WINDOW_BORDER_MARGIN
        );

        let without_bar = UserWindow::content_frame_for_size(Size::new(400, 300), false);
        assert_eq!(without_bar.min_y(), 0);
        assert_eq!(without_bar.size.height, 300 - WINDOW_BORDER_MARGIN);
    }

    #[test]
    fn open_animation_starts_at_bottom_centre() {
        let resolution = Size::new(1920, 1080);
        let frame = open_animation_origin_frame(resolution);
        assert_eq!(frame.mid_x(), resolution.width / 2);
        assert_eq!(frame.max_y(), resolution.height);
    }
}
