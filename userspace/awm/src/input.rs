//! Mouse and keyboard dispatch.
//!
//! The mouse state machine tracks the hovered view, prospective
//! move/resize intent derived from the cursor position, and in-flight
//! drags; transitions forward events to clients in content-view
//! coordinates.

use crate::desktop::Desktop;
use crate::shortcuts::ShortcutClick;
use crate::window::{
    window_handle_keyboard_event, window_handle_left_click, window_handle_left_click_ended,
    window_handle_mouse_entered, window_handle_mouse_exited, window_handle_mouse_moved,
};
use crate::{CURSOR_SIZE, WINDOW_TITLE_BAR_HEIGHT};
use kernel_api_types::amc::{
    KEY_IDENT_LEFT_COMMAND, KEY_IDENT_LEFT_CONTROL, KEY_IDENT_LEFT_SHIFT, KEY_IDENT_RIGHT_SHIFT,
    KeyEventMsg, KeyEventType, MOUSE_STATUS_LEFT, MousePacket,
};
use kernel_api_types::awm::{
    AWM_CLOSE_WINDOW_REQUEST, AWM_MOUSE_DRAGGED, AWM_MOUSE_SCROLLED, AwmMouseScrolled, WindowId,
};
use kernel_api_types::geometry::{Point, Rect, Size};

/// Which edge a resize drag started from; dragging the left edge moves the
/// origin as well as growing the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowResizeEdge {
    Left,
    #[default]
    NotLeft,
}

/// Cursor must stay this far inside the content view to count as content
/// (not resize) interaction.
const RESIZE_EDGE_INSET: i32 = 8;
/// Minimum size a drag-resize may shrink a window to.
const RESIZE_MIN_SIZE: Size = Size::new(1, WINDOW_TITLE_BAR_HEIGHT + 1);

#[derive(Default)]
pub struct MouseState {
    pub left_click_down: bool,
    pub active_window: Option<WindowId>,
    pub hovered_shortcut: Option<usize>,

    // Drag state
    pub has_begun_drag: bool,
    pub is_resizing_top_window: bool,
    pub is_moving_top_window: bool,
    pub resize_edge: WindowResizeEdge,
    pub is_dragging_shortcut: bool,

    pub is_prospective_window_move: bool,
    pub is_prospective_window_resize: bool,
    pub mouse_pos: Point,
}

impl MouseState {
    pub fn new(mouse_pos: Point) -> Self {
        Self {
            mouse_pos,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct KeyboardState {
    pub is_shift_held: bool,
    pub is_command_held: bool,
    pub is_control_held: bool,
}

/// What the cursor position inside a window means for a future drag.
pub fn prospective_action_for_position(
    mouse_within_window: Point,
    window_frame: Size,
    content_view: Rect,
    is_movable: bool,
    is_resizable: bool,
) -> (bool, bool) {
    let title_bar_frame = Rect::from_parts(0, 0, window_frame.width, WINDOW_TITLE_BAR_HEIGHT);
    let content_inset = content_view.inset_by(RESIZE_EDGE_INSET, RESIZE_EDGE_INSET);
    let in_title_bar = title_bar_frame.contains_point(mouse_within_window);
    let prospective_move = in_title_bar && is_movable;
    let prospective_resize =
        !in_title_bar && !content_inset.contains_point(mouse_within_window) && is_resizable;
    (prospective_move, prospective_resize)
}

/// Clamp a drag-resize: no smaller than the decoration minimum, no larger
/// than the pre-allocated layer (the screen).
pub fn clamp_resize(new_size: Size, layer_size: Size) -> Size {
    Size::new(
        new_size.width.clamp(RESIZE_MIN_SIZE.width, layer_size.width),
        new_size.height.clamp(RESIZE_MIN_SIZE.height, layer_size.height),
    )
}

impl Desktop {
    /// Coalesced mouse update: `status` is the hardware button byte, the
    /// deltas are summed over the packets drained this pass.
    pub fn mouse_dispatch_events(
        &mut self,
        status: u8,
        mouse_point: Point,
        delta_x: i32,
        delta_y: i32,
        delta_z: i32,
    ) {
        // The cursor's previous position must be repainted under it
        self.compositor.queue_rect(Rect::new(
            self.mouse.mouse_pos,
            Size::new(CURSOR_SIZE, CURSOR_SIZE),
        ));
        self.mouse.mouse_pos = mouse_point;

        if status & MOUSE_STATUS_LEFT != 0 {
            if !self.mouse.left_click_down {
                self.begin_left_click(mouse_point);
                self.begin_mouse_drag(mouse_point);
            } else {
                self.handle_mouse_dragged(mouse_point, delta_x, delta_y);
                return;
            }
        } else if self.mouse.left_click_down {
            self.end_left_click(mouse_point);
            self.end_mouse_drag();
        }

        if delta_z != 0 {
            self.handle_mouse_scroll(delta_z);
        }

        self.handle_mouse_moved(mouse_point);
    }

    /// Re-derive hover state for the current position: run after anything
    /// that changes what sits under the cursor (minimize, unminimize,
    /// close).
    pub fn mouse_recompute_status(&mut self) {
        self.handle_mouse_moved(self.mouse.mouse_pos);
    }

    /// Refresh the prospective move/resize flags and the hover-dependent
    /// title-bar rendering. Runs once per event-loop pass.
    pub fn mouse_reset_prospective_action_flags(&mut self) {
        self.mouse.is_prospective_window_move = false;
        self.mouse.is_prospective_window_resize = false;
        let Some(id) = self.mouse.active_window else {
            return;
        };
        let Some(window) = self.window_with_id(id) else {
            return;
        };

        let mouse_within_window = self.mouse.mouse_pos.translate(window.frame);
        let (prospective_move, prospective_resize) = prospective_action_for_position(
            mouse_within_window,
            window.frame.size,
            window.content_view_frame,
            window.is_movable,
            window.is_resizable,
        );
        let has_title_bar = window.has_title_bar;
        let in_title_bar = window.title_bar_frame().contains_point(mouse_within_window);
        let over_buttons = in_title_bar
            && window
                .close_button_frame
                .union(window.minimize_button_frame)
                .contains_point(mouse_within_window);

        self.mouse.is_prospective_window_move = prospective_move;
        self.mouse.is_prospective_window_resize = prospective_resize;
        if has_title_bar {
            self.window_redraw_title_bar(id, in_title_bar, over_buttons, over_buttons);
        }
    }

    fn begin_left_click(&mut self, mouse_point: Point) {
        self.mouse.left_click_down = true;

        let Some(active) = self.mouse.active_window else {
            // Click on the background: maybe a shortcut
            if let Some(idx) = self.mouse.hovered_shortcut {
                let now = ulib::ms_since_boot();
                if self.shortcut_handle_soft_click(idx, now) == ShortcutClick::Launch {
                    self.shortcut_launch(idx);
                }
            }
            return;
        };

        // Clicking a background window promotes it
        if self.windows_get_top_window() != Some(active) && self.window_is_in_z_order(active) {
            self.window_move_to_top(active);
        }

        if let Some(window) = self.window_with_id(active) {
            let mouse_within_window = mouse_point.translate(window.frame);
            window_handle_left_click(window, mouse_within_window);
        }
    }

    fn end_left_click(&mut self, mouse_point: Point) {
        self.mouse.left_click_down = false;
        if let Some(window) = self.mouse.active_window.and_then(|id| self.window_with_id(id)) {
            let mouse_within_window = mouse_point.translate(window.frame);
            window_handle_left_click_ended(window, mouse_within_window);
        }
    }

    fn begin_mouse_drag(&mut self, mouse_point: Point) {
        self.mouse.has_begun_drag = true;
        let Some(active) = self.mouse.active_window else {
            if self.mouse.hovered_shortcut.is_some() {
                self.mouse.is_dragging_shortcut = true;
            }
            return;
        };

        let Some(window) = self.window_with_id(active) else {
            return;
        };
        let local_mouse = mouse_point.translate(window.frame);
        let close_button_frame = window.close_button_frame;
        let minimize_button_frame = window.minimize_button_frame;
        let owner_service = window.owner_service.clone();
        if self.mouse.is_prospective_window_move {
            self.mouse.is_moving_top_window = true;
            if close_button_frame.contains_point(local_mouse) {
                ulib::amc::send_event(&owner_service, AWM_CLOSE_WINDOW_REQUEST);
            } else if minimize_button_frame.contains_point(local_mouse) {
                self.window_initiate_minimize(active);
            }
        } else if self.mouse.is_prospective_window_resize {
            self.mouse.is_resizing_top_window = true;
            self.mouse.resize_edge = if local_mouse.x < 10 {
                WindowResizeEdge::Left
            } else {
                WindowResizeEdge::NotLeft
            };
        }
    }

    fn end_mouse_drag(&mut self) {
        if !self.mouse.has_begun_drag {
            return;
        }
        if self.mouse.is_dragging_shortcut {
            if let Some(idx) = self.mouse.hovered_shortcut {
                self.shortcut_snap_to_slot(idx);
            }
        }
        if self.mouse.is_resizing_top_window {
            if let Some(service) =
                self.mouse.active_window.and_then(|id| self.service_of_window(id))
            {
                ulib::amc::send_event(&service, kernel_api_types::awm::AWM_WINDOW_RESIZE_ENDED);
            }
        }
        self.mouse.has_begun_drag = false;
        self.mouse.is_moving_top_window = false;
        self.mouse.is_resizing_top_window = false;
        self.mouse.is_dragging_shortcut = false;
    }

    fn handle_mouse_dragged(&mut self, mouse_point: Point, delta_x: i32, delta_y: i32) {
        let Some(active) = self.mouse.active_window else {
            // Dragging a shortcut icon across the desktop
            if let Some(idx) = self.mouse.hovered_shortcut {
                if self.mouse.is_dragging_shortcut {
                    let original_frame = self.shortcuts[idx].view.frame;
                    let mut new_frame = original_frame;
                    new_frame.origin.x += delta_x;
                    new_frame.origin.y += delta_y;
                    let new_frame = self.rect_bind_to_screen_frame(new_frame);
                    self.shortcuts[idx].view.frame = new_frame;
                    let total = original_frame.union(new_frame);
                    self.compositor.queue_rect_difference(original_frame, new_frame);
                    self.compositor.queue_rect(new_frame);
                    self.invalidate_drawable_regions_in_rect(total);
                }
            }
            return;
        };

        if self.mouse.is_moving_top_window {
            self.adjust_window_position(active, delta_x, delta_y);
        } else if self.mouse.is_resizing_top_window {
            self.resize_window_by_drag(active, delta_x, delta_y);
        } else if let Some(window) = self.window_with_id(active) {
            // Drag within the content view is the client's business
            let local = mouse_point
                .translate(window.frame)
                .translate(window.content_view_frame);
            ulib::amc::send_event_u32_2(
                &window.owner_service,
                AWM_MOUSE_DRAGGED,
                local.x as u32,
                local.y as u32,
            );
        }
    }

    /// Translate a window by the drag delta, keeping it on-screen.
    fn adjust_window_position(&mut self, id: WindowId, delta_x: i32, delta_y: i32) {
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        let original_frame = window.frame;
        window.frame.origin.x += delta_x;
        window.frame.origin.y += delta_y;
        let bound = self.rect_bind_to_screen_frame(
            self.window_with_id(id).map(|w| w.frame).unwrap_or(original_frame),
        );
        if let Some(window) = self.window_with_id_mut(id) {
            window.frame = bound;
        }

        self.compositor.queue_rect_difference(original_frame, bound);
        self.compositor.queue_rect(bound);
        self.invalidate_drawable_regions_in_rect(original_frame.union(bound));
    }

    fn resize_window_by_drag(&mut self, id: WindowId, delta_x: i32, delta_y: i32) {
        let Some(window) = self.window_with_id(id) else {
            return;
        };
        let mut new_size = window.frame.size;
        if self.mouse.resize_edge == WindowResizeEdge::Left {
            // Dragging left from the left edge moves the origin and grows
            if delta_x > 0 {
                new_size.width += delta_x;
            } else {
                new_size.width += -delta_x;
                self.adjust_window_position(id, delta_x, 0);
            }
            if delta_y > 0 {
                new_size.height += delta_y;
            } else {
                new_size.height += -delta_y;
                self.adjust_window_position(id, 0, delta_y);
            }
        } else {
            new_size.width += delta_x;
            new_size.height += delta_y;
        }

        let layer_size = self
            .window_with_id(id)
            .map(|w| w.layer.size())
            .unwrap_or(self.screen.resolution);
        let new_size = clamp_resize(new_size, layer_size);

        // And keep the resized frame on-screen
        let origin = self.window_with_id(id).map(|w| w.frame.origin).unwrap();
        let bound = self.rect_bind_to_screen_frame(Rect::new(origin, new_size));
        if let Some(window) = self.window_with_id_mut(id) {
            window.frame.origin = bound.origin;
        }
        self.window_resize(id, bound.size, true);
    }

    fn handle_mouse_scroll(&mut self, delta_z: i32) {
        let Some(window) = self.mouse.active_window.and_then(|id| self.window_with_id(id)) else {
            return;
        };
        let mouse_within_content = self
            .mouse
            .mouse_pos
            .translate(window.frame)
            .translate(window.content_view_frame);
        let msg = AwmMouseScrolled {
            event: AWM_MOUSE_SCROLLED,
            mouse_pos: mouse_within_content,
            delta_z: delta_z as i8,
        };
        ulib::amc::send_struct(&window.owner_service, &msg);
    }

    fn exit_hover_window(&mut self) {
        if let Some(id) = self.mouse.active_window.take() {
            if let Some(window) = self.window_with_id(id) {
                window_handle_mouse_exited(window);
            }
            // Make sure the title-bar buttons lose their hover state
            self.window_redraw_title_bar(id, false, false, false);
        }
    }

    fn exit_hovered_shortcut(&mut self) {
        if let Some(idx) = self.mouse.hovered_shortcut.take() {
            self.shortcut_set_highlighted(idx, false);
        }
        self.mouse.is_dragging_shortcut = false;
    }

    fn handle_mouse_moved(&mut self, mouse_point: Point) {
        // Left the hover window or shortcut entirely?
        let left_hover_window = self
            .mouse
            .active_window
            .and_then(|id| self.window_with_id(id))
            .is_some_and(|window| !window.frame.contains_point(mouse_point));
        if left_hover_window {
            self.exit_hover_window();
        }
        if let Some(idx) = self.mouse.hovered_shortcut {
            if !self.shortcuts[idx].view.frame.contains_point(mouse_point) {
                self.exit_hovered_shortcut();
            }
        }

        let window_under_mouse = self.window_containing_point(mouse_point, true);
        if self.mouse.active_window != window_under_mouse {
            self.exit_hover_window();
            self.exit_hovered_shortcut();
            if let Some(id) = window_under_mouse {
                self.mouse.active_window = Some(id);
                if let Some(window) = self.window_with_id(id) {
                    window_handle_mouse_entered(window);
                }
            }
        }

        if let Some(id) = self.mouse.active_window {
            self.moved_in_hover_window(id, mouse_point);
        } else if window_under_mouse.is_none() {
            // Hover tracking for desktop shortcuts
            let shortcut = self.shortcut_containing_point(mouse_point);
            if self.mouse.hovered_shortcut != shortcut {
                self.exit_hovered_shortcut();
                if let Some(idx) = shortcut {
                    self.mouse.hovered_shortcut = Some(idx);
                    self.shortcut_set_highlighted(idx, true);
                }
            }
        }
    }

    fn moved_in_hover_window(&mut self, id: WindowId, mouse_point: Point) {
        let Some(window) = self.window_with_id_mut(id) else {
            return;
        };
        let mouse_within_window = mouse_point.translate(window.frame);

        // Entered or left the content view?
        let in_content = window.content_view_frame.contains_point(mouse_within_window);
        if in_content != window.is_mouse_within_content_view {
            window.is_mouse_within_content_view = in_content;
            if in_content {
                window_handle_mouse_entered(window);
            } else {
                window_handle_mouse_exited(window);
            }
        }

        let window = self.window_with_id(id).unwrap();
        if !self.mouse.is_prospective_window_move && !self.mouse.is_prospective_window_resize {
            window_handle_mouse_moved(window, mouse_within_window);
        }
    }

    // --- Keyboard ---

    pub fn handle_keystroke(&mut self, event: &KeyEventMsg) {
        let pressed = event.event_type == KeyEventType::Pressed;
        match event.key {
            KEY_IDENT_LEFT_SHIFT | KEY_IDENT_RIGHT_SHIFT => {
                self.keyboard.is_shift_held = pressed;
            }
            KEY_IDENT_LEFT_CONTROL => self.keyboard.is_control_held = pressed,
            KEY_IDENT_LEFT_COMMAND => self.keyboard.is_command_held = pressed,
            _ => {}
        }

        if pressed && self.keyboard.is_control_held {
            // Ctrl+Tab cycles: the bottom window comes to the top
            if event.key == '\t' as u32 {
                if let Some(bottom) = self.windows_get_bottom_window() {
                    self.window_move_to_top(bottom);
                }
                return;
            }
            // Ctrl+W asks the top window to close itself
            if event.key == 'w' as u32 {
                if let Some(service) = self
                    .windows_get_top_window()
                    .and_then(|id| self.service_of_window(id))
                {
                    ulib::amc::send_event(&service, AWM_CLOSE_WINDOW_REQUEST);
                }
                return;
            }
        }

        // Everything else goes to the foremost window
        if let Some(window) = self.windows_get_top_window().and_then(|id| self.window_with_id(id))
        {
            window_handle_keyboard_event(window, pressed, event.key);
        }
    }

    /// Fold one raw mouse packet into the running position; reports whether
    /// the button state changed (which forces a dispatch).
    pub fn apply_mouse_packet(&mut self, packet: &MousePacket, coalesced: &mut CoalescedMouse) -> bool {
        self.mouse.mouse_pos.x += packet.rel_x as i32;
        self.mouse.mouse_pos.y += packet.rel_y as i32;
        // Bind to the screen, leaving room for the cursor sprite
        self.mouse.mouse_pos.x = self
            .mouse
            .mouse_pos
            .x
            .clamp(0, self.screen.resolution.width - CURSOR_SIZE / 2);
        self.mouse.mouse_pos.y = self
            .mouse
            .mouse_pos
            .y
            .clamp(0, self.screen.resolution.height - CURSOR_SIZE / 2);

        let state_changed = packet.status != coalesced.state;
        coalesced.state = packet.status;
        coalesced.rel_x += packet.rel_x as i32;
        coalesced.rel_y += packet.rel_y as i32;
        coalesced.rel_z += packet.rel_z as i32;
        coalesced.combined_msg_count += 1;
        state_changed
    }
}

/// Multiple queued mouse packets are folded into one dispatch per event-
/// loop pass unless the button state changes mid-stream.
#[derive(Default)]
pub struct CoalescedMouse {
    pub state: u8,
    pub rel_x: i32,
    pub rel_y: i32,
    pub rel_z: i32,
    pub combined_msg_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Size = Size::new(400, 300);

    fn content() -> Rect {
        Rect::from_parts(6, WINDOW_TITLE_BAR_HEIGHT, 388, 264)
    }

    #[test]
    fn title_bar_position_is_prospective_move() {
        let (mv, rs) =
            prospective_action_for_position(Point::new(200, 10), FRAME, content(), true, true);
        assert!(mv);
        assert!(!rs);
    }

    #[test]
    fn edge_position_is_prospective_resize() {
        // Just inside the content view but within the resize inset
        let (mv, rs) =
            prospective_action_for_position(Point::new(8, 150), FRAME, content(), true, true);
        assert!(!mv);
        assert!(rs);
    }

    #[test]
    fn deep_content_position_is_neither() {
        let (mv, rs) =
            prospective_action_for_position(Point::new(200, 150), FRAME, content(), true, true);
        assert!(!mv);
        assert!(!rs);
    }

    #[test]
    fn immovable_window_never_moves() {
        let (mv, rs) =
            prospective_action_for_position(Point::new(200, 10), FRAME, content(), false, false);
        assert!(!mv);
        assert!(!rs);
    }

    #[test]
    fn resize_clamps_to_min_and_layer() {
        let layer = Size::new(1920, 1080);
        assert_eq!(
            clamp_resize(Size::new(-50, 5), layer),
            Size::new(1, WINDOW_TITLE_BAR_HEIGHT + 1)
        );
        assert_eq!(clamp_resize(Size::new(5000, 5000), layer), layer);
        assert_eq!(clamp_resize(Size::new(640, 480), layer), Size::new(640, 480));
    }
}
