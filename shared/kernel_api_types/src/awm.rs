//! The window-management protocol between AWM and its client processes.
//!
//! Clients talk to `com.axle.awm` over AMC; the first u32 of every body is
//! one of the event codes below. Request/response pairs reuse a code, with
//! direction deciding the interpretation.

use crate::amc::ServiceNameBuf;
use crate::geometry::{Point, Rect, Size};

pub type WindowId = u32;

pub const AWM_CREATE_WINDOW_REQUEST: u32 = 800;
pub const AWM_CREATE_WINDOW_RESPONSE: u32 = 800;
pub const AWM_WINDOW_REDRAW_READY: u32 = 801;
pub const AWM_MOUSE_ENTERED: u32 = 802;
pub const AWM_MOUSE_EXITED: u32 = 803;
pub const AWM_MOUSE_MOVED: u32 = 804;
pub const AWM_KEY_DOWN: u32 = 805;
pub const AWM_KEY_UP: u32 = 806;
pub const AWM_MOUSE_SCROLLED: u32 = 807;
pub const AWM_WINDOW_RESIZED: u32 = 808;
pub const AWM_MOUSE_LEFT_CLICK: u32 = 809;
pub const AWM_MOUSE_DRAGGED: u32 = 810;
pub const AWM_MOUSE_LEFT_CLICK_ENDED: u32 = 811;
pub const AWM_UPDATE_WINDOW_TITLE: u32 = 813;
// A client sends 814 to close its own window; AWM sends 814 to ask a client
// to close (Ctrl+W, close button).
pub const AWM_CLOSE_WINDOW: u32 = 814;
pub const AWM_CLOSE_WINDOW_REQUEST: u32 = 814;
pub const AWM_WINDOW_RESIZE_ENDED: u32 = 816;
pub const AWM_DOCK_WINDOW_CREATED: u32 = 817;
pub const AWM_DOCK_WINDOW_TITLE_UPDATED: u32 = 818;
pub const AWM_DOCK_WINDOW_CLOSED: u32 = 819;
pub const AWM_DOCK_WINDOW_MINIMIZE_REQUESTED: u32 = 820;
pub const AWM_DOCK_WINDOW_MINIMIZE_WITH_INFO: u32 = 821;
pub const AWM_DOCK_TASK_VIEW_CLICKED: u32 = 822;
pub const AWM_DOCK_TASK_VIEW_HOVERED: u32 = 823;
pub const AWM_DOCK_TASK_VIEW_HOVER_EXITED: u32 = 824;

pub const MAX_WINDOW_TITLE_LEN: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmCreateWindowRequest {
    pub event: u32,
    pub window_size: Size,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmCreateWindowResponse {
    pub event: u32,
    pub screen_resolution: Size,
    pub bytes_per_pixel: u32,
    /// Client-side address of the shared framebuffer.
    pub framebuffer: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmMouseMoved {
    pub event: u32,
    pub x_pos: u32,
    pub y_pos: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmKeyEvent {
    pub event: u32,
    pub key: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmMouseScrolled {
    pub event: u32,
    pub mouse_pos: Point,
    pub delta_z: i8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmWindowResized {
    pub event: u32,
    pub new_size: Size,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmMouseLeftClick {
    pub event: u32,
    pub click_point: Point,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmMouseDragged {
    pub event: u32,
    pub x_pos: u32,
    pub y_pos: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmMouseLeftClickEnded {
    pub event: u32,
    pub click_end_point: Point,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmWindowTitle {
    pub event: u32,
    pub len: u32,
    pub title: [u8; MAX_WINDOW_TITLE_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockWindowCreated {
    pub event: u32,
    pub window_id: WindowId,
    pub title_len: u32,
    pub title: [u8; MAX_WINDOW_TITLE_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockWindowTitleUpdated {
    pub event: u32,
    pub window_id: WindowId,
    pub title_len: u32,
    pub title: [u8; MAX_WINDOW_TITLE_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockWindowClosed {
    pub event: u32,
    pub window_id: WindowId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockWindowMinimizeRequested {
    pub event: u32,
    pub window_id: WindowId,
}

/// The dock answers a minimize request with the task-view frame the window
/// should shrink towards.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockWindowMinimizeWithInfo {
    pub event: u32,
    pub window_id: WindowId,
    pub task_view_frame: Rect,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockTaskViewClicked {
    pub event: u32,
    pub window_id: WindowId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockTaskViewHovered {
    pub event: u32,
    pub window_id: WindowId,
    pub task_view_frame: Rect,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AwmDockTaskViewHoverExited {
    pub event: u32,
    pub window_id: WindowId,
}

pub fn title_buf(title: &str) -> ([u8; MAX_WINDOW_TITLE_LEN], u32) {
    let mut buf = [0u8; MAX_WINDOW_TITLE_LEN];
    let len = title.len().min(MAX_WINDOW_TITLE_LEN);
    buf[..len].copy_from_slice(&title.as_bytes()[..len]);
    (buf, len as u32)
}

pub fn title_from_buf(buf: &[u8; MAX_WINDOW_TITLE_LEN], len: u32) -> &str {
    let len = (len as usize).min(MAX_WINDOW_TITLE_LEN);
    core::str::from_utf8(&buf[..len]).unwrap_or("")
}

/// Read the leading event tag of a raw AMC body, if there is one.
pub fn event_tag(body: &[u8]) -> Option<u32> {
    let tag = body.get(..4)?;
    Some(u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_reads_leading_u32() {
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&AWM_WINDOW_REDRAW_READY.to_le_bytes());
        assert_eq!(event_tag(&body), Some(AWM_WINDOW_REDRAW_READY));
    }

    #[test]
    fn event_tag_rejects_short_body() {
        assert_eq!(event_tag(&[1, 2]), None);
        assert_eq!(event_tag(&[]), None);
    }

    #[test]
    fn title_round_trip() {
        let (buf, len) = title_buf("Text Editor");
        assert_eq!(title_from_buf(&buf, len), "Text Editor");
    }

    #[test]
    fn title_truncates_to_capacity() {
        let long: std::string::String = core::iter::repeat('t').take(200).collect();
        let (buf, len) = title_buf(&long);
        assert_eq!(len as usize, MAX_WINDOW_TITLE_LEN);
        assert_eq!(title_from_buf(&buf, len).len(), MAX_WINDOW_TITLE_LEN);
    }
}
