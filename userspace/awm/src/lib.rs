#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod animations;
pub mod compositor;
pub mod desktop;
pub mod input;
pub mod layer;
pub mod shortcuts;
pub mod window;

/// Height of the decorated title bar, buttons included.
pub const WINDOW_TITLE_BAR_HEIGHT: i32 = 30;
/// Border carved out of a decorated window's side and bottom edges.
pub const WINDOW_BORDER_MARGIN: i32 = 6;
/// Height of the dock overlay along the bottom of the screen.
pub const DOCK_HEIGHT: i32 = 64;
/// Square cursor sprite edge length.
pub const CURSOR_SIZE: i32 = 14;

pub const OPEN_WINDOW_ANIMATION_MS: u64 = 200;
pub const CLOSE_WINDOW_ANIMATION_MS: u64 = 200;
pub const MINIMIZE_WINDOW_ANIMATION_MS: u64 = 300;
pub const UNMINIMIZE_WINDOW_ANIMATION_MS: u64 = 300;
pub const SNAP_SHORTCUT_ANIMATION_MS: u64 = 64;

/// Two clicks within this window count as a shortcut launch.
pub const DOUBLE_CLICK_WINDOW_MS: u64 = 500;
