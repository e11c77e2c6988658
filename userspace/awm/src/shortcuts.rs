//! Desktop shortcuts: launcher icons arranged on a grid along the left
//! edge. Shortcuts are plain views (no client framebuffer); dragging one
//! snaps it to the nearest free slot on release.

use crate::SNAP_SHORTCUT_ANIMATION_MS;
use crate::animations::Animation;
use crate::desktop::{Desktop, ViewHandle};
use crate::layer::{Color, Layer};
use alloc::string::String;
use alloc::vec::Vec;
use embedded_graphics::Drawable;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::text::Text;
use kernel_api_types::amc::{FILE_SERVER_LAUNCH_PROGRAM, FILE_SERVER_SERVICE_NAME};
use kernel_api_types::geometry::{Point, Rect, Size};

pub const SHORTCUT_WIDTH: i32 = 100;
pub const SHORTCUT_HEIGHT: i32 = 86;
const GRID_MARGIN: i32 = 16;

/// A view without a remote framebuffer: frame, backing layer, and the same
/// per-frame compositing queues windows carry.
pub struct View {
    pub frame: Rect,
    pub layer: Layer,
    pub drawable_rects: Vec<Rect>,
    pub extra_draws_this_cycle: Vec<Rect>,
}

impl View {
    pub fn new(frame: Rect) -> Self {
        Self {
            frame,
            layer: Layer::new(frame.size),
            drawable_rects: Vec::new(),
            extra_draws_this_cycle: Vec::new(),
        }
    }
}

/// A grid slot index: column-major down the left edge of the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSlot {
    pub col: i32,
    pub row: i32,
}

impl GridSlot {
    pub fn origin(&self) -> Point {
        Point::new(
            GRID_MARGIN + self.col * (SHORTCUT_WIDTH + GRID_MARGIN),
            GRID_MARGIN + self.row * (SHORTCUT_HEIGHT + GRID_MARGIN),
        )
    }

    pub fn frame(&self) -> Rect {
        Rect::new(self.origin(), Size::new(SHORTCUT_WIDTH, SHORTCUT_HEIGHT))
    }
}

pub struct DesktopShortcut {
    pub display_name: String,
    pub program_path: String,
    pub view: View,
    pub grid_slot: GridSlot,
    /// First-click highlight; a second click within the double-click
    /// window launches.
    pub in_soft_click: bool,
    pub first_click_start_time: u64,
    pub is_highlighted: bool,
}

/// Rows that fit on a screen of the given height.
pub fn grid_rows_for_screen(screen_height: i32) -> i32 {
    ((screen_height - GRID_MARGIN) / (SHORTCUT_HEIGHT + GRID_MARGIN)).max(1)
}

/// The nearest slot to a dropped frame, if it is free. Distance is between
/// origins; an occupied nearest slot means "no good slot", and the caller
/// falls back to the shortcut's original one.
pub fn grid_slot_for_rect(
    dropped: Rect,
    screen: Size,
    occupied: &[GridSlot],
) -> Option<GridSlot> {
    let rows = grid_rows_for_screen(screen.height);
    let cols = ((screen.width - GRID_MARGIN) / (SHORTCUT_WIDTH + GRID_MARGIN)).max(1);

    let mut best: Option<(i64, GridSlot)> = None;
    for col in 0..cols {
        for row in 0..rows {
            let slot = GridSlot { col, row };
            let origin = slot.origin();
            let dx = (origin.x - dropped.min_x()) as i64;
            let dy = (origin.y - dropped.min_y()) as i64;
            let distance = dx * dx + dy * dy;
            if best.is_none_or(|(best_distance, _)| distance < best_distance) {
                best = Some((distance, slot));
            }
        }
    }
    let (_, slot) = best?;
    if occupied.contains(&slot) {
        return None;
    }
    Some(slot)
}

impl Desktop {
    pub fn install_default_shortcuts(&mut self) {
        self.shortcuts_add("Terminal", "/usr/applications/terminal", GridSlot { col: 0, row: 0 });
        self.shortcuts_add("Files", "/usr/applications/files", GridSlot { col: 0, row: 1 });
        self.shortcuts_add("Logs", "/usr/applications/logs_viewer", GridSlot { col: 0, row: 2 });
    }

    fn shortcuts_add(&mut self, display_name: &str, program_path: &str, slot: GridSlot) {
        let mut shortcut = DesktopShortcut {
            display_name: String::from(display_name),
            program_path: String::from(program_path),
            view: View::new(slot.frame()),
            grid_slot: slot,
            in_soft_click: false,
            first_click_start_time: 0,
            is_highlighted: false,
        };
        render_shortcut(&mut shortcut);
        let idx = self.shortcuts.len();
        self.shortcuts.push(shortcut);
        let frame = self.shortcuts[idx].view.frame;
        self.invalidate_drawable_regions_in_rect(frame);
        self.compositor.queue_rect(frame);
    }

    pub fn shortcut_containing_point(&self, point: Point) -> Option<usize> {
        self.shortcuts
            .iter()
            .position(|shortcut| shortcut.view.frame.contains_point(point))
    }

    pub fn shortcut_set_highlighted(&mut self, idx: usize, highlighted: bool) {
        let shortcut = &mut self.shortcuts[idx];
        if shortcut.is_highlighted == highlighted {
            return;
        }
        shortcut.is_highlighted = highlighted;
        if !highlighted {
            shortcut.in_soft_click = false;
        }
        render_shortcut(shortcut);
        let frame = shortcut.view.frame;
        self.queue_composite(ViewHandle::Shortcut(idx));
        self.compositor.queue_rect(frame);
    }

    /// First click highlights; report whether this was it.
    pub fn shortcut_handle_soft_click(&mut self, idx: usize, now: u64) -> ShortcutClick {
        let double_click_window = crate::DOUBLE_CLICK_WINDOW_MS;
        let shortcut = &mut self.shortcuts[idx];
        if shortcut.in_soft_click {
            let elapsed = now.saturating_sub(shortcut.first_click_start_time);
            if elapsed > double_click_window {
                // Too slow; treat as a fresh first click
                shortcut.first_click_start_time = now;
                return ShortcutClick::First;
            }
            shortcut.in_soft_click = false;
            return ShortcutClick::Launch;
        }
        shortcut.in_soft_click = true;
        shortcut.first_click_start_time = now;
        self.shortcut_set_highlighted(idx, true);
        ShortcutClick::First
    }

    pub fn shortcut_launch(&mut self, idx: usize) {
        let path = self.shortcuts[idx].program_path.clone();
        log::info!("launching {path} from shortcut");
        let mut launch = kernel_api_types::amc::FileServerLaunchProgram {
            event: FILE_SERVER_LAUNCH_PROGRAM,
            path: [0; 128],
        };
        let len = path.len().min(launch.path.len());
        launch.path[..len].copy_from_slice(&path.as_bytes()[..len]);
        ulib::amc::send_struct(FILE_SERVER_SERVICE_NAME, &launch);
    }

    /// Drop a dragged shortcut: snap to the nearest free slot, or return to
    /// the original one when nothing is free.
    pub fn shortcut_snap_to_slot(&mut self, idx: usize) {
        let occupied: Vec<GridSlot> = self
            .shortcuts
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != idx)
            .map(|(_, shortcut)| shortcut.grid_slot)
            .collect();
        let dropped = self.shortcuts[idx].view.frame;
        let slot = grid_slot_for_rect(dropped, self.screen.resolution, &occupied)
            .unwrap_or(self.shortcuts[idx].grid_slot);
        self.animation_start(Animation::snap_shortcut(
            SNAP_SHORTCUT_ANIMATION_MS,
            idx,
            slot,
            dropped,
            slot.frame(),
        ));
    }

    pub(crate) fn shortcut_settle_in_slot(&mut self, idx: usize, slot: GridSlot) {
        if let Some(shortcut) = self.shortcuts.get_mut(idx) {
            shortcut.grid_slot = slot;
            shortcut.view.frame = slot.frame();
            shortcut.in_soft_click = false;
        }
        self.shortcut_set_highlighted(idx, false);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ShortcutClick {
    First,
    Launch,
}

fn render_shortcut(shortcut: &mut DesktopShortcut) {
    let base = if shortcut.is_highlighted {
        Color::new(0x4a, 0x6a, 0x96)
    } else {
        Color::new(0x31, 0x41, 0x59)
    };
    let frame = Rect::new(Point::zero(), shortcut.view.frame.size);
    shortcut.view.layer.fill_rect(frame, base);
    shortcut.view.layer.draw_rect_outline(frame, Color::new(0x18, 0x20, 0x2c));

    // Icon block above the label
    let icon = Rect::from_parts(
        frame.size.width / 2 - 16,
        12,
        32,
        32,
    );
    shortcut.view.layer.fill_rect(icon, Color::new(0xd9, 0xdd, 0xe4));

    let label_origin = Point::new(
        frame.size.width / 2 - (shortcut.display_name.len() as i32 * 6) / 2,
        frame.size.height - 16,
    );
    let style = MonoTextStyle::new(&FONT_6X10, Rgb888::new(0xee, 0xee, 0xee));
    let _ = Text::new(
        &shortcut.display_name,
        embedded_graphics::geometry::Point::new(label_origin.x, label_origin.y),
        style,
    )
    .draw(&mut shortcut.view.layer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_frames_do_not_overlap() {
        let a = GridSlot { col: 0, row: 0 }.frame();
        let b = GridSlot { col: 0, row: 1 }.frame();
        let c = GridSlot { col: 1, row: 0 }.frame();
        assert!(!a.intersects(b));
        assert!(!a.intersects(c));
    }

    #[test]
    fn drop_near_a_slot_snaps_to_it() {
        let screen = Size::new(1920, 1080);
        let target = GridSlot { col: 1, row: 1 };
        let near = Rect::new(
            Point::new(target.origin().x + 5, target.origin().y - 3),
            Size::new(SHORTCUT_WIDTH, SHORTCUT_HEIGHT),
        );
        assert_eq!(grid_slot_for_rect(near, screen, &[]), Some(target));
    }

    #[test]
    fn occupied_nearest_slot_yields_none() {
        let screen = Size::new(1920, 1080);
        let target = GridSlot { col: 0, row: 0 };
        let dropped = target.frame();
        assert_eq!(
            grid_slot_for_rect(dropped, screen, &[target]),
            None
        );
    }
}
