//! Time-parameterised linear animations driving window open/close,
//! minimize/unminimize, and shortcut snapping. A 16 ms tick runs while any
//! animation is in flight; idle costs nothing.

use crate::WINDOW_TITLE_BAR_HEIGHT;
use crate::desktop::{Desktop, TimerKind};
use crate::shortcuts::GridSlot;
use kernel_api_types::awm::{
    AWM_DOCK_WINDOW_CLOSED, AWM_WINDOW_RESIZE_ENDED, AwmDockWindowClosed, WindowId,
};
use kernel_api_types::amc::AWM_DOCK_SERVICE_NAME;
use kernel_api_types::geometry::{Point, Rect, Size, lerp};

const ANIMATION_TICK_MS: u64 = 16;

#[derive(Clone, Copy, Debug)]
pub enum AnimationKind {
    OpenWindow { window: WindowId },
    CloseWindow { window: WindowId },
    MinimizeWindow { window: WindowId },
    UnminimizeWindow { window: WindowId },
    SnapShortcut { shortcut: usize, dest_slot: GridSlot },
}

#[derive(Clone, Copy, Debug)]
pub struct Animation {
    pub start_time: u64,
    pub end_time: u64,
    pub original_frame: Rect,
    pub destination_frame: Rect,
    pub kind: AnimationKind,
}

impl Animation {
    fn new(duration: u64, original: Rect, destination: Rect, kind: AnimationKind) -> Self {
        let now = ulib::ms_since_boot();
        Self {
            start_time: now,
            end_time: now + duration,
            original_frame: original,
            destination_frame: destination,
            kind,
        }
    }

    pub fn open_window(duration: u64, window: WindowId, original: Rect, destination: Rect) -> Self {
        Self::new(duration, original, destination, AnimationKind::OpenWindow { window })
    }

    pub fn close_window(duration: u64, window: WindowId, original: Rect, destination: Rect) -> Self {
        Self::new(duration, original, destination, AnimationKind::CloseWindow { window })
    }

    pub fn minimize_window(
        duration: u64,
        window: WindowId,
        original: Rect,
        destination: Rect,
    ) -> Self {
        Self::new(duration, original, destination, AnimationKind::MinimizeWindow { window })
    }

    pub fn unminimize_window(
        duration: u64,
        window: WindowId,
        original: Rect,
        destination: Rect,
    ) -> Self {
        Self::new(duration, original, destination, AnimationKind::UnminimizeWindow { window })
    }

    pub fn snap_shortcut(
        duration: u64,
        shortcut: usize,
        dest_slot: GridSlot,
        original: Rect,
        destination: Rect,
    ) -> Self {
        Self::new(
            duration,
            original,
            destination,
            AnimationKind::SnapShortcut { shortcut, dest_slot },
        )
    }

    /// Progress in [0, 1] at the given time.
    pub fn percent_at(&self, now: u64) -> f32 {
        if now >= self.end_time {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.start_time) as f32;
        let span = (self.end_time - self.start_time).max(1) as f32;
        (elapsed / span).clamp(0.0, 1.0)
    }

    /// Window animations inform the client of in-flight sizes only while
    /// opening; a closing or minimizing window already knows its fate.
    pub fn informs_client(&self) -> bool {
        matches!(
            self.kind,
            AnimationKind::OpenWindow { .. } | AnimationKind::UnminimizeWindow { .. }
        )
    }
}

/// Interpolate every component of a frame independently, clamped to the
/// smallest frame a decorated window can have.
pub fn interpolate_frame(from: Rect, to: Rect, percent: f32) -> Rect {
    let to_size = Size::new(
        to.size.width.max(1),
        to.size.height.max(WINDOW_TITLE_BAR_HEIGHT + 1),
    );
    Rect::new(
        Point::new(
            lerp(from.min_x() as f32, to.min_x() as f32, percent) as i32,
            lerp(from.min_y() as f32, to.min_y() as f32, percent) as i32,
        ),
        Size::new(
            lerp(from.size.width as f32, to_size.width as f32, percent) as i32,
            lerp(from.size.height as f32, to_size.height as f32, percent) as i32,
        ),
    )
}

impl Desktop {
    pub fn animation_start(&mut self, animation: Animation) {
        self.animations.push(animation);
        self.timer_start(ANIMATION_TICK_MS, TimerKind::AnimationTick);
    }

    pub fn has_pending_animations(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Advance every in-flight animation; completed ones run their finish
    /// action and drop out. Re-arms the tick while any remain.
    pub fn animations_tick(&mut self) {
        let now = ulib::ms_since_boot();
        let animations = core::mem::take(&mut self.animations);
        for animation in animations {
            let percent = animation.percent_at(now);
            self.animation_step(&animation, percent);
            if percent >= 1.0 {
                self.animation_finish(&animation);
            } else {
                self.animations.push(animation);
            }
        }
        if self.has_pending_animations() {
            self.timer_start(ANIMATION_TICK_MS, TimerKind::AnimationTick);
        }
    }

    fn animation_step(&mut self, animation: &Animation, percent: f32) {
        let new_frame =
            interpolate_frame(animation.original_frame, animation.destination_frame, percent);
        match animation.kind {
            AnimationKind::OpenWindow { window }
            | AnimationKind::CloseWindow { window }
            | AnimationKind::MinimizeWindow { window }
            | AnimationKind::UnminimizeWindow { window } => {
                let Some(current_frame) =
                    self.window_with_id(window).map(|w| w.frame)
                else {
                    return;
                };
                if let Some(w) = self.window_with_id_mut(window) {
                    w.frame.origin = new_frame.origin;
                }
                self.window_resize(window, new_frame.size, animation.informs_client());
                // Repainting the union instead of just the delta avoids
                // stray pixels on frames where the two rects barely overlap
                let total = current_frame.union(new_frame);
                self.compositor.queue_rect(total);
                self.invalidate_drawable_regions_in_rect(total);
            }
            AnimationKind::SnapShortcut { shortcut, .. } => {
                let Some(current_frame) =
                    self.shortcuts.get(shortcut).map(|s| s.view.frame)
                else {
                    return;
                };
                self.shortcuts[shortcut].view.frame = new_frame;
                let total = current_frame.union(new_frame);
                self.compositor.queue_rect(total);
                self.invalidate_drawable_regions_in_rect(total);
            }
        }
    }

    fn animation_finish(&mut self, animation: &Animation) {
        match animation.kind {
            AnimationKind::OpenWindow { window } => {
                if let Some(service) = self.service_of_window(window) {
                    ulib::amc::send_event(&service, AWM_WINDOW_RESIZE_ENDED);
                }
            }
            AnimationKind::CloseWindow { window } => {
                let closed = AwmDockWindowClosed {
                    event: AWM_DOCK_WINDOW_CLOSED,
                    window_id: window,
                };
                ulib::amc::send_struct(AWM_DOCK_SERVICE_NAME, &closed);
                self.window_destroy(window);
            }
            AnimationKind::MinimizeWindow { .. } => {}
            AnimationKind::UnminimizeWindow { .. } => {
                // Mouse control passes back to the restored window
                self.mouse_recompute_status();
            }
            AnimationKind::SnapShortcut { shortcut, dest_slot } => {
                self.shortcut_settle_in_slot(shortcut, dest_slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_endpoints_match_frames() {
        let from = Rect::from_parts(0, 0, 100, 200);
        let to = Rect::from_parts(50, 60, 300, 400);
        assert_eq!(interpolate_frame(from, to, 0.0), from);
        assert_eq!(interpolate_frame(from, to, 1.0), to);
    }

    #[test]
    fn interpolation_midpoint_is_halfway() {
        let from = Rect::from_parts(0, 0, 100, 100);
        let to = Rect::from_parts(100, 100, 200, 200);
        let mid = interpolate_frame(from, to, 0.5);
        assert_eq!(mid, Rect::from_parts(50, 50, 150, 150));
    }

    #[test]
    fn destination_is_clamped_to_minimum_size() {
        let from = Rect::from_parts(0, 0, 100, 100);
        let to = Rect::from_parts(10, 10, 0, 0);
        let done = interpolate_frame(from, to, 1.0);
        assert_eq!(done.size.width, 1);
        assert_eq!(done.size.height, WINDOW_TITLE_BAR_HEIGHT + 1);
    }

    #[test]
    fn percent_clamps_at_the_end() {
        let animation = Animation {
            start_time: 1000,
            end_time: 1200,
            original_frame: Rect::zero(),
            destination_frame: Rect::zero(),
            kind: AnimationKind::OpenWindow { window: 0 },
        };
        assert_eq!(animation.percent_at(1000), 0.0);
        assert_eq!(animation.percent_at(1100), 0.5);
        assert_eq!(animation.percent_at(1200), 1.0);
        assert_eq!(animation.percent_at(9999), 1.0);
    }
}
