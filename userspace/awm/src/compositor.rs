//! Damage-tracking compositor. Each frame: fetch dirtied client buffers,
//! split queued dirty rects across the views' visible regions, fill the
//! uncovered remainder from the desktop background, draw, and blit exactly
//! the touched areas to the framebuffer.

use crate::desktop::{Desktop, ViewHandle};
use crate::layer::{Color, blit_layer};
use crate::CURSOR_SIZE;
use alloc::vec::Vec;
use kernel_api_types::geometry::{Point, Rect, Size, rect_diff};

/// Cap on dirty rects per frame; extra damage is dropped (the next frame
/// will re-queue anything still stale).
const MAX_RECTS_PER_FRAME: usize = 256;

pub struct CompositorQueue {
    pub rects_to_update_this_cycle: Vec<Rect>,
}

impl CompositorQueue {
    pub fn new() -> Self {
        Self {
            rects_to_update_this_cycle: Vec::new(),
        }
    }

    /// Queue a composite pass over `rect`. While rendering, the compositor
    /// works out which views, background slices, and extra draws cover it.
    pub fn queue_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            // Zero-area rects show up when resize events flood in
            return;
        }
        if self.rects_to_update_this_cycle.len() >= MAX_RECTS_PER_FRAME {
            return;
        }
        self.rects_to_update_this_cycle.push(rect);
    }

    /// Queue only the parts of `bg` not covered by `fg`.
    pub fn queue_rect_difference(&mut self, bg: Rect, fg: Rect) {
        for rect in rect_diff(bg, fg).iter() {
            self.queue_rect(*rect);
        }
    }
}

impl Default for CompositorQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Subtract `exclude_rect` from every rect in `free_areas`, splitting
/// intersecting rects into their uncovered pieces.
pub fn update_occlusions(free_areas: Vec<Rect>, exclude_rect: Rect) -> Vec<Rect> {
    let mut out = Vec::with_capacity(free_areas.len());
    for free_area in free_areas {
        if !free_area.intersects(exclude_rect) {
            out.push(free_area);
            continue;
        }
        out.extend(rect_diff(free_area, exclude_rect).iter().copied());
    }
    out
}

impl Desktop {
    /// One compositor frame over everything queued since the last one.
    pub fn compositor_render_frame(&mut self) {
        // 1. Pull fresh content for windows that signalled redraw-ready
        self.windows_fetch_queued_windows();

        // 2. For each dirty rect, attribute sub-rects to the views whose
        //    visible regions cover them; whatever remains is bare desktop
        let dirty_rects = self.compositor.rects_to_update_this_cycle.clone();
        let order = self.draw_order();
        for rect in &dirty_rects {
            let mut unobscured_region = alloc::vec![*rect];

            for handle in &order {
                let frame = self.view_frame(*handle);
                if !frame.intersects(*rect) {
                    continue;
                }
                let drawable_rects = self.view_drawable_rects(*handle);
                for visible_region in drawable_rects {
                    if !visible_region.intersects(*rect) {
                        continue;
                    }
                    let covered = if visible_region.contains_rect(*rect) {
                        *rect
                    } else {
                        visible_region.intersect(*rect)
                    };
                    self.push_view_extra_draw(*handle, covered);
                    unobscured_region = update_occlusions(unobscured_region, covered);
                    if unobscured_region.is_empty() {
                        break;
                    }
                }
                if unobscured_region.is_empty() {
                    break;
                }
            }

            // 3. Background fills whatever no view covered
            for bg_rect in unobscured_region {
                blit_layer(&mut self.screen.vmem, &self.background, bg_rect, bg_rect);
            }
        }

        // 4. Views flagged ready-to-composite draw their full visible set
        let composite_list = self.views_to_composite_this_cycle.clone();
        for handle in &composite_list {
            self.draw_view_drawable_rects(*handle);
        }

        // 5. Then per-view extra draws from step 2
        for handle in &order {
            let extra = self.take_view_extra_draws(*handle);
            for rect in &extra {
                self.draw_view_rect(*handle, *rect);
            }
            self.put_view_extra_draws(*handle, extra);
        }

        // 6. Cursor sprite last, colour-coded by interaction state
        let mouse_rect = self.draw_cursor();

        // 7. Push everything we touched to the physical framebuffer
        for rect in &dirty_rects {
            self.present_rect(*rect);
        }
        for handle in &order {
            let extra = self.take_view_extra_draws(*handle);
            for rect in &extra {
                self.present_rect(*rect);
            }
            self.put_view_extra_draws(*handle, extra);
        }
        for handle in &composite_list {
            for rect in self.view_drawable_rects(*handle) {
                self.present_rect(rect);
            }
        }
        self.present_rect(mouse_rect);

        // 8. Reset per-frame queues
        self.compositor.rects_to_update_this_cycle.clear();
        self.views_flush_queues();
    }

    /// Copy one back-buffer rect to the memory-mapped framebuffer.
    fn present_rect(&mut self, rect: Rect) {
        let crate::desktop::Screen { pmem, vmem, .. } = &mut self.screen;
        blit_layer(pmem, vmem, rect, rect);
    }

    pub fn view_drawable_rects(&self, handle: ViewHandle) -> Vec<Rect> {
        match handle {
            ViewHandle::Window(id) => self
                .window_with_id(id)
                .map(|window| window.drawable_rects.clone())
                .unwrap_or_default(),
            ViewHandle::Shortcut(idx) => self.shortcuts[idx].view.drawable_rects.clone(),
            ViewHandle::MinimizedPreview => self
                .minimized_preview
                .as_ref()
                .map(|view| view.drawable_rects.clone())
                .unwrap_or_default(),
        }
    }

    fn push_view_extra_draw(&mut self, handle: ViewHandle, rect: Rect) {
        match handle {
            ViewHandle::Window(id) => {
                if let Some(window) = self.window_with_id_mut(id) {
                    window.extra_draws_this_cycle.push(rect);
                }
            }
            ViewHandle::Shortcut(idx) => {
                self.shortcuts[idx].view.extra_draws_this_cycle.push(rect);
            }
            ViewHandle::MinimizedPreview => {
                if let Some(view) = self.minimized_preview.as_mut() {
                    view.extra_draws_this_cycle.push(rect);
                }
            }
        }
    }

    fn take_view_extra_draws(&mut self, handle: ViewHandle) -> Vec<Rect> {
        match handle {
            ViewHandle::Window(id) => self
                .window_with_id_mut(id)
                .map(|window| core::mem::take(&mut window.extra_draws_this_cycle))
                .unwrap_or_default(),
            ViewHandle::Shortcut(idx) => {
                core::mem::take(&mut self.shortcuts[idx].view.extra_draws_this_cycle)
            }
            ViewHandle::MinimizedPreview => self
                .minimized_preview
                .as_mut()
                .map(|view| core::mem::take(&mut view.extra_draws_this_cycle))
                .unwrap_or_default(),
        }
    }

    fn put_view_extra_draws(&mut self, handle: ViewHandle, rects: Vec<Rect>) {
        match handle {
            ViewHandle::Window(id) => {
                if let Some(window) = self.window_with_id_mut(id) {
                    window.extra_draws_this_cycle = rects;
                }
            }
            ViewHandle::Shortcut(idx) => {
                self.shortcuts[idx].view.extra_draws_this_cycle = rects;
            }
            ViewHandle::MinimizedPreview => {
                if let Some(view) = self.minimized_preview.as_mut() {
                    view.extra_draws_this_cycle = rects;
                }
            }
        }
    }

    /// Draw every visible rect of a view into the back buffer.
    fn draw_view_drawable_rects(&mut self, handle: ViewHandle) {
        for rect in self.view_drawable_rects(handle) {
            self.draw_view_rect(handle, rect);
        }
    }

    /// Draw one screen-space rect of a view into the back buffer, sampling
    /// the view's layer at the matching offset.
    fn draw_view_rect(&mut self, handle: ViewHandle, rect: Rect) {
        let Desktop {
            windows,
            shortcuts,
            minimized_preview,
            screen,
            ..
        } = self;
        let (frame, layer) = match handle {
            ViewHandle::Window(id) => {
                let Some(window) = windows.iter().find(|window| window.id == id) else {
                    return;
                };
                if !window.has_done_first_draw && !window.has_title_bar {
                    return;
                }
                (window.frame, &window.layer)
            }
            ViewHandle::Shortcut(idx) => {
                let view = &shortcuts[idx].view;
                (view.frame, &view.layer)
            }
            ViewHandle::MinimizedPreview => {
                let Some(view) = minimized_preview.as_ref() else {
                    return;
                };
                (view.frame, &view.layer)
            }
        };
        let src = Rect::new(
            Point::new(rect.min_x() - frame.min_x(), rect.min_y() - frame.min_y()),
            rect.size,
        );
        blit_layer(&mut screen.vmem, layer, rect, src);
    }

    /// The cursor is a filled square whose inner colour advertises the
    /// current (or prospective) drag action.
    fn draw_cursor(&mut self) -> Rect {
        let mouse = &self.mouse;
        let inner_color = if mouse.is_resizing_top_window {
            Color::new(207, 25, 185)
        } else if mouse.is_moving_top_window {
            Color::new(30, 65, 217)
        } else if mouse.is_prospective_window_resize {
            Color::new(212, 119, 201)
        } else if mouse.is_prospective_window_move {
            Color::new(121, 160, 217)
        } else {
            Color::new(0, 160, 20)
        };

        let cursor_rect = Rect::new(mouse.mouse_pos, Size::new(CURSOR_SIZE, CURSOR_SIZE));
        self.screen.vmem.fill_rect(cursor_rect, Color::black());
        self.screen.vmem.fill_rect(
            Rect::from_parts(
                cursor_rect.min_x() + 2,
                cursor_rect.min_y() + 2,
                CURSOR_SIZE - 4,
                CURSOR_SIZE - 4,
            ),
            inner_color,
        );
        cursor_rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(rects: &[Rect]) -> i64 {
        rects
            .iter()
            .map(|r| r.size.width as i64 * r.size.height as i64)
            .sum()
    }

    #[test]
    fn occlusion_by_disjoint_rect_is_noop() {
        let free = alloc::vec![Rect::from_parts(0, 0, 50, 50)];
        let result = update_occlusions(free.clone(), Rect::from_parts(100, 100, 10, 10));
        assert_eq!(result, free);
    }

    #[test]
    fn occlusion_splits_covered_area_out() {
        let free = alloc::vec![Rect::from_parts(0, 0, 100, 100)];
        let result = update_occlusions(free, Rect::from_parts(50, 50, 100, 100));
        // The overlap (50,50)-(100,100) must be gone, the rest preserved
        assert_eq!(area(&result), 100 * 100 - 50 * 50);
        for rect in &result {
            assert!(!rect.intersects(Rect::from_parts(50, 50, 100, 100)));
        }
    }

    #[test]
    fn full_occlusion_leaves_nothing() {
        let free = alloc::vec![Rect::from_parts(10, 10, 20, 20)];
        let result = update_occlusions(free, Rect::from_parts(0, 0, 100, 100));
        assert!(result.is_empty());
    }

    #[test]
    fn occlusion_scenario_two_windows() {
        // A=(0,0,100,100) behind B=(50,50,100,100); a dirty rect at
        // (40,40,30,30): A's visible set must still cover the part of the
        // dirty rect outside B, and nothing of A may overlap B.
        let a_frame = Rect::from_parts(0, 0, 100, 100);
        let b_frame = Rect::from_parts(50, 50, 100, 100);
        let a_visible = update_occlusions(alloc::vec![a_frame], b_frame);

        let dirty = Rect::from_parts(40, 40, 30, 30);
        let covered: i64 = a_visible
            .iter()
            .map(|r| {
                let i = r.intersect(dirty);
                i.size.width as i64 * i.size.height as i64
            })
            .sum();
        let b_overlap = b_frame.intersect(dirty);
        let expected = 30 * 30 - b_overlap.size.width as i64 * b_overlap.size.height as i64;
        assert_eq!(covered, expected);

        for rect in &a_visible {
            assert!(!rect.intersects(b_frame));
            assert!(a_frame.contains_rect(*rect));
        }
    }

    #[test]
    fn uncontested_rect_stays_fully_drawable() {
        // A rect inside a view's frame that no higher view touches must be
        // wholly inside the view's visible set.
        let frame = Rect::from_parts(0, 0, 200, 200);
        let occluder = Rect::from_parts(150, 0, 100, 50);
        let visible = update_occlusions(alloc::vec![frame], occluder);

        let probe = Rect::from_parts(10, 100, 50, 50);
        let covered: i64 = visible
            .iter()
            .map(|r| {
                let i = r.intersect(probe);
                i.size.width as i64 * i.size.height as i64
            })
            .sum();
        assert_eq!(covered, 50 * 50);
    }
}
