//! The window server's single owner struct: screen surfaces, the window
//! and shortcut collections, input state, animations, and timers.
//!
//! Views are addressed by handle (window id or shortcut index) through
//! owner vectors rather than pointers; the draw-order list is rebuilt on
//! demand.

use crate::animations::Animation;
use crate::compositor::CompositorQueue;
use crate::input::{KeyboardState, MouseState};
use crate::layer::{Color, Layer};
use crate::shortcuts::DesktopShortcut;
use crate::window::UserWindow;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_api_types::amc::{
    AMC_AWM_MAP_FRAMEBUFFER, AMC_AWM_MAP_FRAMEBUFFER_RESPONSE, AmcFramebufferInfo,
    CORE_SERVICE_NAME,
};
use kernel_api_types::awm::WindowId;
use kernel_api_types::geometry::{Point, Rect, Size};

/// The two screen surfaces: an owned back buffer composited into, and the
/// memory-mapped framebuffer blitted from it.
pub struct Screen {
    pub resolution: Size,
    pub bytes_per_pixel: u32,
    pub vmem: Layer,
    pub pmem: Layer,
}

/// Anything compositable: a user window, a desktop shortcut's view, or the
/// minimized-window hover preview.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewHandle {
    Window(WindowId),
    Shortcut(usize),
    MinimizedPreview,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    AnimationTick,
}

pub struct AwmTimer {
    pub start_time: u64,
    pub duration: u64,
    pub fires_after: u64,
    pub kind: TimerKind,
}

pub struct Desktop {
    pub screen: Screen,
    pub background: Layer,

    /// Owner array for every window, dock included.
    pub windows: Vec<UserWindow>,
    /// User windows, front-most first. Clicks reorder this list.
    pub windows_with_z_order: Vec<WindowId>,
    /// Dock-class overlays, always drawn in front, never reordered.
    pub windows_without_z_order: Vec<WindowId>,
    pub next_window_id: WindowId,

    pub windows_to_fetch_this_cycle: Vec<WindowId>,
    pub views_to_composite_this_cycle: Vec<ViewHandle>,

    pub shortcuts: Vec<DesktopShortcut>,
    /// Hover preview of a minimized window, shown above everything while
    /// the dock reports its task view hovered.
    pub minimized_preview: Option<crate::shortcuts::View>,

    pub compositor: CompositorQueue,
    pub mouse: MouseState,
    pub keyboard: KeyboardState,
    pub animations: Vec<Animation>,
    pub timers: Vec<AwmTimer>,
}

impl Desktop {
    /// Complete the boot handshake with the kernel and stand the desktop
    /// up: map the framebuffer, render the background, seed the shortcut
    /// grid.
    pub fn init() -> Self {
        ulib::amc::send_event(CORE_SERVICE_NAME, AMC_AWM_MAP_FRAMEBUFFER);
        let msg =
            ulib::amc::message_await_event(CORE_SERVICE_NAME, AMC_AWM_MAP_FRAMEBUFFER_RESPONSE);
        let framebuffer_info: AmcFramebufferInfo =
            msg.body_as().expect("malformed framebuffer info");
        log::info!(
            "awm framebuffer: {}x{}, {} bpp @ {:#x}",
            framebuffer_info.width,
            framebuffer_info.height,
            framebuffer_info.bits_per_pixel,
            framebuffer_info.address,
        );

        let resolution = Size::new(
            framebuffer_info.width as i32,
            framebuffer_info.height as i32,
        );
        let pmem =
            unsafe { Layer::from_raw(framebuffer_info.address as *mut u32, resolution) };
        let vmem = Layer::new(resolution);

        let mut background = Layer::new(resolution);
        background.fill_gradient(Color::new(0x2c, 0x3e, 0x50), Color::new(0x0b, 0x0f, 0x14));

        let mut desktop = Self {
            screen: Screen {
                resolution,
                bytes_per_pixel: framebuffer_info.bytes_per_pixel,
                vmem,
                pmem,
            },
            background,
            windows: Vec::new(),
            windows_with_z_order: Vec::new(),
            windows_without_z_order: Vec::new(),
            next_window_id: 0,
            windows_to_fetch_this_cycle: Vec::new(),
            views_to_composite_this_cycle: Vec::new(),
            shortcuts: Vec::new(),
            minimized_preview: None,
            compositor: CompositorQueue::new(),
            mouse: MouseState::new(Point::new(resolution.width / 2, resolution.height / 2)),
            keyboard: KeyboardState::default(),
            animations: Vec::new(),
            timers: Vec::new(),
        };
        desktop.install_default_shortcuts();

        // First frame: background everywhere
        let screen_frame = Rect::new(Point::zero(), resolution);
        crate::layer::blit_layer(
            &mut desktop.screen.vmem,
            &desktop.background,
            screen_frame,
            screen_frame,
        );
        crate::layer::blit_layer(
            &mut desktop.screen.pmem,
            &desktop.background,
            screen_frame,
            screen_frame,
        );
        desktop.compositor.queue_rect(screen_frame);
        desktop.invalidate_drawable_regions_in_rect(screen_frame);
        desktop
    }

    pub fn screen_frame(&self) -> Rect {
        Rect::new(Point::zero(), self.screen.resolution)
    }

    /// Every compositable view, front-most first: the hover preview, then
    /// overlays, then z-ordered windows, then desktop shortcuts.
    pub fn draw_order(&self) -> Vec<ViewHandle> {
        let mut order = Vec::with_capacity(
            1 + self.windows_without_z_order.len()
                + self.windows_with_z_order.len()
                + self.shortcuts.len(),
        );
        if self.minimized_preview.is_some() {
            order.push(ViewHandle::MinimizedPreview);
        }
        order.extend(self.windows_without_z_order.iter().map(|&id| ViewHandle::Window(id)));
        order.extend(self.windows_with_z_order.iter().map(|&id| ViewHandle::Window(id)));
        order.extend((0..self.shortcuts.len()).map(ViewHandle::Shortcut));
        order
    }

    pub fn view_frame(&self, handle: ViewHandle) -> Rect {
        match handle {
            ViewHandle::Window(id) => self
                .window_with_id(id)
                .map(|window| window.frame)
                .unwrap_or_else(Rect::zero),
            ViewHandle::Shortcut(idx) => self.shortcuts[idx].view.frame,
            ViewHandle::MinimizedPreview => self
                .minimized_preview
                .as_ref()
                .map(|view| view.frame)
                .unwrap_or_else(Rect::zero),
        }
    }

    pub fn queue_composite(&mut self, handle: ViewHandle) {
        if !self.views_to_composite_this_cycle.contains(&handle) {
            self.views_to_composite_this_cycle.push(handle);
        }
    }

    /// Clamp a frame fully on-screen, shifting it back by any overhang.
    pub fn rect_bind_to_screen_frame(&self, mut rect: Rect) -> Rect {
        rect.origin.x = rect.origin.x.max(0);
        rect.origin.y = rect.origin.y.max(0);
        let overhang_x = rect.max_x() - self.screen.resolution.width;
        if overhang_x > 0 {
            rect.origin.x -= overhang_x;
        }
        let overhang_y = rect.max_y() - self.screen.resolution.height;
        if overhang_y > 0 {
            rect.origin.y -= overhang_y;
        }
        rect
    }

    // --- Timers ---

    pub fn timer_start(&mut self, duration: u64, kind: TimerKind) {
        let now = ulib::ms_since_boot();
        self.timers.push(AwmTimer {
            start_time: now,
            duration,
            fires_after: now + duration,
            kind,
        });
    }

    /// Milliseconds until the next timer fires, if any are pending.
    /// `Some(0)` means a timer is already late.
    pub fn ms_until_next_timer(&self) -> Option<u64> {
        let next_fire = self.timers.iter().map(|timer| timer.fires_after).min()?;
        Some(next_fire.saturating_sub(ulib::ms_since_boot()))
    }

    pub fn dispatch_ready_timers(&mut self) {
        let now = ulib::ms_since_boot();
        let mut fired = Vec::new();
        self.timers.retain(|timer| {
            if timer.fires_after <= now {
                fired.push(timer.kind);
                false
            } else {
                true
            }
        });
        for kind in fired {
            match kind {
                TimerKind::AnimationTick => self.animations_tick(),
            }
        }
    }

    // --- Cross-module small helpers ---

    pub fn window_with_id(&self, id: WindowId) -> Option<&UserWindow> {
        self.windows.iter().find(|window| window.id == id)
    }

    pub fn window_with_id_mut(&mut self, id: WindowId) -> Option<&mut UserWindow> {
        self.windows.iter_mut().find(|window| window.id == id)
    }

    pub fn window_with_service_name(&self, service: &str) -> Option<&UserWindow> {
        self.windows.iter().find(|window| window.owner_service == service)
    }

    pub fn window_id_for_service(&self, service: &str) -> Option<WindowId> {
        self.window_with_service_name(service).map(|window| window.id)
    }

    pub fn service_of_window(&self, id: WindowId) -> Option<String> {
        self.window_with_id(id).map(|window| window.owner_service.clone())
    }
}
