// ============================================================================
// VIEW TRANSFORM — zoom + pan between world and screen space
// ============================================================================
//
//   screen = world * zoom + pan
//   world  = (screen - pan) / zoom
//
// Zoom is clamped to [zoom_floor, max_zoom] where zoom_floor frames the whole
// buffer inside the smaller container axis.  Pan is clamped so the viewport
// never shows anything outside [-half, half] on either axis:
//
//   container - half * zoom  <=  pan  <=  half * zoom
//
// When the buffer is narrower than the container on an axis (the lower bound
// exceeds the upper bound) the buffer is centered on that axis instead.

use egui::{Pos2, Rect, Vec2};

/// Default ratio applied by `zoom_in` / `zoom_out`.
pub const DEFAULT_ZOOM_STEP: f32 = 1.2;

/// Smallest zoom we ever allow, so a zero-sized container cannot produce a
/// non-invertible transform.
const MIN_ZOOM_EPSILON: f32 = 1e-3;

#[derive(Clone, Debug, PartialEq)]
pub struct ViewTransform {
    zoom: f32,
    pan: Vec2,
    container: Vec2,
    max_size: u32,
    max_zoom: f32,
    zoom_step: f32,
}

impl ViewTransform {
    /// A transform framing the whole buffer, centered in the container.
    pub fn new(max_size: u32, container_w: f32, container_h: f32, max_zoom: f32) -> Self {
        let mut view = Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            container: Vec2::new(container_w.max(0.0), container_h.max(0.0)),
            max_size: max_size.max(1),
            max_zoom: max_zoom.max(MIN_ZOOM_EPSILON),
            zoom_step: DEFAULT_ZOOM_STEP,
        };
        view.fit();
        view
    }

    pub fn with_zoom_step(mut self, step: f32) -> Self {
        if step > 1.0 {
            self.zoom_step = step;
        }
        self
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn container_size(&self) -> Vec2 {
        self.container
    }

    pub fn half_size(&self) -> f32 {
        self.max_size as f32 * 0.5
    }

    /// Smallest zoom that still frames the whole buffer.
    pub fn zoom_floor(&self) -> f32 {
        let fit = self.container.x.min(self.container.y) / self.max_size as f32;
        fit.max(MIN_ZOOM_EPSILON)
    }

    pub fn max_zoom(&self) -> f32 {
        self.max_zoom.max(self.zoom_floor())
    }

    // ---- coordinate mapping --------------------------------------------------

    pub fn world_to_screen(&self, world: Pos2) -> Pos2 {
        Pos2::new(world.x * self.zoom + self.pan.x, world.y * self.zoom + self.pan.y)
    }

    /// Exact inverse of `world_to_screen` (sub-pixel world position).
    pub fn screen_to_world_f32(&self, screen: Pos2) -> Pos2 {
        Pos2::new((screen.x - self.pan.x) / self.zoom, (screen.y - self.pan.y) / self.zoom)
    }

    /// World cell under a screen position, for hit-testing.
    pub fn screen_to_world(&self, screen: Pos2) -> (i32, i32) {
        let w = self.screen_to_world_f32(screen);
        (w.x.floor() as i32, w.y.floor() as i32)
    }

    /// World-space rectangle currently visible in the container.
    pub fn visible_world_rect(&self) -> Rect {
        Rect::from_min_max(
            self.screen_to_world_f32(Pos2::ZERO),
            self.screen_to_world_f32(self.container.to_pos2()),
        )
    }

    // ---- mutation ----------------------------------------------------------

    /// Set zoom so that the world point under `anchor` stays under `anchor`.
    pub fn zoom_at(&mut self, anchor: Pos2, new_zoom: f32) {
        let world = self.screen_to_world_f32(anchor);
        self.zoom = self.clamp_zoom(new_zoom);
        self.pan = Vec2::new(anchor.x - world.x * self.zoom, anchor.y - world.y * self.zoom);
        self.pan = self.clamp_pan(self.pan);
    }

    pub fn zoom_by(&mut self, factor: f32, anchor: Pos2) {
        if factor.is_finite() && factor > 0.0 {
            self.zoom_at(anchor, self.zoom * factor);
        }
    }

    pub fn zoom_in(&mut self, anchor: Pos2) {
        self.zoom_by(self.zoom_step, anchor);
    }

    pub fn zoom_out(&mut self, anchor: Pos2) {
        self.zoom_by(1.0 / self.zoom_step, anchor);
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan = self.clamp_pan(self.pan + delta);
    }

    /// New container size; zoom and pan are re-clamped against it.
    pub fn set_container_size(&mut self, width: f32, height: f32) {
        self.container = Vec2::new(width.max(0.0), height.max(0.0));
        self.clamp();
    }

    /// Frame the whole buffer at the smallest zoom, centered.
    pub fn fit(&mut self) {
        self.zoom = self.zoom_floor();
        self.pan = self.clamp_pan(self.container * 0.5);
    }

    /// Re-apply both clamps.  Clamping an in-range transform changes nothing.
    pub fn clamp(&mut self) {
        self.zoom = self.clamp_zoom(self.zoom);
        self.pan = self.clamp_pan(self.pan);
    }

    fn clamp_zoom(&self, zoom: f32) -> f32 {
        if !zoom.is_finite() {
            return self.zoom_floor();
        }
        zoom.max(self.zoom_floor()).min(self.max_zoom())
    }

    fn clamp_pan(&self, pan: Vec2) -> Vec2 {
        let extent = self.half_size() * self.zoom;
        let axis = |p: f32, container: f32| {
            let lower = container - extent;
            let upper = extent;
            if lower > upper { container * 0.5 } else { p.clamp(lower, upper) }
        };
        Vec2::new(axis(pan.x, self.container.x), axis(pan.y, self.container.y))
    }
}
