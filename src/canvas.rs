use std::collections::HashMap;
use std::collections::hash_map;
use std::rc::Rc;

use egui::{Pos2, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::color::{self, EMPTY};
use crate::render::{FrameStats, RenderBackend, RenderPipeline};
use crate::scheduler::{FrameHandle, FrameScheduler, FrameTask};
use crate::view::ViewTransform;

// ============================================================================
// PIXEL DELTA — sparse set of per-pixel mutations
// ============================================================================

/// What happens to one pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelEdit {
    Paint(Rgba<u8>),
    /// Reset to empty (alpha 0).
    Erase,
}

impl PixelEdit {
    /// The value a pixel holds after this edit, using `None` for empty.
    pub fn resulting_color(self) -> Option<Rgba<u8>> {
        match self {
            PixelEdit::Paint(c) if !color::is_empty(c) => Some(c),
            _ => None,
        }
    }

    /// Edit that restores a pixel to `value`.
    pub fn from_color(value: Option<Rgba<u8>>) -> Self {
        match value {
            Some(c) if !color::is_empty(c) => PixelEdit::Paint(c),
            _ => PixelEdit::Erase,
        }
    }
}

/// Sparse map from world coordinate to edit.  Keys are unique and the last
/// write for a key wins; iteration order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelDelta {
    edits: HashMap<(i32, i32), PixelEdit>,
}

impl PixelDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self { edits: HashMap::with_capacity(n) }
    }

    pub fn insert(&mut self, x: i32, y: i32, edit: PixelEdit) {
        self.edits.insert((x, y), edit);
    }

    pub fn paint(&mut self, x: i32, y: i32, c: Rgba<u8>) {
        self.insert(x, y, PixelEdit::Paint(c));
    }

    pub fn erase(&mut self, x: i32, y: i32) {
        self.insert(x, y, PixelEdit::Erase);
    }

    pub fn get(&self, x: i32, y: i32) -> Option<PixelEdit> {
        self.edits.get(&(x, y)).copied()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.edits.contains_key(&(x, y))
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((i32, i32), PixelEdit)> + '_ {
        self.edits.iter().map(|(k, v)| (*k, *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.edits.keys().copied()
    }

    /// Overlay `other` on top of `self` (entries in `other` win).
    pub fn merge(&mut self, other: &PixelDelta) {
        for (k, v) in other.iter() {
            self.edits.insert(k, v);
        }
    }

    pub(crate) fn entry(&mut self, x: i32, y: i32) -> hash_map::Entry<'_, (i32, i32), PixelEdit> {
        self.edits.entry((x, y))
    }

    /// Approximate heap footprint, used by the history memory cap.
    pub fn memory_size(&self) -> usize {
        self.edits.len() * (std::mem::size_of::<(i32, i32)>() + std::mem::size_of::<PixelEdit>())
    }
}

impl FromIterator<((i32, i32), PixelEdit)> for PixelDelta {
    fn from_iter<I: IntoIterator<Item = ((i32, i32), PixelEdit)>>(iter: I) -> Self {
        Self { edits: iter.into_iter().collect() }
    }
}

// ============================================================================
// DIRTY REGION — what the texture is missing since the last sync
// ============================================================================

/// Inclusive rectangle in buffer space (`0..size` on both axes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BufferRect {
    pub fn point(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y }
    }

    pub fn union(self, other: BufferRect) -> BufferRect {
        BufferRect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Pending texture sync state.  Marks only ever grow until a sync takes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirtyRegion {
    #[default]
    Clean,
    Rect(BufferRect),
    /// Whole-buffer resync (after `clear` / `load_pixels`).
    Full,
}

impl DirtyRegion {
    pub fn mark(&mut self, rect: BufferRect) {
        *self = match *self {
            DirtyRegion::Clean => DirtyRegion::Rect(rect),
            DirtyRegion::Rect(existing) => DirtyRegion::Rect(existing.union(rect)),
            DirtyRegion::Full => DirtyRegion::Full,
        };
    }

    pub fn mark_full(&mut self) {
        *self = DirtyRegion::Full;
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, DirtyRegion::Clean)
    }

    /// Hand the region to a sync and reset to `Clean`.
    pub fn take(&mut self) -> DirtyRegion {
        std::mem::take(self)
    }
}

// ============================================================================
// PIXEL BUFFER — authoritative square RGBA grid
// ============================================================================

/// Largest accepted buffer side (64 MiB of RGBA).  Must stay even.
pub const MAX_BUFFER_SIZE: u32 = 4096;

/// `Some(size)` when `size` can back a buffer without adjustment other than
/// even rounding.
pub fn checked_buffer_size(size: u32) -> Option<u32> {
    (1..=MAX_BUFFER_SIZE).contains(&size).then_some(size)
}

/// Square RGBA8 buffer addressed by world coordinates in `[-half, half)`.
/// Row-major; buffer row 0 is world `y = -half`.
#[derive(Clone)]
pub struct PixelBuffer {
    size: u32,
    half: i32,
    data: Vec<u8>,
    dirty: DirtyRegion,
}

impl PixelBuffer {
    /// Create an empty buffer.  Odd or tiny sizes are rounded up to the next
    /// even size ≥ 2 so the world range stays symmetric; sizes above
    /// `MAX_BUFFER_SIZE` are clamped to it.
    pub fn new(size: u32) -> Self {
        let clamped = size.clamp(2, MAX_BUFFER_SIZE);
        let even = clamped.checked_add(clamped & 1).unwrap_or(MAX_BUFFER_SIZE);
        if even != size {
            log::warn!("PixelBuffer::new: size {} adjusted to {}", size, even);
        }
        Self {
            size: even,
            half: (even / 2) as i32,
            data: vec![0; even as usize * even as usize * 4],
            dirty: DirtyRegion::Full,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn half(&self) -> i32 {
        self.half
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= -self.half && x < self.half && y >= -self.half && y < self.half
    }

    /// World → buffer cell, `None` outside.
    #[inline]
    pub fn to_buffer(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        if self.in_bounds(x, y) {
            Some(((x + self.half) as u32, (y + self.half) as u32))
        } else {
            None
        }
    }

    /// Buffer cell → world.
    #[inline]
    pub fn to_world(&self, bx: u32, by: u32) -> (i32, i32) {
        (bx as i32 - self.half, by as i32 - self.half)
    }

    #[inline]
    fn byte_offset(&self, bx: u32, by: u32) -> usize {
        (by as usize * self.size as usize + bx as usize) * 4
    }

    /// Bounds-checked read; out-of-range coordinates and alpha-0 cells read as `None`.
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<Rgba<u8>> {
        let (bx, by) = self.to_buffer(x, y)?;
        let o = self.byte_offset(bx, by);
        let px = Rgba([self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]);
        if color::is_empty(px) { None } else { Some(px) }
    }

    /// Write every in-bounds entry of `delta`; out-of-range entries are
    /// skipped.  The union of touched cells is merged into the dirty region.
    /// Returns the number of cells written.
    pub fn apply(&mut self, delta: &PixelDelta) -> usize {
        let mut touched: Option<BufferRect> = None;
        let mut written = 0;
        for ((x, y), edit) in delta.iter() {
            let Some((bx, by)) = self.to_buffer(x, y) else { continue };
            let value = match edit {
                PixelEdit::Paint(c) => c,
                PixelEdit::Erase => EMPTY,
            };
            let o = self.byte_offset(bx, by);
            self.data[o..o + 4].copy_from_slice(&value.0);
            let cell = BufferRect::point(bx, by);
            touched = Some(touched.map_or(cell, |r| r.union(cell)));
            written += 1;
        }
        if let Some(rect) = touched {
            self.dirty.mark(rect);
        }
        written
    }

    /// Empty every cell and schedule a full resync.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.dirty.mark_full();
    }

    /// Replace the contents with a dense snapshot (full resync).
    pub fn load(&mut self, snapshot: &PixelDelta) {
        self.clear();
        self.apply(snapshot);
        self.dirty.mark_full();
    }

    /// Every non-empty cell as a delta.  O(area); for persistence only.
    pub fn all_pixels(&self) -> PixelDelta {
        let row_bytes = self.size as usize * 4;
        let half = self.half;
        self.data
            .par_chunks(row_bytes)
            .enumerate()
            .flat_map_iter(|(by, row)| {
                row.chunks_exact(4).enumerate().filter_map(move |(bx, px)| {
                    if px[3] == 0 {
                        return None;
                    }
                    let world = (bx as i32 - half, by as i32 - half);
                    Some((world, PixelEdit::Paint(Rgba([px[0], px[1], px[2], px[3]]))))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    pub fn dirty(&self) -> DirtyRegion {
        self.dirty
    }

    pub fn take_dirty(&mut self) -> DirtyRegion {
        self.dirty.take()
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Packed RGBA bytes for `rect` (for a partial texture upload).
    pub fn extract_rect(&self, rect: BufferRect) -> Vec<u8> {
        let max_x = rect.max_x.min(self.size - 1);
        let max_y = rect.max_y.min(self.size - 1);
        let row_len = (max_x - rect.min_x + 1) as usize * 4;
        let mut out = Vec::with_capacity(row_len * (max_y - rect.min_y + 1) as usize);
        for by in rect.min_y..=max_y {
            let start = self.byte_offset(rect.min_x, by);
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        out
    }

    /// Flatten into an image (buffer row 0 on top).
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.size, self.size, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.size, self.size))
    }
}

// ============================================================================
// CANVAS — public surface: pixels + view + coalesced rendering
// ============================================================================

pub struct Canvas {
    pixels: PixelBuffer,
    view: ViewTransform,
    renderer: RenderPipeline,
    scheduler: Rc<dyn FrameScheduler>,
    /// At most one render request is ever queued.
    pending_render: Option<FrameHandle>,
    background: Rgba<u8>,
}

impl Canvas {
    pub fn new(
        max_size: u32,
        view: ViewTransform,
        backend: Box<dyn RenderBackend>,
        scheduler: Rc<dyn FrameScheduler>,
        background: Rgba<u8>,
    ) -> Self {
        let pixels = PixelBuffer::new(max_size);
        let mut canvas = Self {
            pixels,
            view,
            renderer: RenderPipeline::new(backend),
            scheduler,
            pending_render: None,
            background,
        };
        canvas.render();
        canvas
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn renderer(&self) -> &RenderPipeline {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut RenderPipeline {
        &mut self.renderer
    }

    pub fn background(&self) -> Rgba<u8> {
        self.background
    }

    pub fn size(&self) -> u32 {
        self.pixels.size()
    }

    // ---- pixel surface ------------------------------------------------------

    pub fn get_pixel(&self, x: i32, y: i32) -> Option<Rgba<u8>> {
        self.pixels.get_pixel(x, y)
    }

    pub fn get_all_pixels(&self) -> PixelDelta {
        self.pixels.all_pixels()
    }

    /// Apply a delta and request a redraw.  Returns the number of cells written.
    pub fn apply_pixels(&mut self, delta: &PixelDelta) -> usize {
        if delta.is_empty() {
            return 0;
        }
        let written = self.pixels.apply(delta);
        if written > 0 {
            self.render();
        }
        written
    }

    pub fn clear(&mut self) {
        self.pixels.clear();
        self.render();
    }

    pub fn load_pixels(&mut self, snapshot: &PixelDelta) {
        self.pixels.load(snapshot);
        log::debug!("Canvas: loaded snapshot with {} pixels", snapshot.len());
        self.render();
    }

    // ---- view ---------------------------------------------------------------

    pub fn pan_by(&mut self, delta: Vec2) {
        self.view.pan_by(delta);
        self.render();
    }

    pub fn zoom_at(&mut self, anchor: Pos2, new_zoom: f32) {
        self.view.zoom_at(anchor, new_zoom);
        self.render();
    }

    pub fn zoom_by(&mut self, factor: f32, anchor: Pos2) {
        self.view.zoom_by(factor, anchor);
        self.render();
    }

    pub fn set_container_size(&mut self, width: f32, height: f32) {
        self.view.set_container_size(width, height);
        self.renderer.resize(width, height);
        self.render();
    }

    pub fn fit(&mut self) {
        self.view.fit();
        self.render();
    }

    // ---- rendering ----------------------------------------------------------

    /// Request a redraw on the next frame.  Requests coalesce: while one is
    /// pending, further calls are no-ops.
    pub fn render(&mut self) {
        if self.pending_render.is_none() {
            self.pending_render = Some(self.scheduler.request_frame(FrameTask::Render));
        }
    }

    pub fn render_pending(&self) -> bool {
        self.pending_render.is_some()
    }

    /// Run the pending render now (sync + draw).  Called by the frame loop;
    /// does nothing when no render was requested.
    pub fn render_frame(&mut self) -> Option<FrameStats> {
        let handle = self.pending_render.take()?;
        self.scheduler.cancel(handle);
        Some(self.renderer.run_frame(&mut self.pixels, &self.view, self.background))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MirrorBackend;
    use crate::scheduler::FrameQueue;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn canvas(size: u32) -> (Canvas, Rc<FrameQueue>) {
        let queue = Rc::new(FrameQueue::new());
        let view = ViewTransform::new(size, 400.0, 400.0, 100.0);
        let c = Canvas::new(size, view, Box::new(MirrorBackend::new()), queue.clone(), Rgba([255; 4]));
        (c, queue)
    }

    #[test]
    fn out_of_bounds_reads_are_empty_and_writes_are_dropped() {
        let mut buf = PixelBuffer::new(4);
        let mut d = PixelDelta::new();
        d.paint(-2, -2, RED);
        d.paint(2, 0, RED);
        d.paint(0, -3, RED);
        assert_eq!(buf.apply(&d), 1);
        assert_eq!(buf.get_pixel(-2, -2), Some(RED));
        assert_eq!(buf.get_pixel(2, 0), None);
        assert_eq!(buf.get_pixel(i32::MIN, i32::MAX), None);
    }

    #[test]
    fn sizes_are_rounded_even_and_capped() {
        assert_eq!(PixelBuffer::new(7).size(), 8);
        assert_eq!(PixelBuffer::new(0).size(), 2);
        assert_eq!(PixelBuffer::new(MAX_BUFFER_SIZE + 1).size(), MAX_BUFFER_SIZE);
        assert_eq!(PixelBuffer::new(u32::MAX).size(), MAX_BUFFER_SIZE);
        assert_eq!(checked_buffer_size(u32::MAX), None);
        assert_eq!(checked_buffer_size(0), None);
        assert_eq!(checked_buffer_size(1000), Some(1000));
    }

    #[test]
    fn applying_a_delta_twice_is_idempotent() {
        let mut buf = PixelBuffer::new(8);
        let mut d = PixelDelta::new();
        d.paint(0, 0, RED);
        d.paint(1, 0, BLUE);
        d.erase(-1, -1);
        buf.apply(&d);
        let once = buf.as_raw().to_vec();
        buf.apply(&d);
        assert_eq!(buf.as_raw(), &once[..]);
    }

    #[test]
    fn last_write_wins_within_a_delta() {
        let mut d = PixelDelta::new();
        d.paint(3, 3, RED);
        d.erase(3, 3);
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(3, 3), Some(PixelEdit::Erase));
    }

    #[test]
    fn dirty_region_unions_and_resets_on_take() {
        let mut buf = PixelBuffer::new(16);
        buf.take_dirty();
        let mut a = PixelDelta::new();
        a.paint(-8, -8, RED);
        buf.apply(&a);
        let mut b = PixelDelta::new();
        b.paint(2, 3, RED);
        buf.apply(&b);
        assert_eq!(
            buf.dirty(),
            DirtyRegion::Rect(BufferRect { min_x: 0, min_y: 0, max_x: 10, max_y: 11 })
        );
        assert!(matches!(buf.take_dirty(), DirtyRegion::Rect(_)));
        assert!(buf.dirty().is_clean());
    }

    #[test]
    fn clear_and_load_force_full_resync() {
        let mut buf = PixelBuffer::new(8);
        buf.take_dirty();
        buf.clear();
        assert_eq!(buf.take_dirty(), DirtyRegion::Full);

        let mut snap = PixelDelta::new();
        snap.paint(0, 0, RED);
        buf.load(&snap);
        assert_eq!(buf.dirty(), DirtyRegion::Full);
        // Marks after a full resync stay full.
        buf.apply(&snap);
        assert_eq!(buf.dirty(), DirtyRegion::Full);
    }

    #[test]
    fn all_pixels_returns_only_non_empty_cells() {
        let mut buf = PixelBuffer::new(8);
        let mut d = PixelDelta::new();
        d.paint(-4, 3, RED);
        d.paint(1, 1, BLUE);
        d.paint(2, 2, Rgba([9, 9, 9, 0]));
        buf.apply(&d);
        let all = buf.all_pixels();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(-4, 3), Some(PixelEdit::Paint(RED)));
        assert_eq!(all.get(1, 1), Some(PixelEdit::Paint(BLUE)));
    }

    #[test]
    fn extract_rect_packs_rows() {
        let mut buf = PixelBuffer::new(4);
        let mut d = PixelDelta::new();
        d.paint(0, 0, RED); // buffer (2,2)
        buf.apply(&d);
        let bytes = buf.extract_rect(BufferRect { min_x: 1, min_y: 2, max_x: 2, max_y: 2 });
        assert_eq!(bytes, vec![0, 0, 0, 0, 255, 0, 0, 255]);
    }

    #[test]
    fn render_requests_coalesce_into_one_pending_frame() {
        let (mut c, queue) = canvas(8);
        assert_eq!(queue.pending(), 1);
        let mut d = PixelDelta::new();
        d.paint(0, 0, RED);
        c.apply_pixels(&d);
        c.render();
        c.apply_pixels(&d);
        assert_eq!(queue.pending(), 1);

        let stats = c.render_frame().expect("a render was pending");
        assert!(stats.full_upload);
        assert!(!c.render_pending());
        assert_eq!(queue.pending(), 0);
        assert!(c.render_frame().is_none());
    }

    #[test]
    fn synced_texture_matches_buffer_after_partial_updates() {
        let (mut c, _queue) = canvas(32);
        c.render_frame();

        for i in 0..10 {
            let mut d = PixelDelta::new();
            d.paint(i - 5, 2 * i - 16, Rgba([i as u8 * 20, 0, 0, 255]));
            d.erase(-i, i);
            c.apply_pixels(&d);
            if i % 3 == 0 {
                let stats = c.render_frame().unwrap();
                assert!(!stats.full_upload);
            }
        }
        c.render_frame();
        let tex = c.renderer_mut().read_texture().expect("mirror keeps a texture");
        assert_eq!(tex, c.pixels().as_raw());
    }

    #[test]
    fn view_gestures_request_renders_and_resize_retargets() {
        let queue = Rc::new(FrameQueue::new());
        let view = ViewTransform::new(8, 16.0, 16.0, 100.0);
        let mut c = Canvas::new(8, view, Box::new(MirrorBackend::with_target(16, 16)), queue.clone(), Rgba([255; 4]));
        c.render_frame();
        assert!(!c.render_pending());

        c.zoom_at(Pos2::new(8.0, 8.0), 4.0);
        assert!(c.render_pending());
        assert_eq!(c.view().zoom(), 4.0);
        c.render_frame();

        c.pan_by(Vec2::new(3.0, 0.0));
        assert!(c.render_pending());
        c.render_frame();

        c.zoom_by(0.5, Pos2::new(8.0, 8.0));
        assert!(c.render_pending());
        assert_eq!(queue.pending(), 1);
        c.render_frame();

        c.fit();
        assert!(c.render_pending());
        assert_eq!(c.view().zoom(), 2.0);
        c.render_frame();

        c.set_container_size(32.0, 24.0);
        assert!(c.render_pending());
        c.render_frame();
        let frame = c.renderer_mut().read_target().expect("mirror keeps a target");
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(c.renderer().frames_drawn(), 6);
    }

    #[test]
    fn partial_upload_is_bounded_by_dirty_area() {
        let (mut c, _queue) = canvas(64);
        c.render_frame();
        let mut d = PixelDelta::new();
        d.paint(0, 0, RED);
        d.paint(1, 1, RED);
        c.apply_pixels(&d);
        let stats = c.render_frame().unwrap();
        assert_eq!(stats.uploaded_bytes, 2 * 2 * 4);
    }
}
