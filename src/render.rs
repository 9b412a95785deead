// ============================================================================
// RENDER PIPELINE — dirty-region sync + two-pass draw, once per frame
// ============================================================================
//
// Per frame:  Idle → DirtySync → Draw → Idle
//
//   DirtySync  `Full`  → re-upload the entire buffer
//              `Rect`  → upload only the dirty sub-rectangle
//              `Clean` → nothing to upload
//   Draw       background quad over world [-half, half]², then the canvas
//              texture over it (alpha blended), both through
//              screen = world * zoom + pan.
//
// The pipeline does not know what a GPU is; it drives a `RenderBackend`.
// `GpuRenderer` (wgpu) is the real one, `MirrorBackend` keeps a CPU copy of
// the texture and rasterizes the same two passes in software for headless
// export and tests.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{BufferRect, DirtyRegion, PixelBuffer};
use crate::view::ViewTransform;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum RenderError {
    /// No adapter (hardware or software fallback) could be acquired.
    NoAdapter,
    Device(String),
    /// Shader / pipeline / texture creation failed validation.
    Resource(String),
    Readback(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::NoAdapter => write!(f, "no GPU adapter available"),
            RenderError::Device(e) => write!(f, "GPU device request failed: {}", e),
            RenderError::Resource(e) => write!(f, "GPU resource creation failed: {}", e),
            RenderError::Readback(e) => write!(f, "GPU readback failed: {}", e),
        }
    }
}

impl std::error::Error for RenderError {}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// Everything a draw needs, already resolved from the view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawParams {
    pub zoom: f32,
    pub pan: [f32; 2],
    pub viewport: [f32; 2],
    pub half_size: f32,
    pub background: Rgba<u8>,
}

impl DrawParams {
    pub fn from_view(view: &ViewTransform, background: Rgba<u8>) -> Self {
        let pan = view.pan();
        let container = view.container_size();
        Self {
            zoom: view.zoom(),
            pan: [pan.x, pan.y],
            viewport: [container.x, container.y],
            half_size: view.half_size(),
            background,
        }
    }
}

pub trait RenderBackend {
    fn name(&self) -> &str;

    /// Replace the whole texture (allocating it if `size` changed).  An error
    /// means the backend has no usable texture.
    fn upload_full(&mut self, size: u32, rgba: &[u8]) -> Result<(), RenderError>;

    /// Overwrite the texels inside `rect` with packed RGBA rows.
    fn upload_rect(&mut self, rect: BufferRect, rgba: &[u8]);

    /// The draw target follows the container size.
    fn resize_target(&mut self, _width: u32, _height: u32) {}

    fn draw(&mut self, params: &DrawParams);

    /// Current texture contents (for verification and export).
    fn read_texture(&mut self) -> Option<Vec<u8>>;

    /// Last drawn frame, if the backend keeps one.
    fn read_target(&mut self) -> Option<RgbaImage>;
}

// ============================================================================
// PIPELINE STATE MACHINE
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderPhase {
    #[default]
    Idle,
    DirtySync,
    Draw,
}

/// What one frame did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub full_upload: bool,
    pub uploaded_bytes: usize,
    pub synced: Option<BufferRect>,
}

pub struct RenderPipeline {
    backend: Box<dyn RenderBackend>,
    phase: RenderPhase,
    frames: u64,
    /// Size of the texture the backend currently holds (0 = none yet).
    texture_size: u32,
    /// Set by the first failed full upload; later frames skip the sync.
    texture_failed: bool,
}

impl RenderPipeline {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        log::info!("Render backend: {}", backend.name());
        Self {
            backend,
            phase: RenderPhase::Idle,
            frames: 0,
            texture_size: 0,
            texture_failed: false,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames
    }

    /// The backend rejected the canvas texture; only the background is drawn.
    pub fn texture_failed(&self) -> bool {
        self.texture_failed
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.backend
            .resize_target(width.max(1.0).round() as u32, height.max(1.0).round() as u32);
    }

    pub fn read_texture(&mut self) -> Option<Vec<u8>> {
        self.backend.read_texture()
    }

    pub fn read_target(&mut self) -> Option<RgbaImage> {
        self.backend.read_target()
    }

    /// Sync whatever is dirty, then draw.
    pub fn run_frame(&mut self, pixels: &mut PixelBuffer, view: &ViewTransform, background: Rgba<u8>) -> FrameStats {
        self.phase = RenderPhase::DirtySync;
        let mut dirty = pixels.take_dirty();
        if self.texture_failed {
            dirty = DirtyRegion::Clean;
        } else if self.texture_size != pixels.size() {
            dirty = DirtyRegion::Full;
        }

        let (full_upload, uploaded_bytes, synced) = match dirty {
            DirtyRegion::Clean => (false, 0, None),
            DirtyRegion::Full => {
                let size = pixels.size();
                match self.backend.upload_full(size, pixels.as_raw()) {
                    Ok(()) => {
                        self.texture_size = size;
                        let all = BufferRect { min_x: 0, min_y: 0, max_x: size - 1, max_y: size - 1 };
                        (true, pixels.as_raw().len(), Some(all))
                    }
                    Err(e) => {
                        log::error!("{} disabled canvas uploads: {}", self.backend.name(), e);
                        self.texture_size = 0;
                        self.texture_failed = true;
                        (false, 0, None)
                    }
                }
            }
            DirtyRegion::Rect(rect) => {
                let data = pixels.extract_rect(rect);
                self.backend.upload_rect(rect, &data);
                (false, data.len(), Some(rect))
            }
        };

        self.phase = RenderPhase::Draw;
        self.backend.draw(&DrawParams::from_view(view, background));
        self.frames += 1;
        self.phase = RenderPhase::Idle;

        log::trace!(
            "frame {}: full={} uploaded={}B synced={:?}",
            self.frames, full_upload, uploaded_bytes, synced
        );
        FrameStats { frame: self.frames, full_upload, uploaded_bytes, synced }
    }
}

// ============================================================================
// MIRROR BACKEND — CPU texture + software rasterizer
// ============================================================================

/// Keeps the "texture" in system memory and draws the same two passes the GPU
/// path draws.  Used when no GPU is wanted (headless export) and by tests to
/// check that partial syncs leave the texture identical to the buffer.
#[derive(Default)]
pub struct MirrorBackend {
    size: u32,
    texture: Vec<u8>,
    target_size: (u32, u32),
    target: Option<RgbaImage>,
    draws: u64,
}

impl MirrorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also rasterize every draw into a `width`×`height` target.
    pub fn with_target(width: u32, height: u32) -> Self {
        Self { target_size: (width, height), ..Self::default() }
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    fn texel(&self, bx: u32, by: u32) -> [u8; 4] {
        let o = (by as usize * self.size as usize + bx as usize) * 4;
        [self.texture[o], self.texture[o + 1], self.texture[o + 2], self.texture[o + 3]]
    }

    fn rasterize(&self, params: &DrawParams) -> RgbaImage {
        let (w, h) = self.target_size;
        let mut img = RgbaImage::new(w, h);
        let half = params.half_size;
        let bg = params.background.0;
        let size = self.size;

        img.as_mut()
            .par_chunks_mut(w as usize * 4)
            .enumerate()
            .for_each(|(sy, row)| {
                for (sx, out) in row.chunks_exact_mut(4).enumerate() {
                    // Sample at the pixel center.
                    let wx = (sx as f32 + 0.5 - params.pan[0]) / params.zoom;
                    let wy = (sy as f32 + 0.5 - params.pan[1]) / params.zoom;
                    if wx < -half || wx >= half || wy < -half || wy >= half {
                        continue;
                    }
                    let bx = ((wx + half).floor() as u32).min(size.saturating_sub(1));
                    let by = ((wy + half).floor() as u32).min(size.saturating_sub(1));
                    let src = if size > 0 { self.texel(bx, by) } else { [0; 4] };
                    out.copy_from_slice(&blend_over(src, bg));
                }
            });
        img
    }
}

/// Straight-alpha "source over destination", matching the GPU blend state.
fn blend_over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let mix = |s: u8, d: u8| (s as f32 * sa + d as f32 * (1.0 - sa)).round().clamp(0.0, 255.0) as u8;
    let a = (sa + da * (1.0 - sa)) * 255.0;
    [mix(src[0], dst[0]), mix(src[1], dst[1]), mix(src[2], dst[2]), a.round().clamp(0.0, 255.0) as u8]
}

impl RenderBackend for MirrorBackend {
    fn name(&self) -> &str {
        "cpu-mirror"
    }

    fn upload_full(&mut self, size: u32, rgba: &[u8]) -> Result<(), RenderError> {
        if rgba.len() != size as usize * size as usize * 4 {
            return Err(RenderError::Resource(format!(
                "{} bytes for a {}x{} texture",
                rgba.len(),
                size,
                size
            )));
        }
        self.size = size;
        self.texture.clear();
        self.texture.extend_from_slice(rgba);
        Ok(())
    }

    fn upload_rect(&mut self, rect: BufferRect, rgba: &[u8]) {
        let row_len = rect.width() as usize * 4;
        for (i, row) in rgba.chunks_exact(row_len).enumerate() {
            let by = rect.min_y as usize + i;
            let start = (by * self.size as usize + rect.min_x as usize) * 4;
            if start + row_len <= self.texture.len() {
                self.texture[start..start + row_len].copy_from_slice(row);
            }
        }
    }

    fn resize_target(&mut self, width: u32, height: u32) {
        if self.target_size != (0, 0) {
            self.target_size = (width, height);
        }
    }

    fn draw(&mut self, params: &DrawParams) {
        self.draws += 1;
        if self.target_size.0 > 0 && self.target_size.1 > 0 {
            self.target = Some(self.rasterize(params));
        }
    }

    fn read_texture(&mut self) -> Option<Vec<u8>> {
        if self.size == 0 { None } else { Some(self.texture.clone()) }
    }

    fn read_target(&mut self) -> Option<RgbaImage> {
        self.target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelDelta;
    use std::cell::Cell;
    use std::rc::Rc;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn first_frame_uploads_everything_then_only_dirty_cells() {
        let mut pixels = PixelBuffer::new(8);
        let view = ViewTransform::new(8, 8.0, 8.0, 100.0);
        let mut pipeline = RenderPipeline::new(Box::new(MirrorBackend::new()));

        let first = pipeline.run_frame(&mut pixels, &view, WHITE);
        assert!(first.full_upload);
        assert_eq!(first.uploaded_bytes, 8 * 8 * 4);
        assert_eq!(pipeline.phase(), RenderPhase::Idle);

        let idle = pipeline.run_frame(&mut pixels, &view, WHITE);
        assert_eq!(idle.uploaded_bytes, 0);
        assert_eq!(idle.synced, None);

        let mut d = PixelDelta::new();
        d.paint(-4, -4, Rgba([1, 2, 3, 255]));
        pixels.apply(&d);
        let partial = pipeline.run_frame(&mut pixels, &view, WHITE);
        assert_eq!(partial.synced, Some(BufferRect::point(0, 0)));
        assert_eq!(partial.uploaded_bytes, 4);
        assert_eq!(pipeline.frames_drawn(), 3);
    }

    #[test]
    fn software_draw_puts_row_zero_at_the_top() {
        let mut pixels = PixelBuffer::new(4);
        let view = ViewTransform::new(4, 8.0, 8.0, 100.0);
        let mut pipeline = RenderPipeline::new(Box::new(MirrorBackend::with_target(8, 8)));

        let red = Rgba([255, 0, 0, 255]);
        let mut d = PixelDelta::new();
        d.paint(-2, -2, red);
        pixels.apply(&d);
        pipeline.run_frame(&mut pixels, &view, WHITE);

        let frame = pipeline.read_target().expect("target configured");
        // zoom = 2: world (-2,-2) covers screen (0..2, 0..2).
        assert_eq!(*frame.get_pixel(0, 0), red);
        assert_eq!(*frame.get_pixel(1, 1), red);
        assert_eq!(*frame.get_pixel(2, 0), WHITE);
        assert_eq!(*frame.get_pixel(0, 7), WHITE);
    }

    #[derive(Default)]
    struct Calls {
        full_attempts: Cell<usize>,
        rect_uploads: Cell<usize>,
        draws: Cell<usize>,
    }

    /// Backend whose texture allocation always fails.
    struct RejectingBackend(Rc<Calls>);

    impl RenderBackend for RejectingBackend {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn upload_full(&mut self, size: u32, _rgba: &[u8]) -> Result<(), RenderError> {
            self.0.full_attempts.set(self.0.full_attempts.get() + 1);
            Err(RenderError::Resource(format!("no room for {}x{}", size, size)))
        }

        fn upload_rect(&mut self, _rect: BufferRect, _rgba: &[u8]) {
            self.0.rect_uploads.set(self.0.rect_uploads.get() + 1);
        }

        fn draw(&mut self, _params: &DrawParams) {
            self.0.draws.set(self.0.draws.get() + 1);
        }

        fn read_texture(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn read_target(&mut self) -> Option<RgbaImage> {
            None
        }
    }

    #[test]
    fn texture_failure_is_reported_once_and_not_retried() {
        let mut pixels = PixelBuffer::new(8);
        let view = ViewTransform::new(8, 8.0, 8.0, 100.0);
        let calls = Rc::new(Calls::default());
        let mut pipeline = RenderPipeline::new(Box::new(RejectingBackend(calls.clone())));

        let first = pipeline.run_frame(&mut pixels, &view, WHITE);
        assert!(!first.full_upload);
        assert_eq!(first.synced, None);
        assert!(pipeline.texture_failed());

        for i in 0..3 {
            let mut d = PixelDelta::new();
            d.paint(i, 0, Rgba([9, 9, 9, 255]));
            pixels.apply(&d);
            let stats = pipeline.run_frame(&mut pixels, &view, WHITE);
            assert_eq!(stats.uploaded_bytes, 0);
        }
        assert_eq!(pipeline.frames_drawn(), 4);
        assert_eq!(calls.full_attempts.get(), 1);
        assert_eq!(calls.rect_uploads.get(), 0);
        assert_eq!(calls.draws.get(), 4);
        assert_eq!(pipeline.backend_name(), "rejecting");
        // Dirty marks are still consumed.
        assert!(pixels.dirty().is_clean());
    }

    #[test]
    fn translucent_texels_blend_over_background() {
        assert_eq!(blend_over([0, 0, 0, 0], [10, 20, 30, 255]), [10, 20, 30, 255]);
        assert_eq!(blend_over([200, 0, 0, 255], [10, 20, 30, 255]), [200, 0, 0, 255]);
        let half = blend_over([255, 255, 255, 128], [0, 0, 0, 255]);
        assert_eq!(half[3], 255);
        assert!((127..=129).contains(&half[0]));
    }
}
