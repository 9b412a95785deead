use std::collections::HashMap;

use image::Rgba;

use crate::canvas::{PixelBuffer, PixelDelta, PixelEdit};

// ============================================================================
// TOOL CONTRACT
// ============================================================================

/// Per-event parameters a tool draws with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolContext {
    pub color: Rgba<u8>,
    /// Side of the square stamp, in cells.
    pub brush_size: u32,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self { color: Rgba([0, 0, 0, 255]), brush_size: 1 }
    }
}

/// A pluggable tool.  Tools only read the buffer; every change they want is
/// returned as a `PixelDelta` and applied by the caller.
pub trait ToolBehavior {
    fn name(&self) -> &str;

    /// Whether pointer-move samples should be run through curve smoothing.
    /// Tools that return `false` never see `on_stroke`.
    fn smooths_input(&self) -> bool {
        true
    }

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn on_pointer_down(&mut self, pixels: &PixelBuffer, at: (i32, i32), ctx: &ToolContext) -> PixelDelta;

    /// Smoothed cells for one frame, starting at the previous frame's end.
    fn on_stroke(&mut self, pixels: &PixelBuffer, points: &[(i32, i32)], ctx: &ToolContext) -> PixelDelta;

    fn on_pointer_up(&mut self, _pixels: &PixelBuffer, _ctx: &ToolContext) -> PixelDelta {
        PixelDelta::new()
    }
}

/// Square stamp of `size` cells centered on `(x, y)` (even sizes lean up-left).
fn stamp(delta: &mut PixelDelta, x: i32, y: i32, size: u32, edit: PixelEdit) {
    let n = size.max(1) as i32;
    let start = -(n - 1) / 2;
    for dy in start..start + n {
        for dx in start..start + n {
            delta.insert(x + dx, y + dy, edit);
        }
    }
}

// ============================================================================
// PEN / ERASER
// ============================================================================

#[derive(Default)]
pub struct PenTool;

impl ToolBehavior for PenTool {
    fn name(&self) -> &str {
        "pen"
    }

    fn on_pointer_down(&mut self, _pixels: &PixelBuffer, at: (i32, i32), ctx: &ToolContext) -> PixelDelta {
        let mut delta = PixelDelta::new();
        stamp(&mut delta, at.0, at.1, ctx.brush_size, PixelEdit::Paint(ctx.color));
        delta
    }

    fn on_stroke(&mut self, _pixels: &PixelBuffer, points: &[(i32, i32)], ctx: &ToolContext) -> PixelDelta {
        let n = ctx.brush_size.max(1) as usize;
        let mut delta = PixelDelta::with_capacity(points.len() * n * n);
        for &(x, y) in points {
            stamp(&mut delta, x, y, ctx.brush_size, PixelEdit::Paint(ctx.color));
        }
        delta
    }
}

#[derive(Default)]
pub struct EraserTool;

impl ToolBehavior for EraserTool {
    fn name(&self) -> &str {
        "eraser"
    }

    fn on_pointer_down(&mut self, _pixels: &PixelBuffer, at: (i32, i32), ctx: &ToolContext) -> PixelDelta {
        let mut delta = PixelDelta::new();
        stamp(&mut delta, at.0, at.1, ctx.brush_size, PixelEdit::Erase);
        delta
    }

    fn on_stroke(&mut self, _pixels: &PixelBuffer, points: &[(i32, i32)], ctx: &ToolContext) -> PixelDelta {
        let mut delta = PixelDelta::new();
        for &(x, y) in points {
            stamp(&mut delta, x, y, ctx.brush_size, PixelEdit::Erase);
        }
        delta
    }
}

// ============================================================================
// FLOOD FILL
// ============================================================================

#[derive(Default)]
pub struct FillTool;

impl ToolBehavior for FillTool {
    fn name(&self) -> &str {
        "fill"
    }

    fn smooths_input(&self) -> bool {
        false
    }

    fn on_pointer_down(&mut self, pixels: &PixelBuffer, at: (i32, i32), ctx: &ToolContext) -> PixelDelta {
        flood_fill(pixels, None, at, ctx.color)
    }

    fn on_stroke(&mut self, _pixels: &PixelBuffer, _points: &[(i32, i32)], _ctx: &ToolContext) -> PixelDelta {
        PixelDelta::new()
    }
}

/// 4-connected fill of the region sharing the seed's color.
///
/// Reads go through `pending` first (edits not yet applied), then the buffer.
/// BFS runs over a fixed ring queue sized to the buffer area with a visited
/// bitmap, so each cell is enqueued at most once and nothing grows while the
/// fill runs.  Returns an empty delta for an out-of-bounds seed or when the
/// region already has the fill color.
pub fn flood_fill(
    pixels: &PixelBuffer,
    pending: Option<&PixelDelta>,
    seed: (i32, i32),
    fill: Rgba<u8>,
) -> PixelDelta {
    let Some((sx, sy)) = pixels.to_buffer(seed.0, seed.1) else {
        return PixelDelta::new();
    };

    let read = |x: i32, y: i32| -> Option<Rgba<u8>> {
        match pending.and_then(|d| d.get(x, y)) {
            Some(edit) => edit.resulting_color(),
            None => pixels.get_pixel(x, y),
        }
    };

    let fill_edit = PixelEdit::from_color(Some(fill));
    let target = read(seed.0, seed.1);
    if target == fill_edit.resulting_color() {
        return PixelDelta::new();
    }

    let size = pixels.size() as usize;
    let area = size * size;
    let mut visited = vec![false; area];
    let mut queue = vec![0u32; area];
    let (mut head, mut len) = (0usize, 0usize);

    let seed_idx = sy as usize * size + sx as usize;
    visited[seed_idx] = true;
    queue[0] = seed_idx as u32;
    len += 1;

    let mut delta = PixelDelta::new();
    while len > 0 {
        let idx = queue[head] as usize;
        head = (head + 1) % area;
        len -= 1;

        let (bx, by) = ((idx % size) as u32, (idx / size) as u32);
        let (x, y) = pixels.to_world(bx, by);
        delta.insert(x, y, fill_edit);

        let neighbors = [
            (bx > 0).then(|| idx - 1),
            (bx as usize + 1 < size).then(|| idx + 1),
            (by > 0).then(|| idx - size),
            (by as usize + 1 < size).then(|| idx + size),
        ];
        for ni in neighbors.into_iter().flatten() {
            if visited[ni] {
                continue;
            }
            let (nx, ny) = pixels.to_world((ni % size) as u32, (ni / size) as u32);
            if read(nx, ny) != target {
                continue;
            }
            visited[ni] = true;
            queue[(head + len) % area] = ni as u32;
            len += 1;
        }
    }

    log::debug!("flood_fill: seed {:?} filled {} cells", seed, delta.len());
    delta
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Named tool instances.  Passed to the editor explicitly; there is no global.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn ToolBehavior>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pen, eraser and fill.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(PenTool));
        reg.register(Box::new(EraserTool));
        reg.register(Box::new(FillTool));
        reg
    }

    /// Register under the tool's own name, replacing any previous tool with it.
    pub fn register(&mut self, tool: Box<dyn ToolBehavior>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn ToolBehavior + 'static)> {
        self.tools.get_mut(name).map(|t| t.as_mut())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::parse_hex;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn fill_on_empty_4x4_covers_every_cell_then_noops() {
        let mut buf = PixelBuffer::new(4);
        let red = parse_hex("#ff0000").unwrap();
        let delta = flood_fill(&buf, None, (0, 0), red);
        assert_eq!(delta.len(), 16);
        for y in -2..2 {
            for x in -2..2 {
                assert_eq!(delta.get(x, y), Some(PixelEdit::Paint(red)));
            }
        }
        buf.apply(&delta);
        assert!(flood_fill(&buf, None, (0, 0), red).is_empty());
    }

    #[test]
    fn fill_stays_inside_an_enclosed_region() {
        let mut buf = PixelBuffer::new(8);
        // Wall: square ring from -2..=2.
        let mut wall = PixelDelta::new();
        for i in -2..=2 {
            wall.paint(i, -2, BLACK);
            wall.paint(i, 2, BLACK);
            wall.paint(-2, i, BLACK);
            wall.paint(2, i, BLACK);
        }
        buf.apply(&wall);

        let inside = flood_fill(&buf, None, (0, 0), RED);
        assert_eq!(inside.len(), 9);
        assert!(inside.keys().all(|(x, y)| x.abs() <= 1 && y.abs() <= 1));

        let outside = flood_fill(&buf, None, (-4, -4), RED);
        assert_eq!(outside.len(), 64 - 16 - 9);
        assert!(!outside.contains(0, 0));
    }

    #[test]
    fn fill_sees_edits_not_yet_applied() {
        let buf = PixelBuffer::new(4);
        let mut pending = PixelDelta::new();
        for y in -2..2 {
            pending.paint(0, y, BLACK);
        }
        let delta = flood_fill(&buf, Some(&pending), (-2, -2), RED);
        assert_eq!(delta.len(), 8);
        assert!(delta.keys().all(|(x, _)| x < 0));
    }

    #[test]
    fn fill_with_out_of_bounds_seed_is_empty() {
        let buf = PixelBuffer::new(4);
        assert!(flood_fill(&buf, None, (2, 0), RED).is_empty());
        assert!(flood_fill(&buf, None, (0, -3), RED).is_empty());
    }

    #[test]
    fn pen_stamps_brush_squares() {
        let buf = PixelBuffer::new(16);
        let ctx = ToolContext { color: RED, brush_size: 3 };
        let down = PenTool.on_pointer_down(&buf, (0, 0), &ctx);
        assert_eq!(down.len(), 9);
        assert!(down.contains(-1, -1) && down.contains(1, 1));

        let stroke = PenTool.on_stroke(&buf, &[(0, 0), (1, 0)], &ctx);
        assert_eq!(stroke.len(), 12);
    }

    #[test]
    fn eraser_writes_erase_edits() {
        let buf = PixelBuffer::new(16);
        let delta = EraserTool.on_stroke(&buf, &[(3, 3)], &ToolContext::default());
        assert_eq!(delta.get(3, 3), Some(PixelEdit::Erase));
    }

    #[test]
    fn registry_holds_the_default_tools() {
        let mut reg = ToolRegistry::with_defaults();
        assert_eq!(reg.names(), vec!["eraser", "fill", "pen"]);
        assert!(!reg.get_mut("fill").unwrap().smooths_input());
        assert!(reg.get_mut("brush").is_none());
    }
}
