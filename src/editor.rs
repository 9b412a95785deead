// ============================================================================
// EDITOR — wires pointer input → tools → canvas → history, frame by frame
// ============================================================================
//
//   pointer_down ─► tool.on_pointer_down ─┐
//   pointer_move ─► InputPipeline buffer  │
//   on_frame     ─► ProcessStroke tasks ──┼─► apply_tool_delta ─► Canvas
//                ─► one render            │     (records before/after)
//   pointer_up   ─► flush + on_pointer_up ┘─► history.push_action
//
// Stroke samples travel in cell-center space (world - 0.5) so that rounding
// a sample lands on the same cell `ViewTransform::screen_to_world` hits.

use std::path::PathBuf;
use std::rc::Rc;

use egui::{Pos2, Vec2};
use image::Rgba;

use crate::canvas::{Canvas, PixelDelta, PixelEdit};
use crate::components::history::{HistoryManager, HistoryStore, HistoryStoreError};
use crate::components::input::{InputPipeline, PointerEvent};
use crate::components::tools::{ToolContext, ToolRegistry};
use crate::project::Project;
use crate::render::{FrameStats, RenderBackend};
use crate::scheduler::{FrameScheduler, FrameTask};
use crate::settings::Settings;
use crate::view::ViewTransform;

/// First-seen "before" and latest "after" value of every cell a stroke touched.
#[derive(Default)]
struct StrokeRecord {
    before: PixelDelta,
    after: PixelDelta,
}

/// What one `on_frame` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub strokes_processed: usize,
    pub rendered: Option<FrameStats>,
}

pub struct Editor {
    project: Project,
    tools: ToolRegistry,
    active_tool: String,
    tool_ctx: ToolContext,
    input: InputPipeline,
    scheduler: Rc<dyn FrameScheduler>,
    stroke: Option<StrokeRecord>,
    history_store: HistoryStore,
}

impl Editor {
    pub fn new(project: Project, tools: ToolRegistry, scheduler: Rc<dyn FrameScheduler>, settings: &Settings) -> Self {
        let mut tools = tools;
        let active_tool = if tools.contains("pen") {
            "pen".to_string()
        } else {
            tools.names().first().map(|s| s.to_string()).unwrap_or_default()
        };
        if let Some(tool) = tools.get_mut(&active_tool) {
            tool.activate();
        }
        Self {
            project,
            tools,
            active_tool,
            tool_ctx: ToolContext { color: Rgba([0, 0, 0, 255]), brush_size: settings.brush_size },
            input: InputPipeline::new(scheduler.clone(), settings.smoothing()),
            scheduler,
            stroke: None,
            history_store: HistoryStore::for_session(settings.max_undo_steps, settings.history_memory_bytes()),
        }
    }

    /// Untitled document of `size` on `backend`, default tools.
    pub fn from_settings(
        settings: &Settings,
        size: u32,
        backend: Box<dyn RenderBackend>,
        scheduler: Rc<dyn FrameScheduler>,
        container: Vec2,
    ) -> Self {
        let (canvas, history) = Self::blank_document(settings, size, backend, scheduler.clone(), container);
        let project = Project::new_untitled(1, canvas, history);
        Self::new(project, ToolRegistry::with_defaults(), scheduler, settings)
    }

    /// Like `from_settings`, but the project is named after `path`.  Pixels
    /// are loaded separately through `load_snapshot`.
    pub fn open_file(
        settings: &Settings,
        path: PathBuf,
        size: u32,
        backend: Box<dyn RenderBackend>,
        scheduler: Rc<dyn FrameScheduler>,
        container: Vec2,
    ) -> Self {
        let (canvas, history) = Self::blank_document(settings, size, backend, scheduler.clone(), container);
        let project = Project::from_file(path, canvas, history);
        Self::new(project, ToolRegistry::with_defaults(), scheduler, settings)
    }

    fn blank_document(
        settings: &Settings,
        size: u32,
        backend: Box<dyn RenderBackend>,
        scheduler: Rc<dyn FrameScheduler>,
        container: Vec2,
    ) -> (Canvas, HistoryManager) {
        let view = ViewTransform::new(size, container.x, container.y, settings.max_zoom)
            .with_zoom_step(settings.zoom_step);
        let canvas = Canvas::new(size, view, backend, scheduler, settings.background_color);
        let history = HistoryManager::new(settings.max_undo_steps).with_memory_limit(settings.history_memory_bytes());
        (canvas, history)
    }

    pub fn with_history_store(mut self, store: HistoryStore) -> Self {
        self.history_store = store;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    pub fn canvas(&self) -> &Canvas {
        &self.project.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.project.canvas
    }

    pub fn history(&self) -> &HistoryManager {
        &self.project.history
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn active_tool(&self) -> &str {
        &self.active_tool
    }

    pub fn is_stroking(&self) -> bool {
        self.input.is_active()
    }

    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.tool_ctx.color = color;
    }

    pub fn set_brush_size(&mut self, size: u32) {
        self.tool_ctx.brush_size = size.max(1);
    }

    pub fn tool_context(&self) -> ToolContext {
        self.tool_ctx
    }

    /// Switch tools.  The outgoing tool's pending frame request is cancelled
    /// and its stroke state dropped; whatever it already drew is committed to
    /// history.  Returns `false` for an unknown tool.
    pub fn set_active_tool(&mut self, name: &str) -> bool {
        if !self.tools.contains(name) {
            log::warn!("Unknown tool '{}'", name);
            return false;
        }
        if name == self.active_tool {
            return true;
        }
        self.input.cancel();
        if let Some(tool) = self.tools.get_mut(&self.active_tool) {
            tool.deactivate();
        }
        self.commit_stroke();
        self.active_tool = name.to_string();
        if let Some(tool) = self.tools.get_mut(name) {
            tool.activate();
        }
        log::debug!("Active tool: {}", name);
        true
    }

    /// Screen position of the center of world cell `(x, y)`.
    pub fn cell_to_screen(&self, x: i32, y: i32) -> Pos2 {
        self.project
            .canvas
            .view()
            .world_to_screen(Pos2::new(x as f32 + 0.5, y as f32 + 0.5))
    }

    fn to_stroke_space(&self, screen: Pos2) -> Pos2 {
        self.project.canvas.view().screen_to_world_f32(screen) - Vec2::splat(0.5)
    }

    fn smooths(&mut self) -> bool {
        self.tools
            .get_mut(&self.active_tool)
            .map(|t| t.smooths_input())
            .unwrap_or(true)
    }

    // ---- pointer input ------------------------------------------------------

    pub fn handle_event(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down(p) => self.pointer_down(p),
            PointerEvent::Move(p) => self.pointer_move(p),
            PointerEvent::Up(p) => self.pointer_up(p),
        }
    }

    pub fn pointer_down(&mut self, screen: Pos2) {
        if self.input.is_active() {
            self.finish_stroke();
        }
        let at = self.to_stroke_space(screen);
        let cell = self.input.pointer_down(at);
        self.stroke = Some(StrokeRecord::default());

        let ctx = self.tool_ctx;
        let Some(tool) = self.tools.get_mut(&self.active_tool) else { return };
        let delta = tool.on_pointer_down(self.project.canvas.pixels(), cell, &ctx);
        self.apply_tool_delta(&delta);
    }

    pub fn pointer_move(&mut self, screen: Pos2) {
        if !self.input.is_active() {
            return;
        }
        let at = self.to_stroke_space(screen);
        self.input.pointer_move(at);
    }

    pub fn pointer_up(&mut self, _screen: Pos2) {
        if self.input.is_active() {
            self.finish_stroke();
        }
    }

    /// Flush buffered samples synchronously, let the tool finish, record history.
    fn finish_stroke(&mut self) {
        let smooth = self.smooths();
        let cells = self.input.pointer_up(smooth);
        let ctx = self.tool_ctx;
        if let Some(tool) = self.tools.get_mut(&self.active_tool) {
            let pixels = self.project.canvas.pixels();
            let mut delta = if cells.is_empty() || !smooth {
                PixelDelta::new()
            } else {
                tool.on_stroke(pixels, &cells, &ctx)
            };
            delta.merge(&tool.on_pointer_up(pixels, &ctx));
            self.apply_tool_delta(&delta);
        }
        self.commit_stroke();
    }

    fn commit_stroke(&mut self) {
        let Some(record) = self.stroke.take() else { return };
        if record.after.is_empty() {
            return;
        }
        let id = self.project.id;
        self.project.history.push_action(id, record.before, record.after);
        log::debug!("Stroke committed ({} undo steps)", self.project.history.undo_count());
    }

    fn apply_tool_delta(&mut self, delta: &PixelDelta) {
        if delta.is_empty() {
            return;
        }
        if let Some(record) = self.stroke.as_mut() {
            let pixels = self.project.canvas.pixels();
            for ((x, y), edit) in delta.iter() {
                if !pixels.in_bounds(x, y) {
                    continue;
                }
                record
                    .before
                    .entry(x, y)
                    .or_insert_with(|| PixelEdit::from_color(pixels.get_pixel(x, y)));
                record.after.insert(x, y, PixelEdit::from_color(edit.resulting_color()));
            }
        }
        if self.project.canvas.apply_pixels(delta) > 0 {
            self.project.mark_dirty();
        }
    }

    // ---- frame loop -----------------------------------------------------------

    /// Run everything due this frame: stroke processing first, then at most
    /// one render.
    pub fn on_frame(&mut self) -> FrameReport {
        let mut report = FrameReport::default();
        for (handle, task) in self.scheduler.take_due() {
            if task != FrameTask::ProcessStroke {
                continue;
            }
            let smooth = self.smooths();
            let cells = self.input.process_frame(handle, smooth);
            if cells.is_empty() {
                continue;
            }
            report.strokes_processed += 1;
            if !smooth {
                continue;
            }
            let ctx = self.tool_ctx;
            if let Some(tool) = self.tools.get_mut(&self.active_tool) {
                let delta = tool.on_stroke(self.project.canvas.pixels(), &cells, &ctx);
                self.apply_tool_delta(&delta);
            }
        }
        report.rendered = self.project.canvas.render_frame();
        report
    }

    // ---- history ----------------------------------------------------------------

    /// Undo the newest stroke.  A stroke in progress is committed first.
    pub fn undo(&mut self) -> bool {
        if self.input.is_active() {
            self.finish_stroke();
        }
        let Project { history, canvas, .. } = &mut self.project;
        history.undo(canvas).is_some()
    }

    pub fn redo(&mut self) -> bool {
        if self.input.is_active() {
            self.finish_stroke();
        }
        let Project { history, canvas, .. } = &mut self.project;
        history.redo(canvas).is_some()
    }

    /// Replace the buffer with content from outside (full resync).  History
    /// is cleared since its deltas describe the old content.
    pub fn load_snapshot(&mut self, snapshot: &PixelDelta) {
        self.input.cancel();
        self.stroke = None;
        self.project.canvas.load_pixels(snapshot);
        self.project.history.clear();
        self.project.mark_clean();
    }

    /// Spill this document's undo/redo stacks to the session store.
    pub fn persist_history(&mut self) -> Result<(), HistoryStoreError> {
        if self.input.is_active() {
            self.finish_stroke();
        }
        let id = self.project.id;
        let placeholder = HistoryManager::new(1);
        let history = std::mem::replace(&mut self.project.history, placeholder);
        self.history_store.insert(id, history);
        let result = self.history_store.save(id);
        self.project.history = self.history_store.take(id);
        result
    }

    /// Reload this document's stacks from the session store.  Returns `false`
    /// when nothing was stored.
    pub fn restore_history(&mut self) -> Result<bool, HistoryStoreError> {
        let id = self.project.id;
        if !self.history_store.load(id)? {
            return Ok(false);
        }
        self.project.history = self.history_store.take(id);
        Ok(true)
    }

    /// Swap in another document, spilling the current one's history first.
    /// Returns the previous project.
    pub fn switch_project(&mut self, project: Project) -> Result<Project, HistoryStoreError> {
        self.persist_history()?;
        let previous = std::mem::replace(&mut self.project, project);
        if let Err(e) = self.restore_history() {
            log::warn!("No stored history for {}: {}", self.project.id, e);
        }
        self.project.canvas.render();
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MirrorBackend;
    use crate::scheduler::FrameQueue;
    use test_log::test;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    /// 32×32 buffer in a 32×32 container: zoom 1, world (0,0) at screen (16,16).
    fn editor() -> (Editor, Rc<FrameQueue>, tempfile::TempDir) {
        let queue = Rc::new(FrameQueue::new());
        let settings = Settings::default();
        let dir = tempfile::tempdir().unwrap();
        let ed = Editor::from_settings(&settings, 32, Box::new(MirrorBackend::new()), queue.clone(), Vec2::new(32.0, 32.0))
            .with_history_store(HistoryStore::in_dir(dir.path(), 50, None));
        (ed, queue, dir)
    }

    fn screen(x: f32, y: f32) -> Pos2 {
        // Center of world cell (x, y).
        Pos2::new(x + 16.5, y + 16.5)
    }

    #[test]
    fn stroke_paints_a_continuous_line_across_frames() {
        let (mut ed, _q, _dir) = editor();
        ed.set_color(RED);
        ed.pointer_down(screen(-5.0, 0.0));
        ed.pointer_move(screen(-2.0, 0.0));
        ed.pointer_move(screen(0.0, 0.0));
        let report = ed.on_frame();
        assert_eq!(report.strokes_processed, 1);
        assert!(report.rendered.is_some());

        ed.pointer_move(screen(5.0, 0.0));
        ed.on_frame();
        ed.pointer_up(screen(5.0, 0.0));

        for x in -5..=5 {
            assert_eq!(ed.canvas().get_pixel(x, 0), Some(RED), "gap at x={}", x);
        }
        assert_eq!(ed.history().undo_count(), 1);
    }

    #[test]
    fn pointer_up_before_the_frame_loses_nothing() {
        let (mut ed, q, _dir) = editor();
        ed.set_color(BLUE);
        ed.pointer_down(screen(0.0, -4.0));
        ed.pointer_move(screen(0.0, 4.0));
        assert_eq!(q.pending(), 2); // initial render + ProcessStroke
        ed.pointer_up(screen(0.0, 4.0));
        for y in -4..=4 {
            assert_eq!(ed.canvas().get_pixel(0, y), Some(BLUE));
        }
        let report = ed.on_frame();
        assert_eq!(report.strokes_processed, 0);
    }

    #[test]
    fn undo_redo_restores_exact_pixels() {
        let (mut ed, _q, _dir) = editor();
        let mut base = PixelDelta::new();
        base.paint(1, 0, BLUE);
        ed.load_snapshot(&base);

        ed.set_color(RED);
        ed.pointer_down(screen(0.0, 0.0));
        ed.pointer_move(screen(2.0, 0.0));
        ed.pointer_up(screen(2.0, 0.0));
        assert_eq!(ed.canvas().get_pixel(1, 0), Some(RED));

        assert!(ed.undo());
        assert_eq!(ed.canvas().get_pixel(0, 0), None);
        assert_eq!(ed.canvas().get_pixel(1, 0), Some(BLUE));
        assert_eq!(ed.canvas().get_pixel(2, 0), None);

        assert!(ed.redo());
        for x in 0..=2 {
            assert_eq!(ed.canvas().get_pixel(x, 0), Some(RED));
        }
        assert!(!ed.redo());
    }

    #[test]
    fn undo_mid_stroke_commits_the_stroke_first() {
        let (mut ed, _q, _dir) = editor();
        ed.pointer_down(screen(0.0, 0.0));
        ed.pointer_move(screen(3.0, 0.0));
        assert!(ed.undo());
        assert!(!ed.is_stroking());
        assert_eq!(ed.canvas().get_pixel(3, 0), None);
        assert!(ed.history().can_redo());
    }

    #[test]
    fn switching_tools_cancels_the_pending_frame() {
        let (mut ed, q, _dir) = editor();
        ed.on_frame();
        ed.pointer_down(screen(0.0, 0.0));
        ed.pointer_move(screen(6.0, 6.0));
        assert!(ed.set_active_tool("eraser"));
        assert!(!ed.is_stroking());
        // Only the render requested by the pointer-down stamp remains.
        assert_eq!(q.pending(), 1);
        ed.on_frame();
        assert_eq!(ed.canvas().get_pixel(6, 6), None);
        assert_eq!(ed.canvas().get_pixel(0, 0), Some(Rgba([0, 0, 0, 255])));
        assert_eq!(ed.history().undo_count(), 1);
        assert!(!ed.set_active_tool("spray"));
    }

    #[test]
    fn fill_tool_fills_and_is_one_undo_step() {
        let (mut ed, _q, _dir) = editor();
        ed.set_active_tool("fill");
        ed.set_color(RED);
        ed.pointer_down(screen(3.0, 3.0));
        ed.pointer_move(screen(9.0, 3.0));
        ed.pointer_up(screen(9.0, 3.0));
        assert_eq!(ed.canvas().get_all_pixels().len(), 32 * 32);
        assert!(ed.undo());
        assert!(ed.canvas().get_all_pixels().is_empty());
    }

    #[test]
    fn history_survives_persist_and_restore() {
        let (mut ed, _q, _dir) = editor();
        ed.pointer_down(screen(0.0, 0.0));
        ed.pointer_up(screen(0.0, 0.0));
        ed.persist_history().unwrap();
        assert_eq!(ed.history().undo_count(), 1);

        ed.project_mut().history.clear();
        assert!(ed.restore_history().unwrap());
        assert!(ed.undo());
        assert_eq!(ed.canvas().get_pixel(0, 0), None);
    }

    #[test]
    fn egui_pointer_events_drive_a_stroke() {
        let (mut ed, _q, _dir) = editor();
        ed.set_color(BLUE);
        let button = |pos: Pos2, pressed: bool| egui::Event::PointerButton {
            pos,
            button: egui::PointerButton::Primary,
            pressed,
            modifiers: egui::Modifiers::NONE,
        };
        let events = [
            button(screen(-3.0, 2.0), true),
            egui::Event::PointerMoved(screen(0.0, 2.0)),
            egui::Event::Scroll(Vec2::new(0.0, 1.0)),
            egui::Event::PointerMoved(screen(3.0, 2.0)),
            button(screen(3.0, 2.0), false),
        ];
        for event in events.iter().filter_map(PointerEvent::from_egui) {
            ed.handle_event(event);
        }
        assert!(!ed.is_stroking());
        for x in -3..=3 {
            assert_eq!(ed.canvas().get_pixel(x, 2), Some(BLUE), "gap at x={}", x);
        }
        assert_eq!(ed.history().undo_count(), 1);
    }

    #[test]
    fn renders_coalesce_to_one_per_frame() {
        let (mut ed, _q, _dir) = editor();
        ed.on_frame();
        ed.pointer_down(screen(0.0, 0.0));
        for i in 1..8 {
            ed.pointer_move(screen(i as f32, 0.0));
        }
        ed.canvas_mut().render();
        let before = ed.canvas().renderer().frames_drawn();
        ed.on_frame();
        assert_eq!(ed.canvas().renderer().frames_drawn(), before + 1);
        assert!(ed.on_frame().rendered.is_none());
    }
}
