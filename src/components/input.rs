// ============================================================================
// INPUT PIPELINE — buffer pointer samples, smooth them once per frame
// ============================================================================
//
//   pointer move ──► samples.push()  ──► (first sample) request ProcessStroke
//   frame        ──► drain, prepend last point, smooth, hand cells to the tool
//   pointer up   ──► cancel pending request, flush synchronously, end session
//   deactivate   ──► cancel pending request, drop session unflushed
//
// Samples are never processed on the input event itself and never dropped
// (except on deactivation, where the stroke is abandoned on purpose).

use std::rc::Rc;

use egui::Pos2;

use super::smoothing::{SmoothingParams, smooth_points, to_cell};
use crate::scheduler::{FrameHandle, FrameScheduler, FrameTask};

/// Host pointer input in screen space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down(Pos2),
    Move(Pos2),
    Up(Pos2),
}

impl PointerEvent {
    /// Primary-button presses/releases and pointer motion; everything else is `None`.
    pub fn from_egui(event: &egui::Event) -> Option<Self> {
        match event {
            egui::Event::PointerMoved(pos) => Some(PointerEvent::Move(*pos)),
            egui::Event::PointerButton { pos, button: egui::PointerButton::Primary, pressed, .. } => {
                Some(if *pressed { PointerEvent::Down(*pos) } else { PointerEvent::Up(*pos) })
            }
            _ => None,
        }
    }

    pub fn pos(&self) -> Pos2 {
        match *self {
            PointerEvent::Down(p) | PointerEvent::Move(p) | PointerEvent::Up(p) => p,
        }
    }
}

/// State of one stroke, pointer-down to pointer-up.
#[derive(Debug)]
pub struct StrokeSession {
    /// Continuity point prepended to the next batch (world space).
    last_point: Pos2,
    /// Last cell handed to the tool, so a batch never repeats it.
    last_cell: (i32, i32),
    samples: Vec<Pos2>,
    pending: Option<FrameHandle>,
}

impl StrokeSession {
    fn new(start: Pos2) -> Self {
        Self {
            last_point: start,
            last_cell: to_cell(start),
            samples: Vec::new(),
            pending: None,
        }
    }

    pub fn buffered(&self) -> usize {
        self.samples.len()
    }

    pub fn pending(&self) -> Option<FrameHandle> {
        self.pending
    }

    /// Drain the buffer into tool-ready cells and advance the continuity point.
    fn drain(&mut self, params: Option<&SmoothingParams>) -> Vec<(i32, i32)> {
        if self.samples.is_empty() {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(self.samples.len() + 1);
        batch.push(self.last_point);
        batch.append(&mut self.samples);

        let cells = match params {
            Some(p) => smooth_points(&batch, p),
            None => batch.iter().map(|&p| to_cell(p)).collect(),
        };

        // Drop the leading cells the previous batch already delivered.
        let skip = cells.iter().take_while(|&&c| c == self.last_cell).count();
        let cells: Vec<_> = cells.into_iter().skip(skip).collect();

        if let Some(&last) = batch.last() {
            self.last_point = last;
        }
        if let Some(&c) = cells.last() {
            self.last_cell = c;
        }
        cells
    }
}

pub struct InputPipeline {
    scheduler: Rc<dyn FrameScheduler>,
    session: Option<StrokeSession>,
    params: SmoothingParams,
}

impl InputPipeline {
    pub fn new(scheduler: Rc<dyn FrameScheduler>, params: SmoothingParams) -> Self {
        Self { scheduler, session: None, params }
    }

    pub fn params(&self) -> &SmoothingParams {
        &self.params
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&StrokeSession> {
        self.session.as_ref()
    }

    /// Start a stroke at `world`.  Any previous session is abandoned.  Returns
    /// the cell under the pointer.
    pub fn pointer_down(&mut self, world: Pos2) -> (i32, i32) {
        self.cancel();
        let session = StrokeSession::new(world);
        let cell = session.last_cell;
        self.session = Some(session);
        cell
    }

    /// Buffer a sample; schedules processing unless a request is already pending.
    pub fn pointer_move(&mut self, world: Pos2) {
        let Some(session) = self.session.as_mut() else { return };
        session.samples.push(world);
        if session.pending.is_none() {
            session.pending = Some(self.scheduler.request_frame(FrameTask::ProcessStroke));
        }
    }

    /// Frame callback for `handle`.  Stale handles (cancelled or from an
    /// earlier stroke) yield nothing.
    pub fn process_frame(&mut self, handle: FrameHandle, smooth: bool) -> Vec<(i32, i32)> {
        let params = self.params;
        let Some(session) = self.session.as_mut() else { return Vec::new() };
        if session.pending != Some(handle) {
            return Vec::new();
        }
        session.pending = None;

        let cells = session.drain(smooth.then_some(&params));

        if !session.samples.is_empty() {
            session.pending = Some(self.scheduler.request_frame(FrameTask::ProcessStroke));
        }
        cells
    }

    /// End the stroke: cancel any pending request and return whatever was
    /// still buffered.
    pub fn pointer_up(&mut self, smooth: bool) -> Vec<(i32, i32)> {
        let params = self.params;
        let Some(mut session) = self.session.take() else { return Vec::new() };
        if let Some(h) = session.pending.take() {
            self.scheduler.cancel(h);
        }
        session.drain(smooth.then_some(&params))
    }

    /// Tool deactivation: cancel the pending request and drop the session.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(h) = session.pending {
                self.scheduler.cancel(h);
            }
            if !session.samples.is_empty() {
                log::debug!("InputPipeline: dropped {} buffered samples", session.samples.len());
            }
        }
    }
}
