// ============================================================================
// FRAME SCHEDULER — "run this on the next display refresh"
// ============================================================================
//
// Everything in the engine runs on one thread.  Work that must wait for a
// frame boundary (processing buffered pointer samples, drawing) is queued
// here as a `FrameTask` and picked up by the host when the display refreshes
// (`Editor::on_frame`).  The canvas and the input pipeline share one
// scheduler through `Rc<dyn FrameScheduler>`, so the trait takes `&self` and
// implementations use interior mutability.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Opaque handle returned by `request_frame`, used to cancel the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

/// Kinds of work that can be deferred to the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameTask {
    /// Drain the active stroke's sample buffer and feed the tool.
    ProcessStroke,
    /// Sync the dirty region to the texture and draw.
    Render,
}

pub trait FrameScheduler {
    /// Queue `task` for the next frame.
    fn request_frame(&self, task: FrameTask) -> FrameHandle;

    /// Drop a queued request.  Unknown or already-run handles are ignored.
    fn cancel(&self, handle: FrameHandle);

    /// Remove and return everything that is due this frame, in request order.
    fn take_due(&self) -> Vec<(FrameHandle, FrameTask)>;

    /// Number of requests still waiting.
    fn pending(&self) -> usize;
}

/// FIFO scheduler driven by the host.  The host calls `Editor::on_frame` on
/// every refresh (vsync, `requestAnimationFrame`, an egui repaint); tests
/// call it by hand, which makes every interleaving deterministic.
#[derive(Default)]
pub struct FrameQueue {
    queue: RefCell<VecDeque<(FrameHandle, FrameTask)>>,
    next_id: Cell<u64>,
    /// Total requests ever made (diagnostics and tests).
    requested: Cell<u64>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_requested(&self) -> u64 {
        self.requested.get()
    }
}

impl FrameScheduler for FrameQueue {
    fn request_frame(&self, task: FrameTask) -> FrameHandle {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        self.requested.set(self.requested.get() + 1);
        let handle = FrameHandle(id);
        self.queue.borrow_mut().push_back((handle, task));
        handle
    }

    fn cancel(&self, handle: FrameHandle) {
        self.queue.borrow_mut().retain(|(h, _)| *h != handle);
    }

    fn take_due(&self) -> Vec<(FrameHandle, FrameTask)> {
        self.queue.borrow_mut().drain(..).collect()
    }

    fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}
