// ============================================================================
// COMPONENTS — editing machinery layered over the canvas
// ============================================================================
//
//   smoothing.rs  — quadratic-Bézier stroke interpolation
//   input.rs      — frame-buffered pointer input
//   tools.rs      — pen / eraser / flood fill behind the ToolBehavior trait
//   history.rs    — delta undo/redo + per-document session store
// ============================================================================

pub mod history;
pub mod input;
pub mod smoothing;
pub mod tools;
