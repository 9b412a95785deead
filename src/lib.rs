//! Pixlet: an infinite-feeling pixel canvas backed by a fixed square buffer.
//!
//! The [`editor::Editor`] ties everything together: pointer input is batched
//! per frame and smoothed into cells, tools turn cells into pixel deltas, the
//! deltas land on the [`canvas::Canvas`] buffer and its history, and dirty
//! regions are synced to a [`render::RenderBackend`] once per frame.

#![allow(clippy::too_many_arguments)]

pub mod canvas;
pub mod cli;
pub mod color;
pub mod components;
pub mod editor;
pub mod gpu;
pub mod io;
pub mod logger;
pub mod project;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod view;
