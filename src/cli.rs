// ============================================================================
// Pixlet CLI — headless document editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   pixlet fill   --input doc.json --x 0 --y 0 --color "#ff0000" --output doc.json
//   pixlet stroke --points "-10,0 0,5 10,0" --color "#00ff00" --output doc.json
//   pixlet export --input doc.json --output out.png
//   pixlet export --input doc.json --output view.png --gpu --width 800 --height 600
//   pixlet info   --input doc.json
//
// Every edit runs through the same editor the interactive host uses (input
// pipeline, tools, history, frame loop) with a CPU mirror backend.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use egui::Vec2;

use crate::canvas::{MAX_BUFFER_SIZE, PixelBuffer, PixelEdit, checked_buffer_size};
use crate::color;
use crate::editor::Editor;
use crate::gpu::GpuRenderer;
use crate::io::{self, PixelDocument};
use crate::render::{MirrorBackend, RenderBackend};
use crate::scheduler::FrameQueue;
use crate::settings::{CanvasMode, Settings};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Pixlet headless pixel-canvas tool.
#[derive(Parser, Debug)]
#[command(
    name = "pixlet",
    about = "Pixlet headless pixel-canvas editor",
    long_about = "Apply fills and strokes to pixel documents, export them to PNG,\n\
                  and inspect them, without an interactive host.\n\n\
                  Example:\n  \
                  pixlet fill -i doc.json --x 0 --y 0 --color '#ff0000' -o doc.json"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (defaults to the per-user pixlet_settings.cfg).
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Canvas mode for new documents: sprite (256) or drawing (1000).
    #[arg(long, global = true, value_name = "MODE")]
    pub mode: Option<String>,

    /// Explicit buffer size for new documents (overrides --mode).
    #[arg(long, global = true)]
    pub size: Option<u32>,

    /// Print per-command timing and log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Flood fill the region under a cell.
    Fill {
        /// Document to edit (a new empty one when omitted).
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        y: i32,
        #[arg(short, long, value_name = "#RRGGBB")]
        color: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Draw a smoothed stroke through a list of cells.
    Stroke {
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Space-separated "x,y" cells.
        #[arg(short, long, allow_hyphen_values = true)]
        points: String,
        #[arg(short, long, value_name = "#RRGGBB", default_value = "#000000")]
        color: String,
        /// pen or eraser.
        #[arg(short, long, default_value = "pen")]
        tool: String,
        #[arg(short, long)]
        brush_size: Option<u32>,
        /// Samples delivered per frame (smaller = more frame boundaries).
        #[arg(long, default_value_t = 4)]
        samples_per_frame: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write a PNG: the raw buffer, or a render of the framed view.
    Export {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Render the view with wgpu instead of dumping the buffer.
        #[arg(long)]
        gpu: bool,
        /// Render the view in software (CPU mirror).
        #[arg(long, conflicts_with = "gpu")]
        view: bool,
        #[arg(long, default_value_t = 512)]
        width: u32,
        #[arg(long, default_value_t = 512)]
        height: u32,
    },
    /// Print a summary of a document.
    Info {
        #[arg(short, long)]
        input: PathBuf,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

pub fn run(args: CliArgs) -> Result<()> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    if let Some(mode) = &args.mode {
        settings.canvas_mode =
            CanvasMode::parse(mode).ok_or_else(|| anyhow!("unknown canvas mode '{}'", mode))?;
    }

    let start = Instant::now();
    match args.command {
        Command::Fill { input, x, y, color, output } => {
            let fill = parse_color(&color)?;
            let (mut editor, mut doc) = open(input.as_deref(), &settings, args.size)?;
            editor.set_color(fill);
            editor.set_active_tool("fill");
            let at = editor.cell_to_screen(x, y);
            editor.pointer_down(at);
            editor.pointer_up(at);
            editor.on_frame();
            write_back(&editor, &mut doc, &output)?;
            println!(
                "{}: filled from ({}, {}); {} pixels set",
                editor.project().display_title(),
                x,
                y,
                doc.pixels.len()
            );
        }
        Command::Stroke { input, points, color, tool, brush_size, samples_per_frame, output } => {
            let cells = parse_points(&points)?;
            let (mut editor, mut doc) = open(input.as_deref(), &settings, args.size)?;
            if !matches!(tool.as_str(), "pen" | "eraser") || !editor.set_active_tool(&tool) {
                bail!("stroke tool must be pen or eraser, got '{}'", tool);
            }
            editor.set_color(parse_color(&color)?);
            if let Some(size) = brush_size {
                editor.set_brush_size(size);
            }

            let (&(x0, y0), rest) = cells.split_first().ok_or_else(|| anyhow!("no points given"))?;
            editor.pointer_down(editor.cell_to_screen(x0, y0));
            for (i, &(x, y)) in rest.iter().enumerate() {
                editor.pointer_move(editor.cell_to_screen(x, y));
                if (i + 1) % samples_per_frame.max(1) == 0 {
                    editor.on_frame();
                }
            }
            let (lx, ly) = cells[cells.len() - 1];
            editor.pointer_up(editor.cell_to_screen(lx, ly));
            editor.on_frame();
            write_back(&editor, &mut doc, &output)?;
            println!("{}: stroked {} points with {}", editor.project().display_title(), cells.len(), tool);
        }
        Command::Export { input, output, gpu, view, width, height } => {
            let doc = PixelDocument::load(&input)?;
            let size = doc_size(&doc, &settings, args.size)?;
            if !gpu && !view {
                let mut buf = PixelBuffer::new(size);
                buf.apply(&doc.pixels);
                io::export_png(&buf, &output)?;
            } else {
                let backend: Box<dyn RenderBackend> = if gpu {
                    Box::new(GpuRenderer::new(&settings.preferred_gpu, width, height, size).context("GPU unavailable")?)
                } else {
                    Box::new(MirrorBackend::with_target(width, height))
                };
                let mut editor = Editor::from_settings(
                    &settings,
                    size,
                    backend,
                    Rc::new(FrameQueue::new()),
                    Vec2::new(width as f32, height as f32),
                );
                editor.load_snapshot(&doc.pixels);
                editor.on_frame();
                let image = editor
                    .canvas_mut()
                    .renderer_mut()
                    .read_target()
                    .ok_or_else(|| anyhow!("renderer produced no frame"))?;
                io::save_png(&image, &output)?;
                log::info!("Rendered with {}", editor.canvas().renderer().backend_name());
            }
            println!("exported {}", output.display());
        }
        Command::Info { input } => {
            let doc = PixelDocument::load(&input)?;
            print_info(&input, &doc, doc_size(&doc, &settings, args.size)?);
        }
    }

    if args.verbose {
        println!("done in {:.1} ms", start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Buffer side for `doc`: `--size`, then the document's `"size"` member, then
/// the settings' canvas mode.
fn doc_size(doc: &PixelDocument, settings: &Settings, size: Option<u32>) -> Result<u32> {
    let Some(requested) = size.or_else(|| doc.size_hint()) else {
        return Ok(settings.canvas_size());
    };
    checked_buffer_size(requested)
        .ok_or_else(|| anyhow!("buffer size {} out of range (1..={})", requested, MAX_BUFFER_SIZE))
}

/// Headless editor (1:1 zoom) holding the document's pixels.
fn open(input: Option<&Path>, settings: &Settings, size: Option<u32>) -> Result<(Editor, PixelDocument)> {
    let doc = match input {
        Some(path) => PixelDocument::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PixelDocument::default(),
    };
    let size = doc_size(&doc, settings, size)?;
    let side = size as f32;
    let backend = Box::new(MirrorBackend::new());
    let scheduler = Rc::new(FrameQueue::new());
    let container = Vec2::new(side, side);
    let mut editor = match input {
        Some(path) => Editor::open_file(settings, path.to_path_buf(), size, backend, scheduler, container),
        None => Editor::from_settings(settings, size, backend, scheduler, container),
    };
    editor.load_snapshot(&doc.pixels);
    Ok((editor, doc))
}

fn write_back(editor: &Editor, doc: &mut PixelDocument, output: &Path) -> Result<()> {
    doc.pixels = editor.canvas().get_all_pixels();
    doc.extra
        .insert("size".to_string(), serde_json::Value::from(editor.canvas().size()));
    doc.save(output).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn parse_color(s: &str) -> Result<image::Rgba<u8>> {
    color::parse_hex(s).ok_or_else(|| anyhow!("invalid color '{}'", s))
}

fn parse_points(s: &str) -> Result<Vec<(i32, i32)>> {
    s.split_whitespace()
        .map(|pair| -> Result<(i32, i32)> {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("point '{}' is not x,y", pair))?;
            Ok((x.trim().parse()?, y.trim().parse()?))
        })
        .collect()
}

fn print_info(path: &Path, doc: &PixelDocument, size: u32) {
    println!("{}", path.display());
    println!("  buffer size : {}x{}", size, size);
    println!("  pixels      : {}", doc.pixels.len());

    let mut bounds: Option<(i32, i32, i32, i32)> = None;
    let mut colors = std::collections::HashSet::new();
    for ((x, y), edit) in doc.pixels.iter() {
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
        });
        if let PixelEdit::Paint(c) = edit {
            colors.insert(c.0);
        }
    }
    if let Some((min_x, min_y, max_x, max_y)) = bounds {
        println!("  bounds      : ({}, {}) .. ({}, {})", min_x, min_y, max_x, max_y);
    }
    println!("  colors      : {}", colors.len());
    let mut keys: Vec<_> = doc.extra.keys().map(String::as_str).collect();
    keys.sort_unstable();
    if !keys.is_empty() {
        println!("  members     : {}", keys.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_lists() {
        assert_eq!(parse_points("0,0 -3,4  10,-2").unwrap(), vec![(0, 0), (-3, 4), (10, -2)]);
        assert!(parse_points("1;2").is_err());
        assert!(parse_points("a,2").is_err());
    }

    #[test]
    fn fill_and_stroke_commands_write_documents() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.json");

        run(CliArgs::parse_from([
            "pixlet", "--size", "8", "stroke", "--points", "-4,0 3,0", "--color", "#000000", "-o",
            doc.to_str().unwrap(),
        ]))
        .unwrap();
        let stroked = PixelDocument::load(&doc).unwrap();
        assert_eq!(stroked.pixels.len(), 8);
        assert_eq!(stroked.size_hint(), Some(8));

        run(CliArgs::parse_from([
            "pixlet", "fill", "-i", doc.to_str().unwrap(), "--x", "0", "--y", "-3", "--color", "#ff0000", "-o",
            doc.to_str().unwrap(),
        ]))
        .unwrap();
        let filled = PixelDocument::load(&doc).unwrap();
        // Rows -4..=-1 above the line: 4 rows of 8.
        assert_eq!(filled.pixels.len(), 8 + 32);
        assert_eq!(
            filled.pixels.get(0, -3),
            Some(PixelEdit::Paint(image::Rgba([255, 0, 0, 255])))
        );
        assert_eq!(filled.pixels.get(0, 2), None);
    }

    #[test]
    fn out_of_range_document_size_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("missing.cfg");
        let doc = dir.path().join("huge.json");
        std::fs::write(&doc, r##"{"size":4294967295,"pixels":{"0,0":"#ff0000"}}"##).unwrap();
        let out = dir.path().join("out.json");

        let err = run(CliArgs::parse_from([
            "pixlet", "--settings", settings.to_str().unwrap(), "fill", "-i", doc.to_str().unwrap(), "--x", "0",
            "--y", "0", "--color", "#00ff00", "-o", out.to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        assert!(!out.exists());

        let png = dir.path().join("out.png");
        assert!(run(CliArgs::parse_from([
            "pixlet", "--size", "0", "export", "-i", doc.to_str().unwrap(), "-o", png.to_str().unwrap(),
        ]))
        .is_err());
    }

    #[test]
    fn opened_documents_are_named_after_their_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.json");
        std::fs::write(&path, r##"{"size":4,"pixels":{"-2,-2":"#112233"}}"##).unwrap();

        let (mut editor, doc) = open(Some(&path), &Settings::default(), None).unwrap();
        assert_eq!(doc.size_hint(), Some(4));
        assert_eq!(editor.canvas().size(), 4);
        assert_eq!(editor.project().display_title(), "cat.json");

        editor.set_color(image::Rgba([1, 1, 1, 255]));
        let at = editor.cell_to_screen(1, 1);
        editor.pointer_down(at);
        editor.pointer_up(at);
        assert_eq!(editor.project().display_title(), "cat.json*");

        let (untitled, _) = open(None, &Settings::default(), Some(4)).unwrap();
        assert_eq!(untitled.project().display_title(), "Untitled-1");
    }
}
