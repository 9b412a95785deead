use std::path::Path;

use image::{ImageFormat, RgbaImage};
use serde_json::{Map, Value};

use crate::canvas::{PixelBuffer, PixelDelta, PixelEdit};
use crate::color;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum DocumentError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Image(image::ImageError),
    /// A `"pixels"` key that is not `"x,y"`.
    InvalidKey(String),
    /// A `"pixels"` value that is not a hex color.
    InvalidColor(String),
    InvalidFormat(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::Io(e) => write!(f, "I/O error: {}", e),
            DocumentError::Json(e) => write!(f, "JSON error: {}", e),
            DocumentError::Image(e) => write!(f, "Image error: {}", e),
            DocumentError::InvalidKey(k) => write!(f, "Invalid pixel key '{}' (expected \"x,y\")", k),
            DocumentError::InvalidColor(c) => write!(f, "Invalid color '{}'", c),
            DocumentError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<std::io::Error> for DocumentError {
    fn from(e: std::io::Error) -> Self {
        DocumentError::Io(e)
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(e: serde_json::Error) -> Self {
        DocumentError::Json(e)
    }
}

impl From<image::ImageError> for DocumentError {
    fn from(e: image::ImageError) -> Self {
        DocumentError::Image(e)
    }
}

// ============================================================================
// PIXEL DOCUMENT — JSON snapshot: {"pixels": {"x,y": "#rrggbb", ...}, ...}
// ============================================================================

/// A persisted pixel snapshot.  Members other than `"pixels"` are carried in
/// `extra` and written back unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PixelDocument {
    pub pixels: PixelDelta,
    pub extra: Map<String, Value>,
}

fn parse_key(key: &str) -> Result<(i32, i32), DocumentError> {
    let bad = || DocumentError::InvalidKey(key.to_string());
    let (x, y) = key.split_once(',').ok_or_else(bad)?;
    let x = x.trim().parse().map_err(|_| bad())?;
    let y = y.trim().parse().map_err(|_| bad())?;
    Ok((x, y))
}

impl PixelDocument {
    pub fn new(pixels: PixelDelta) -> Self {
        Self { pixels, extra: Map::new() }
    }

    /// Optional `"size"` member: the buffer side the document was drawn on.
    pub fn size_hint(&self) -> Option<u32> {
        self.extra
            .get("size")
            .and_then(Value::as_u64)
            .and_then(|s| u32::try_from(s).ok())
    }

    pub fn from_json_str(text: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut extra) = value else {
            return Err(DocumentError::InvalidFormat("document root must be an object".into()));
        };

        let mut pixels = PixelDelta::new();
        match extra.remove("pixels") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                pixels = PixelDelta::with_capacity(map.len());
                for (key, val) in map {
                    let (x, y) = parse_key(&key)?;
                    let s = val.as_str().ok_or_else(|| DocumentError::InvalidColor(val.to_string()))?;
                    let c = color::parse_hex(s).ok_or_else(|| DocumentError::InvalidColor(s.to_string()))?;
                    if !color::is_empty(c) {
                        pixels.paint(x, y, c);
                    }
                }
            }
            Some(other) => {
                return Err(DocumentError::InvalidFormat(format!(
                    "\"pixels\" must be an object, got {}",
                    other
                )));
            }
        }
        Ok(Self { pixels, extra })
    }

    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        let mut pixels = Map::new();
        for ((x, y), edit) in self.pixels.iter() {
            if let PixelEdit::Paint(c) = edit
                && !color::is_empty(c)
            {
                pixels.insert(format!("{},{}", x, y), Value::String(color::to_hex(c)));
            }
        }
        let mut root = self.extra.clone();
        root.insert("pixels".to_string(), Value::Object(pixels));
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path)?;
        let doc = Self::from_json_str(&text)?;
        log::info!("Loaded {} ({} pixels)", path.display(), doc.pixels.len());
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_json_string()?)?;
        log::info!("Saved {} ({} pixels)", path.display(), self.pixels.len());
        Ok(())
    }
}

// ============================================================================
// PNG EXPORT
// ============================================================================

/// Raw buffer as a `size`×`size` PNG (buffer row 0 on top).
pub fn export_png(pixels: &PixelBuffer, path: &Path) -> Result<(), DocumentError> {
    save_png(&pixels.to_rgba_image(), path)
}

pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), DocumentError> {
    image.save_with_format(path, ImageFormat::Png)?;
    log::info!("Exported {}x{} PNG to {}", image.width(), image.height(), path.display());
    Ok(())
}
