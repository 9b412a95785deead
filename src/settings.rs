use std::path::{Path, PathBuf};

use image::Rgba;

use crate::color;
use crate::components::smoothing::SmoothingParams;

/// Buffer size preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CanvasMode {
    /// 256×256
    #[default]
    Sprite,
    /// 1000×1000
    Drawing,
}

impl CanvasMode {
    pub fn size(self) -> u32 {
        match self {
            CanvasMode::Sprite => 256,
            CanvasMode::Drawing => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanvasMode::Sprite => "sprite",
            CanvasMode::Drawing => "drawing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sprite" => Some(CanvasMode::Sprite),
            "drawing" => Some(CanvasMode::Drawing),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub canvas_mode: CanvasMode,
    pub max_undo_steps: usize,
    /// History memory cap in MiB (0 = unlimited).
    pub history_memory_mb: usize,
    pub max_zoom: f32,
    pub zoom_step: f32,
    pub points_per_pixel: f32,
    pub curve_tension: f32,
    pub min_segment_distance: f32,
    pub background_color: Rgba<u8>,
    /// "high performance", "low power", or an adapter name hint.
    pub preferred_gpu: String,
    pub brush_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            canvas_mode: CanvasMode::Sprite,
            max_undo_steps: 50,
            history_memory_mb: 100,
            max_zoom: 100.0,
            zoom_step: crate::view::DEFAULT_ZOOM_STEP,
            points_per_pixel: 2.0,
            curve_tension: 0.25,
            min_segment_distance: 0.5,
            background_color: Rgba([255, 255, 255, 255]),
            preferred_gpu: "high performance".to_string(),
            brush_size: 1,
        }
    }
}

impl Settings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/pixlet/pixlet_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Pixlet\pixlet_settings.cfg
    /// On macOS:   ~/Library/Application Support/Pixlet/pixlet_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("pixlet");
            Some(config_dir.join("pixlet_settings.cfg"))
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            Some(PathBuf::from(appdata).join("Pixlet").join("pixlet_settings.cfg"))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Pixlet")
                    .join("pixlet_settings.cfg"),
            )
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("pixlet_settings.cfg")))
        }
    }

    pub fn canvas_size(&self) -> u32 {
        self.canvas_mode.size()
    }

    pub fn smoothing(&self) -> SmoothingParams {
        SmoothingParams {
            points_per_pixel: self.points_per_pixel,
            tension: self.curve_tension,
            min_segment_distance: self.min_segment_distance,
        }
    }

    pub fn history_memory_bytes(&self) -> Option<usize> {
        (self.history_memory_mb > 0).then(|| self.history_memory_mb * 1024 * 1024)
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "canvas_mode={}\n\
             max_undo_steps={}\n\
             history_memory_mb={}\n\
             max_zoom={}\n\
             zoom_step={}\n\
             points_per_pixel={}\n\
             curve_tension={}\n\
             min_segment_distance={}\n\
             background_color={}\n\
             preferred_gpu={}\n\
             brush_size={}\n",
            self.canvas_mode.as_str(),
            self.max_undo_steps,
            self.history_memory_mb,
            self.max_zoom,
            self.zoom_step,
            self.points_per_pixel,
            self.curve_tension,
            self.min_segment_distance,
            color::to_hex(self.background_color),
            self.preferred_gpu,
            self.brush_size,
        )
    }

    /// Parse `key=value` lines.  Unknown keys, blank lines and unparsable
    /// values are skipped, leaving the default in place.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "canvas_mode" => {
                    if let Some(m) = CanvasMode::parse(val) { s.canvas_mode = m; }
                }
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().ok().filter(|&n| n > 0).unwrap_or(s.max_undo_steps);
                }
                "history_memory_mb" => {
                    s.history_memory_mb = val.parse().unwrap_or(s.history_memory_mb);
                }
                "max_zoom" => {
                    s.max_zoom = positive(val).unwrap_or(s.max_zoom);
                }
                "zoom_step" => {
                    s.zoom_step = positive(val).filter(|&z| z > 1.0).unwrap_or(s.zoom_step);
                }
                "points_per_pixel" => {
                    s.points_per_pixel = positive(val).unwrap_or(s.points_per_pixel);
                }
                "curve_tension" => {
                    s.curve_tension = val.parse().ok().filter(|t: &f32| t.is_finite()).unwrap_or(s.curve_tension);
                }
                "min_segment_distance" => {
                    s.min_segment_distance = val
                        .parse()
                        .ok()
                        .filter(|d: &f32| d.is_finite() && *d >= 0.0)
                        .unwrap_or(s.min_segment_distance);
                }
                "background_color" => {
                    if let Some(c) = color::parse_hex(val) { s.background_color = c; }
                }
                "preferred_gpu" => {
                    s.preferred_gpu = val.to_string();
                }
                "brush_size" => {
                    s.brush_size = val.parse().ok().filter(|&n| n > 0).unwrap_or(s.brush_size);
                }
                other => log::debug!("Settings: unknown key '{}'", other),
            }
        }
        s
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}

fn positive(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_keeps_defaults_for_garbage() {
        let s = Settings::parse(
            "canvas_mode=drawing\n\
             max_undo_steps=abc\n\
             max_zoom=40\n\
             curve_tension=0.5\n\
             background_color=#202020\n\
             brush_size=0\n\
             # comment=ignored\n\
             not a pair\n\
             mystery=1\n",
        );
        assert_eq!(s.canvas_mode, CanvasMode::Drawing);
        assert_eq!(s.canvas_size(), 1000);
        assert_eq!(s.max_undo_steps, 50);
        assert_eq!(s.max_zoom, 40.0);
        assert_eq!(s.curve_tension, 0.5);
        assert_eq!(s.background_color, Rgba([0x20, 0x20, 0x20, 255]));
        assert_eq!(s.brush_size, 1);
    }

    #[test]
    fn config_string_round_trips() {
        let s = Settings {
            canvas_mode: CanvasMode::Drawing,
            history_memory_mb: 0,
            points_per_pixel: 3.0,
            preferred_gpu: "low power".into(),
            ..Settings::default()
        };
        assert_eq!(Settings::parse(&s.to_config_string()), s);
        assert_eq!(s.history_memory_bytes(), None);
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pixlet_settings.cfg");
        let s = Settings { brush_size: 4, ..Settings::default() };
        s.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).brush_size, 4);
        assert_eq!(Settings::load_from(&dir.path().join("missing.cfg")), Settings::default());
    }
}
