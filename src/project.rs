use std::path::PathBuf;
use uuid::Uuid;

use crate::canvas::Canvas;
use crate::components::history::HistoryManager;

/// Single open document.
pub struct Project {
    pub id: Uuid,
    pub canvas: Canvas,
    pub history: HistoryManager,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,

    /// Display name (derived from path or "Untitled-X")
    pub name: String,

    /// Document members other than the pixels, written back unchanged on save.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, canvas: Canvas, history: HistoryManager) -> Self {
        Self {
            id: Uuid::new_v4(),
            canvas,
            history,
            path: None,
            is_dirty: false,
            name: format!("Untitled-{}", untitled_counter),
            extra: serde_json::Map::new(),
        }
    }

    pub fn from_file(path: PathBuf, canvas: Canvas, history: HistoryManager) -> Self {
        let mut project = Self::new_untitled(0, canvas, history);
        project.path = Some(path);
        project.update_name_from_path();
        project
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Name with a dirty marker.
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}
