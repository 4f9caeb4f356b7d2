use std::path::PathBuf;
use uuid::Uuid;

/// Bookkeeping for the open document: where it lives on disk and whether
/// it has unsaved edits.  The canvas engine holds the content itself.
pub struct Document {
    pub id: Uuid,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
}

impl Document {
    pub fn new_untitled(untitled_counter: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: None,
            is_dirty: false,
            name: format!("Untitled-{}", untitled_counter),
        }
    }

    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        Self {
            id: Uuid::new_v4(),
            path: Some(path),
            is_dirty: false,
            name,
        }
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

    /// Window-title form: name plus a dirty marker.
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}
