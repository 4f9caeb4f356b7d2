//! Document files: the whole editor state (canvas objects plus the group
//! layout) as JSON on disk, loaded and saved through native dialogs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canvas::CanvasObject;
use crate::layers::GroupLayer;

pub const DOC_EXTENSION: &str = "rtc";
const DOC_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("document i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported document version {0}")]
    Version(u32),
}

/// On-disk document payload.
#[derive(Serialize, Deserialize)]
pub struct DocumentFile {
    pub version: u32,
    pub width: f32,
    pub height: f32,
    pub objects: Vec<CanvasObject>,
    /// Group layout embedded with the content it belongs to.
    #[serde(default)]
    pub groups: Vec<GroupLayer>,
}

impl DocumentFile {
    pub fn new(width: f32, height: f32, objects: Vec<CanvasObject>, groups: Vec<GroupLayer>) -> Self {
        Self {
            version: DOC_VERSION,
            width,
            height,
            objects,
            groups,
        }
    }
}

pub fn load_document(path: &Path) -> Result<DocumentFile, DocError> {
    let json = fs::read_to_string(path)?;
    let doc: DocumentFile = serde_json::from_str(&json)?;
    if doc.version > DOC_VERSION {
        return Err(DocError::Version(doc.version));
    }
    Ok(doc)
}

pub fn save_document(path: &Path, doc: &DocumentFile) -> Result<(), DocError> {
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path, json)?;
    Ok(())
}

/// Native open/save dialogs.  Dialog cancellation is `None`, not an error.
#[derive(Default)]
pub struct FileHandler;

impl FileHandler {
    pub fn pick_open_path(&self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .add_filter("Retouchr document", &[DOC_EXTENSION])
            .pick_file()
    }

    pub fn pick_save_path(&self, suggested_name: &str) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .add_filter("Retouchr document", &[DOC_EXTENSION])
            .set_file_name(&format!("{}.{}", suggested_name, DOC_EXTENSION))
            .save_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ObjectKind;

    #[test]
    fn document_round_trips_through_disk() {
        let dir = std::env::temp_dir().join("retouchr-io-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("doc.rtc");

        let mut obj = CanvasObject::new(ObjectKind::Text, "caption");
        obj.id = "obj-1".to_string();
        obj.text = Some("hello".to_string());
        let doc = DocumentFile::new(800.0, 600.0, vec![obj], Vec::new());
        save_document(&path, &doc).unwrap();

        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.version, DOC_VERSION);
        assert_eq!(loaded.objects.len(), 1);
        assert_eq!(loaded.objects[0].id, "obj-1");
        assert_eq!(loaded.objects[0].text.as_deref(), Some("hello"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn future_versions_are_rejected() {
        let dir = std::env::temp_dir().join("retouchr-io-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("future.rtc");
        fs::write(
            &path,
            r#"{"version":99,"width":10.0,"height":10.0,"objects":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            load_document(&path),
            Err(DocError::Version(99))
        ));
        let _ = fs::remove_file(&path);
    }
}
