//! Group-layout persistence.
//!
//! Only the group structure is stored — canvas content lives in the
//! document file.  Layouts are keyed by a cheap fingerprint of the
//! serialized canvas so a reopened document finds its own grouping, with
//! a global slot as fallback.  Everything here is best-effort: a failed
//! read or write costs the user a saved layout, never the editor.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use super::GroupLayer;
use crate::log_warn;

const GLOBAL_KEY: &str = "layer-groups";

fn canvas_key(hash: &str) -> String {
    format!("layer-groups.{}", hash)
}

/// Cheap, non-cryptographic content fingerprint: input length plus a
/// rolling char-code accumulator.  Used only to namespace storage slots;
/// a collision at worst loads the wrong layout, which the user can undo
/// by regrouping.
pub fn content_hash(serialized: &str) -> String {
    let mut acc: u32 = 0;
    for ch in serialized.chars() {
        acc = acc
            .wrapping_shl(5)
            .wrapping_sub(acc)
            .wrapping_add(ch as u32);
    }
    format!("{}-{:08x}", serialized.len(), acc)
}

// ============================================================================
// KEY-VALUE BACKENDS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous string key-value storage.  Reads are infallible by
/// convention (a missing or unreadable entry is `None`); writes surface
/// their error so the caller can log it.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str);
}

/// In-memory backend, used by tests and as a last-resort fallback.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// One file per key under a directory, keys sanitized into file names.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            log_warn!("could not create storage dir {:?}: {}", dir, e);
        }
        Self { dir }
    }

    /// Store rooted in the app's slice of the OS data directory.
    pub fn in_app_data() -> Self {
        Self::new(crate::logger::data_dir().join("Retouchr").join("store"))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for DiskStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }
}

// ============================================================================
// GROUP STORE
// ============================================================================

/// Saved group layouts over an arbitrary backend.  All failures are
/// logged and absorbed — load degrades to "no saved layout".
pub struct GroupStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> GroupStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save(&mut self, groups: &[GroupLayer]) {
        self.write(GLOBAL_KEY, groups);
    }

    pub fn load(&self) -> Vec<GroupLayer> {
        self.read(GLOBAL_KEY)
    }

    pub fn save_for_canvas(&mut self, canvas_hash: &str, groups: &[GroupLayer]) {
        self.write(&canvas_key(canvas_hash), groups);
    }

    pub fn load_for_canvas(&self, canvas_hash: &str) -> Vec<GroupLayer> {
        self.read(&canvas_key(canvas_hash))
    }

    /// Canvas-scoped layout when present and non-empty, else the global
    /// slot, else nothing.
    pub fn load_with_fallback(&self, canvas_hash: &str) -> Vec<GroupLayer> {
        let scoped = self.load_for_canvas(canvas_hash);
        if !scoped.is_empty() {
            return scoped;
        }
        self.load()
    }

    fn write(&mut self, key: &str, groups: &[GroupLayer]) {
        let json = match serde_json::to_string(groups) {
            Ok(json) => json,
            Err(e) => {
                log_warn!("group layout not saved ({}): {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(key, &json) {
            log_warn!("group layout not saved ({}): {}", key, e);
        }
    }

    fn read(&self, key: &str) -> Vec<GroupLayer> {
        let Some(json) = self.store.get(key) else {
            return Vec::new();
        };
        match serde_json::from_str(&json) {
            Ok(groups) => groups,
            Err(e) => {
                log_warn!("discarding unreadable group layout ({}): {}", key, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LayerNode, ObjectLayer};

    fn member(id: &str) -> LayerNode {
        LayerNode::Object(ObjectLayer {
            id: id.to_string(),
            name: id.to_string(),
            kind: "Rectangle".to_string(),
            visible: true,
            editable: true,
            z_index: Some(0),
            object_ref: id.to_string(),
        })
    }

    fn sample_group(id: &str, members: &[&str]) -> GroupLayer {
        GroupLayer {
            id: id.to_string(),
            name: "Saved".to_string(),
            visible: true,
            editable: true,
            expanded: false,
            children: members.iter().map(|m| member(m)).collect(),
        }
    }

    #[test]
    fn round_trip_preserves_structure() {
        let mut store = GroupStore::new(MemoryStore::default());
        let groups = vec![sample_group("g1", &["a", "b"])];
        store.save_for_canvas("hash-1", &groups);
        assert_eq!(store.load_for_canvas("hash-1"), groups);
    }

    #[test]
    fn canvas_scoped_layout_wins_over_global() {
        let mut store = GroupStore::new(MemoryStore::default());
        store.save(&[sample_group("global", &["a"])]);
        store.save_for_canvas("h", &[sample_group("scoped", &["b"])]);
        let got = store.load_with_fallback("h");
        assert_eq!(got[0].id, "scoped");
    }

    #[test]
    fn missing_or_empty_scoped_layout_falls_back_to_global() {
        let mut store = GroupStore::new(MemoryStore::default());
        store.save(&[sample_group("global", &["a"])]);
        assert_eq!(store.load_with_fallback("unknown")[0].id, "global");
        // An explicitly-saved empty layout also falls through.
        store.save_for_canvas("h", &[]);
        assert_eq!(store.load_with_fallback("h")[0].id, "global");
    }

    #[test]
    fn no_layout_anywhere_loads_empty() {
        let store = GroupStore::new(MemoryStore::default());
        assert!(store.load_with_fallback("h").is_empty());
    }

    #[test]
    fn corrupt_payload_degrades_to_empty() {
        let mut backing = MemoryStore::default();
        backing.set(&canvas_key("h"), "{not json").unwrap();
        let store = GroupStore::new(backing);
        assert!(store.load_for_canvas("h").is_empty());
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = content_hash(r#"{"objects":[1,2,3]}"#);
        assert_eq!(a, content_hash(r#"{"objects":[1,2,3]}"#));
        assert_ne!(a, content_hash(r#"{"objects":[1,2,4]}"#));
        // Same length, different content: the accumulator still splits them.
        assert_ne!(content_hash("abcd"), content_hash("abce"));
    }
}
