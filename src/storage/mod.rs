//! String-keyed slot storage.
//!
//! Every persisted payload in this application lives in a named slot
//! holding a plain string. The trait keeps the store swappable: commands
//! run against files on disk, tests run against an in-memory map.

#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ui::prelude::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("creating data directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

pub trait SlotStore {
    /// Read the raw string stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Write `value` under `key`. Returns false when the write failed;
    /// failures are reported, never raised.
    fn set(&self, key: &str, value: &str) -> bool;

    /// All keys currently present in the store.
    fn keys(&self) -> Vec<String>;
}

/// One file per slot under a data directory, `<dir>/<key>.json`.
pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.slot_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        let path = self.slot_path(key);
        match fs::write(&path, value) {
            Ok(()) => true,
            Err(e) => {
                emit(
                    Level::Error,
                    "storage.write_failed",
                    &format!("writing slot {} to {}: {}", key, path.display(), e),
                    None,
                );
                false
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string())
            })
            .collect();
        keys.sort();
        keys
    }
}

/// In-memory test double for the injected store.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySlotStore {
    slots: RefCell<BTreeMap<String, String>>,
}

#[cfg(test)]
impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl SlotStore for MemorySlotStore {
    fn get(&self, key: &str) -> Option<String> {
        self.slots.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.slots
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        true
    }

    fn keys(&self) -> Vec<String> {
        self.slots.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSlotStore::open(dir.path().to_path_buf()).unwrap();

        assert!(store.get("users").is_none());
        assert!(store.set("users", "[]"));
        assert_eq!(store.get("users").as_deref(), Some("[]"));
        assert_eq!(store.keys(), vec!["users".to_string()]);
    }

    #[test]
    fn file_store_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileSlotStore::open(dir.path().to_path_buf()).unwrap();

        std::fs::write(dir.path().join("notes.txt"), "not a slot").unwrap();
        store.set("session", "{}");

        assert_eq!(store.keys(), vec!["session".to_string()]);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySlotStore::new();
        assert!(store.get("users").is_none());
        store.set("users", "[1]");
        store.set("users_backup", "[2]");
        assert_eq!(store.get("users").as_deref(), Some("[1]"));
        assert_eq!(
            store.keys(),
            vec!["users".to_string(), "users_backup".to_string()]
        );
    }
}
