//! Persistent key/value slots for background results.
//!
//! One slot per task name, last write wins. The file store keeps each slot
//! in its own JSON file under `<data_dir>/results/` and replaces it
//! atomically, so a reader sees either the old or the new value.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::config::is_valid_task_name;
use crate::error::{BeaconError, Result};

/// Flat task name -> serialized value store.
pub trait ResultStore: Send + Sync + fmt::Debug {
    /// Reads the slot for `task_name`, `None` if never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot exists but cannot be read.
    fn load(&self, task_name: &str) -> Result<Option<String>>;

    /// Overwrites the slot for `task_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn save(&self, task_name: &str, value: &str) -> Result<()>;

    /// Task names with a slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn task_names(&self) -> Result<Vec<String>>;
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/beacon/`
/// Elsewhere: the platform data directory (e.g. `~/Library/Application Support/beacon`).
///
/// # Errors
///
/// Returns an error if no home directory can be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/beacon"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "beacon").ok_or_else(|| {
            BeaconError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

// ============================================================================
// File store
// ============================================================================

/// Slots stored as `<data_dir>/results/<task_name>.json`.
#[derive(Debug)]
pub struct FileResultStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileResultStore {
    /// Create a store rooted at `data_dir`.
    ///
    /// The directory is created on first write.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of this store.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    fn slot_path(&self, task_name: &str) -> Result<PathBuf> {
        if !is_valid_task_name(task_name) {
            return Err(BeaconError::InvalidTaskName(task_name.to_string()));
        }
        Ok(self.results_dir().join(format!("{task_name}.json")))
    }
}

impl ResultStore for FileResultStore {
    fn load(&self, task_name: &str) -> Result<Option<String>> {
        let path = self.slot_path(task_name)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BeaconError::PersistenceError(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn save(&self, task_name: &str, value: &str) -> Result<()> {
        let path = self.slot_path(task_name)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        std::fs::create_dir_all(self.results_dir())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        debug!(task_name, path = %path.display(), "Saved result slot");
        Ok(())
    }

    fn task_names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(self.results_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .filter(|name| is_valid_task_name(name))
            .collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Slots held in memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryResultStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn load(&self, task_name: &str) -> Result<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(task_name).cloned())
    }

    fn save(&self, task_name: &str, value: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(task_name.to_string(), value.to_string());
        Ok(())
    }

    fn task_names(&self) -> Result<Vec<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path());

        assert_eq!(store.load("AdvertisementWatcherTask").unwrap(), None);

        store.save("AdvertisementWatcherTask", "A").unwrap();
        store.save("AdvertisementWatcherTask", "B").unwrap();

        assert_eq!(store.load("AdvertisementWatcherTask").unwrap().as_deref(), Some("B"));
        assert!(dir.path().join("results/AdvertisementWatcherTask.json").exists());
        assert!(!dir.path().join("results/AdvertisementWatcherTask.json.tmp").exists());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileResultStore::new(dir.path()).save("task", "persisted").unwrap();

        let reopened = FileResultStore::new(dir.path());
        assert_eq!(reopened.load("task").unwrap().as_deref(), Some("persisted"));
        assert_eq!(reopened.task_names().unwrap(), vec!["task".to_string()]);
    }

    #[test]
    fn test_file_store_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path());

        assert!(matches!(
            store.save("../escape", "x"),
            Err(BeaconError::InvalidTaskName(_))
        ));
        assert!(store.load("a/b").is_err());
    }

    #[test]
    fn test_task_names_empty_when_nothing_written() {
        let dir = TempDir::new().unwrap();
        assert!(FileResultStore::new(dir.path()).task_names().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryResultStore::new();
        assert_eq!(store.load("x").unwrap(), None);
        store.save("x", "A").unwrap();
        store.save("x", "B").unwrap();
        assert_eq!(store.load("x").unwrap().as_deref(), Some("B"));
        assert_eq!(store.task_names().unwrap(), vec!["x".to_string()]);
    }
}
