//! Named text-blob storage.
//!
//! The persistence layer reads and writes whole documents through the
//! narrow `TextStore` trait, so hosts can swap the app-private directory
//! for an in-memory store in tests.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

/// Read/write access to named text blobs.
///
/// Names are plain file names, not paths; stores may reject anything that
/// would escape their root.
pub trait TextStore: Send + Sync {
    /// Read a blob. `Ok(None)` means the blob does not exist.
    fn read_text(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Write a blob, replacing any previous content.
    fn write_text(&self, name: &str, content: &str) -> Result<(), StorageError>;
}

/// Text blobs as files under a root directory.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Store files under `root`. The directory is created on first write.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store files under the platform data directory.
    pub fn default_location() -> Self {
        let root = directories::ProjectDirs::from("com", "classlink", "ClassLink")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    /// Root directory backing this store.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn checked_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl TextStore for DirectoryStore {
    fn read_text(&self, name: &str) -> Result<Option<String>, StorageError> {
        let path = self.checked_path(name)?;

        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(e.to_string())),
        }
    }

    fn write_text(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let path = self.checked_path(name)?;

        fs::create_dir_all(&self.root).map_err(|e| StorageError::IoError(e.to_string()))?;

        // Write via a temp file and rename so readers never see a
        // half-written document.
        let tmp_path = self.root.join(format!("{name}.tmp"));
        fs::write(&tmp_path, content).map_err(|e| StorageError::IoError(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| StorageError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// In-memory text store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextStore for MemoryStore {
    fn read_text(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().unwrap().get(name).cloned())
    }

    fn write_text(&self, name: &str, content: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap()
            .insert(name.to_string(), content.to_string());
        Ok(())
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}
