//! Storage module for visit history and its file backends.

pub mod files;
pub mod history;

pub use files::{DirectoryStore, MemoryStore, StorageError, TextStore};
pub use history::{HistoryError, PersistedAnswer, StudentRecord, VisitHistory, VisitRecord};
