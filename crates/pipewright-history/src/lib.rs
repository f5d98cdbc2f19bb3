//! Pipewright History
//!
//! This crate keeps the audit trail of pipeline runs. The [`Recorder`] opens a
//! [`BuildHistoryEntry`] when a run starts, attaches step records and log
//! lines while it executes, and closes the entry with a terminal status.
//!
//! The [`HistoryStore`] trait defines operations for:
//! - Saving and updating entries (always whole-record writes)
//! - Listing entries overall or per pipeline, newest first
//! - Deleting single entries, a pipeline's history, or everything
//!
//! [`FsHistoryStore`] keeps one JSON document per pipeline on disk;
//! [`MemoryHistoryStore`] is for tests and ephemeral runs.

mod error;
mod fs;
mod memory;
mod recorder;
mod types;

pub use error::HistoryError;
pub use fs::FsHistoryStore;
pub use memory::MemoryHistoryStore;
pub use recorder::Recorder;
pub use types::{
  BuildHistoryEntry, BuildStatus, ExecutionError, ExecutionStep, LogEntry, StepStatus, StorageInfo,
};

use async_trait::async_trait;

/// Storage for build history entries.
#[async_trait]
pub trait HistoryStore: Send + Sync {
  /// Insert an entry, replacing any entry with the same id.
  async fn save(&self, entry: &BuildHistoryEntry) -> Result<(), HistoryError>;

  /// Get an entry by id.
  async fn get(&self, id: &str) -> Result<BuildHistoryEntry, HistoryError>;

  /// All entries, newest first.
  async fn get_all(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError>;

  /// Entries for one pipeline, newest first.
  async fn get_by_pipeline(&self, pipeline_id: &str) -> Result<Vec<BuildHistoryEntry>, HistoryError>;

  /// Overwrite an existing entry. Fails with `NotFound` if it was never saved.
  /// Returns the stored record with `updated_at` bumped.
  async fn update(&self, entry: &BuildHistoryEntry) -> Result<BuildHistoryEntry, HistoryError>;

  /// Delete an entry. Deleting an unknown id is not an error.
  async fn delete(&self, id: &str) -> Result<(), HistoryError>;

  async fn delete_by_pipeline(&self, pipeline_id: &str) -> Result<(), HistoryError>;

  async fn clear(&self) -> Result<(), HistoryError>;

  async fn storage_info(&self) -> Result<StorageInfo, HistoryError>;
}

/// Sort newest first by creation time.
pub(crate) fn sort_newest_first(entries: &mut [BuildHistoryEntry]) {
  entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
