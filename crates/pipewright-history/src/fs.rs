use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::HistoryError;
use crate::types::{BuildHistoryEntry, StorageInfo};
use crate::{HistoryStore, sort_newest_first};

const FILE_PREFIX: &str = "pipeline-";
const FILE_SUFFIX: &str = ".json";

/// History stored as one JSON array per pipeline.
///
/// Layout:
/// ```text
/// {dir}/
///   pipeline-{sanitized pipeline id}.json
/// ```
///
/// Files are replaced atomically through a temporary sibling. A file that
/// cannot be parsed is treated as an empty history.
pub struct FsHistoryStore {
  dir: PathBuf,
  // serializes read-modify-write cycles
  lock: Mutex<()>,
}

impl FsHistoryStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Path of the history file for `pipeline_id`.
  pub fn file_for(&self, pipeline_id: &str) -> PathBuf {
    self
      .dir
      .join(format!("{}{}{}", FILE_PREFIX, sanitize(pipeline_id), FILE_SUFFIX))
  }

  async fn history_files(&self) -> Result<Vec<PathBuf>, HistoryError> {
    let mut files = Vec::new();
    let mut dir = match tokio::fs::read_dir(&self.dir).await {
      Ok(dir) => dir,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
      Err(e) => return Err(io_error(&self.dir, e)),
    };
    while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
      let name = entry.file_name();
      let name = name.to_string_lossy();
      if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
        files.push(entry.path());
      }
    }
    files.sort();
    Ok(files)
  }

  async fn read_file(&self, path: &Path) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
    let content = match tokio::fs::read(path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_error(path, e)),
    };
    match serde_json::from_slice(&content) {
      Ok(entries) => Ok(entries),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "history_file_corrupt");
        Ok(Vec::new())
      }
    }
  }

  async fn write_file(&self, path: &Path, entries: &[BuildHistoryEntry]) -> Result<(), HistoryError> {
    if entries.is_empty() {
      return match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
      };
    }

    tokio::fs::create_dir_all(&self.dir)
      .await
      .map_err(|e| io_error(&self.dir, e))?;

    let content = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
      .await
      .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
      .await
      .map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), entries = entries.len(), "history_file_written");
    Ok(())
  }

  async fn read_all(&self) -> Result<Vec<(PathBuf, Vec<BuildHistoryEntry>)>, HistoryError> {
    let mut all = Vec::new();
    for path in self.history_files().await? {
      let entries = self.read_file(&path).await?;
      all.push((path, entries));
    }
    Ok(all)
  }
}

#[async_trait]
impl HistoryStore for FsHistoryStore {
  async fn save(&self, entry: &BuildHistoryEntry) -> Result<(), HistoryError> {
    let _guard = self.lock.lock().await;
    let path = self.file_for(&entry.pipeline_id);
    let mut entries = self.read_file(&path).await?;
    match entries.iter_mut().find(|e| e.id == entry.id) {
      Some(existing) => *existing = entry.clone(),
      None => entries.push(entry.clone()),
    }
    self.write_file(&path, &entries).await
  }

  async fn get(&self, id: &str) -> Result<BuildHistoryEntry, HistoryError> {
    let _guard = self.lock.lock().await;
    self
      .read_all()
      .await?
      .into_iter()
      .flat_map(|(_, entries)| entries)
      .find(|e| e.id == id)
      .ok_or_else(|| HistoryError::NotFound(id.to_string()))
  }

  async fn get_all(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
    let _guard = self.lock.lock().await;
    let mut entries: Vec<_> = self
      .read_all()
      .await?
      .into_iter()
      .flat_map(|(_, entries)| entries)
      .collect();
    sort_newest_first(&mut entries);
    Ok(entries)
  }

  async fn get_by_pipeline(&self, pipeline_id: &str) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
    let _guard = self.lock.lock().await;
    let mut entries = self.read_file(&self.file_for(pipeline_id)).await?;
    entries.retain(|e| e.pipeline_id == pipeline_id);
    sort_newest_first(&mut entries);
    Ok(entries)
  }

  async fn update(&self, entry: &BuildHistoryEntry) -> Result<BuildHistoryEntry, HistoryError> {
    let _guard = self.lock.lock().await;
    let path = self.file_for(&entry.pipeline_id);
    let mut entries = self.read_file(&path).await?;
    let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) else {
      return Err(HistoryError::NotFound(entry.id.clone()));
    };
    let mut updated = entry.clone();
    updated.updated_at = Utc::now();
    *existing = updated.clone();
    self.write_file(&path, &entries).await?;
    Ok(updated)
  }

  async fn delete(&self, id: &str) -> Result<(), HistoryError> {
    let _guard = self.lock.lock().await;
    for (path, mut entries) in self.read_all().await? {
      let before = entries.len();
      entries.retain(|e| e.id != id);
      if entries.len() != before {
        self.write_file(&path, &entries).await?;
      }
    }
    Ok(())
  }

  async fn delete_by_pipeline(&self, pipeline_id: &str) -> Result<(), HistoryError> {
    let _guard = self.lock.lock().await;
    let path = self.file_for(pipeline_id);
    // ids that sanitize alike share a file
    let mut entries = self.read_file(&path).await?;
    entries.retain(|e| e.pipeline_id != pipeline_id);
    self.write_file(&path, &entries).await
  }

  async fn clear(&self) -> Result<(), HistoryError> {
    let _guard = self.lock.lock().await;
    for path in self.history_files().await? {
      self.write_file(&path, &[]).await?;
    }
    Ok(())
  }

  async fn storage_info(&self) -> Result<StorageInfo, HistoryError> {
    let _guard = self.lock.lock().await;
    let mut bytes = 0;
    let mut entries = Vec::new();
    for path in self.history_files().await? {
      if let Ok(meta) = tokio::fs::metadata(&path).await {
        bytes += meta.len();
      }
      entries.extend(self.read_file(&path).await?);
    }
    Ok(StorageInfo::from_entries(&entries, bytes))
  }
}

fn io_error(path: &Path, source: std::io::Error) -> HistoryError {
  HistoryError::Io {
    path: path.display().to_string(),
    source,
  }
}

/// Make a pipeline id safe to use in a file name.
///
/// Characters that are invalid on common filesystems become `_`, runs of `_`
/// collapse to one and leading or trailing `_` are dropped.
fn sanitize(id: &str) -> String {
  let mut out = String::with_capacity(id.len());
  for c in id.chars() {
    let c = if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
      '_'
    } else {
      c
    };
    if c == '_' && out.ends_with('_') {
      continue;
    }
    out.push(c);
  }
  out.trim_matches('_').to_string()
}
