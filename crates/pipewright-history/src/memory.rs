use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::HistoryError;
use crate::types::{BuildHistoryEntry, StorageInfo};
use crate::{HistoryStore, sort_newest_first};

/// In-memory history. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
  entries: RwLock<Vec<BuildHistoryEntry>>,
}

impl MemoryHistoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
  async fn save(&self, entry: &BuildHistoryEntry) -> Result<(), HistoryError> {
    let mut entries = self.entries.write().await;
    match entries.iter_mut().find(|e| e.id == entry.id) {
      Some(existing) => *existing = entry.clone(),
      None => entries.push(entry.clone()),
    }
    Ok(())
  }

  async fn get(&self, id: &str) -> Result<BuildHistoryEntry, HistoryError> {
    self
      .entries
      .read()
      .await
      .iter()
      .find(|e| e.id == id)
      .cloned()
      .ok_or_else(|| HistoryError::NotFound(id.to_string()))
  }

  async fn get_all(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
    let mut entries = self.entries.read().await.clone();
    sort_newest_first(&mut entries);
    Ok(entries)
  }

  async fn get_by_pipeline(&self, pipeline_id: &str) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
    let mut entries: Vec<_> = self
      .entries
      .read()
      .await
      .iter()
      .filter(|e| e.pipeline_id == pipeline_id)
      .cloned()
      .collect();
    sort_newest_first(&mut entries);
    Ok(entries)
  }

  async fn update(&self, entry: &BuildHistoryEntry) -> Result<BuildHistoryEntry, HistoryError> {
    let mut entries = self.entries.write().await;
    let existing = entries
      .iter_mut()
      .find(|e| e.id == entry.id)
      .ok_or_else(|| HistoryError::NotFound(entry.id.clone()))?;
    let mut updated = entry.clone();
    updated.updated_at = Utc::now();
    *existing = updated.clone();
    Ok(updated)
  }

  async fn delete(&self, id: &str) -> Result<(), HistoryError> {
    self.entries.write().await.retain(|e| e.id != id);
    Ok(())
  }

  async fn delete_by_pipeline(&self, pipeline_id: &str) -> Result<(), HistoryError> {
    self
      .entries
      .write()
      .await
      .retain(|e| e.pipeline_id != pipeline_id);
    Ok(())
  }

  async fn clear(&self) -> Result<(), HistoryError> {
    self.entries.write().await.clear();
    Ok(())
  }

  async fn storage_info(&self) -> Result<StorageInfo, HistoryError> {
    let entries = self.entries.read().await;
    let bytes = serde_json::to_vec(&*entries)?.len() as u64;
    Ok(StorageInfo::from_entries(entries.iter(), bytes))
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  fn entry(id: &str, pipeline: &str, age_secs: i64) -> BuildHistoryEntry {
    let mut e = BuildHistoryEntry::running(id, pipeline, "Demo", 1);
    e.created_at = Utc::now() - Duration::seconds(age_secs);
    e
  }

  #[tokio::test]
  async fn test_listing_is_newest_first() {
    let store = MemoryHistoryStore::new();
    store.save(&entry("old", "p1", 60)).await.unwrap();
    store.save(&entry("new", "p1", 0)).await.unwrap();
    store.save(&entry("other", "p2", 30)).await.unwrap();

    let ids: Vec<String> = store.get_all().await.unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["new", "other", "old"]);

    let ids: Vec<String> = store
      .get_by_pipeline("p1")
      .await
      .unwrap()
      .into_iter()
      .map(|e| e.id)
      .collect();
    assert_eq!(ids, vec!["new", "old"]);
  }

  #[tokio::test]
  async fn test_update_requires_existing_entry() {
    let store = MemoryHistoryStore::new();
    let mut e = entry("run", "p1", 0);
    assert!(matches!(store.update(&e).await, Err(HistoryError::NotFound(id)) if id == "run"));

    store.save(&e).await.unwrap();
    e.completed_steps = 1;
    let stored = store.update(&e).await.unwrap();
    assert!(stored.updated_at >= e.updated_at);
    assert_eq!(store.get("run").await.unwrap().completed_steps, 1);
  }

  #[tokio::test]
  async fn test_delete_and_clear() {
    let store = MemoryHistoryStore::new();
    store.save(&entry("a", "p1", 0)).await.unwrap();
    store.save(&entry("b", "p1", 0)).await.unwrap();
    store.save(&entry("c", "p2", 0)).await.unwrap();

    store.delete("a").await.unwrap();
    store.delete("missing").await.unwrap();
    assert_eq!(store.storage_info().await.unwrap().entries, 2);

    store.delete_by_pipeline("p1").await.unwrap();
    assert_eq!(store.get_all().await.unwrap().len(), 1);

    store.clear().await.unwrap();
    assert_eq!(store.storage_info().await.unwrap().entries, 0);
  }
}
