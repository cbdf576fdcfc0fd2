//! Durable storage for thread-binding records.
//!
//! The storage contract is pluggable; the default backend keeps a JSON
//! array in one file and writes the full list back on every mutation. A
//! missing file reads as empty.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use tether_types::binding::ThreadBindingRecord;

use crate::error::Result;

/// Pluggable persistence for binding records.
#[async_trait]
pub trait ThreadBindingStorage: Send + Sync {
    /// Load all records.
    async fn load(&self) -> Result<Vec<ThreadBindingRecord>>;

    /// Insert or replace a record by id.
    async fn save(&self, record: &ThreadBindingRecord) -> Result<()>;

    /// Remove a record by id. Unknown ids are a no-op.
    async fn delete(&self, id: &str) -> Result<()>;

    /// List all records.
    async fn list(&self) -> Result<Vec<ThreadBindingRecord>> {
        self.load().await
    }

    /// Remove every record expired as of `now`; returns how many.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let records = self.load().await?;
        let mut removed = 0;
        for record in records {
            if record.is_expired(now) {
                self.delete(&record.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// JSON-file backend.
pub struct JsonFileBindingStorage {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileBindingStorage {
    /// A backend writing to `bindings.json` under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("bindings.json"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<ThreadBindingRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_all(&self, records: &[ThreadBindingRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(count = records.len(), "binding records written");
        Ok(())
    }
}

#[async_trait]
impl ThreadBindingStorage for JsonFileBindingStorage {
    async fn load(&self) -> Result<Vec<ThreadBindingRecord>> {
        self.read_all().await
    }

    async fn save(&self, record: &ThreadBindingRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.write_all(&records).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        records.retain(|r| r.id != id);
        self.write_all(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tether_types::binding::{BindingConversation, BindingTargetKind};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir(prefix: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("tether_bindstore_{prefix}_{}_{id}", std::process::id()))
    }

    fn record(id: &str, expires_at: Option<DateTime<Utc>>) -> ThreadBindingRecord {
        ThreadBindingRecord {
            id: id.into(),
            target_session_key: format!("acp:default:{id}"),
            target_kind: BindingTargetKind::Session,
            conversation: BindingConversation {
                channel: "slack".into(),
                account_id: "a1".into(),
                conversation_id: format!("C-{id}"),
            },
            placement: String::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let storage = JsonFileBindingStorage::new(temp_dir("missing"));
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = temp_dir("save");
        let storage = JsonFileBindingStorage::new(&dir);

        storage.save(&record("b1", None)).await.unwrap();
        storage.save(&record("b2", None)).await.unwrap();

        let records = storage.load().await.unwrap();
        assert_eq!(records.len(), 2);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn save_upserts_by_id() {
        let dir = temp_dir("upsert");
        let storage = JsonFileBindingStorage::new(&dir);

        storage.save(&record("b1", None)).await.unwrap();
        let mut updated = record("b1", None);
        updated.placement = "thread".into();
        storage.save(&updated).await.unwrap();

        let records = storage.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].placement, "thread");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let dir = temp_dir("delete");
        let storage = JsonFileBindingStorage::new(&dir);

        storage.save(&record("b1", None)).await.unwrap();
        storage.save(&record("b2", None)).await.unwrap();
        storage.delete("b1").await.unwrap();

        let records = storage.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "b2");

        // Unknown id is a no-op.
        storage.delete("ghost").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn cleanup_expired_removes_only_past_records() {
        let dir = temp_dir("cleanup");
        let storage = JsonFileBindingStorage::new(&dir);
        let now = Utc::now();

        storage
            .save(&record("old", Some(now - chrono::Duration::hours(1))))
            .await
            .unwrap();
        storage
            .save(&record("fresh", Some(now + chrono::Duration::hours(1))))
            .await
            .unwrap();

        let removed = storage.cleanup_expired(now).await.unwrap();
        assert_eq!(removed, 1);

        let records = storage.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "fresh");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
