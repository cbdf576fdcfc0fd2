//! Thread-binding registry.
//!
//! Maps a channel conversation to a bound target session (typically an
//! ACP coding session). In-memory indexes by id, conversation key, and
//! target session back a pluggable durable store; expired records are
//! swept by [`ThreadBindingService::cleanup_expired`].

pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tether_core::acp::ThreadRouter;
use tether_types::binding::{
    BindingConversation, BindingPolicy, BindingTargetKind, ThreadBindingRecord,
};
use tether_types::config::BindingOverride;

use crate::error::{Result, ServiceError};
use storage::ThreadBindingStorage;

/// Input to [`ThreadBindingService::bind`].
#[derive(Debug, Clone)]
pub struct BindInput {
    /// Target session key.
    pub target_session_key: String,

    /// Session or sub-agent target.
    pub target_kind: BindingTargetKind,

    /// The conversation to bind.
    pub conversation: BindingConversation,

    /// Reply placement hint.
    pub placement: String,

    /// Arbitrary metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, ThreadBindingRecord>,
    by_conversation: HashMap<String, String>,
    by_session: HashMap<String, Vec<String>>,
}

impl Indexes {
    fn insert(&mut self, record: ThreadBindingRecord) {
        self.by_conversation
            .insert(record.conversation.key(), record.id.clone());
        self.by_session
            .entry(record.target_session_key.clone())
            .or_default()
            .push(record.id.clone());
        self.by_id.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<ThreadBindingRecord> {
        let record = self.by_id.remove(id)?;
        self.by_conversation.remove(&record.conversation.key());
        if let Some(ids) = self.by_session.get_mut(&record.target_session_key) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_session.remove(&record.target_session_key);
            }
        }
        Some(record)
    }
}

/// The registry service.
pub struct ThreadBindingService {
    indexes: RwLock<Indexes>,
    storage: Arc<dyn ThreadBindingStorage>,
    /// Policy overrides keyed by `"{channel}:{account}"` or `"{channel}"`.
    overrides: HashMap<String, BindingOverride>,
}

impl ThreadBindingService {
    /// Create a service over `storage`, loading existing records.
    pub async fn new(
        storage: Arc<dyn ThreadBindingStorage>,
        overrides: HashMap<String, BindingOverride>,
    ) -> Result<Self> {
        let mut indexes = Indexes::default();
        for record in storage.load().await? {
            indexes.insert(record);
        }
        info!(count = indexes.by_id.len(), "thread bindings loaded");

        Ok(Self {
            indexes: RwLock::new(indexes),
            storage,
            overrides,
        })
    }

    /// Create a binding.
    ///
    /// Fails when an active record already exists for the conversation
    /// key. The record expires after the policy's `max_age_ms`.
    pub async fn bind(&self, input: BindInput) -> Result<ThreadBindingRecord> {
        let conv_key = input.conversation.key();
        let policy = self.resolve_policy(
            &input.conversation.channel,
            &input.conversation.account_id,
            input.target_kind,
        );

        let now = Utc::now();
        let record = ThreadBindingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_session_key: input.target_session_key,
            target_kind: input.target_kind,
            conversation: input.conversation,
            placement: input.placement,
            metadata: input.metadata,
            created_at: now,
            expires_at: Some(now + Duration::milliseconds(policy.max_age_ms)),
        };

        {
            let mut indexes = self.indexes.write().await;
            if indexes.by_conversation.contains_key(&conv_key) {
                return Err(ServiceError::BindingExists(conv_key));
            }
            indexes.insert(record.clone());
        }

        self.storage.save(&record).await?;
        debug!(id = %record.id, conversation = %conv_key, "thread binding created");
        Ok(record)
    }

    /// Remove a binding by id.
    pub async fn unbind(&self, id: &str) -> Result<()> {
        let removed = self.indexes.write().await.remove(id);
        if removed.is_none() {
            return Err(ServiceError::BindingNotFound(id.to_string()));
        }
        self.storage.delete(id).await?;
        debug!(id, "thread binding removed");
        Ok(())
    }

    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> Option<ThreadBindingRecord> {
        self.indexes.read().await.by_id.get(id).cloned()
    }

    /// Look up the active record for a conversation.
    pub async fn get_by_conversation(
        &self,
        channel: &str,
        account_id: &str,
        conversation_id: &str,
    ) -> Option<ThreadBindingRecord> {
        let key = BindingConversation {
            channel: channel.into(),
            account_id: account_id.into(),
            conversation_id: conversation_id.into(),
        }
        .key();

        let indexes = self.indexes.read().await;
        let id = indexes.by_conversation.get(&key)?;
        indexes.by_id.get(id).cloned()
    }

    /// All records bound to a target session.
    pub async fn get_by_session(&self, session_key: &str) -> Vec<ThreadBindingRecord> {
        let indexes = self.indexes.read().await;
        indexes
            .by_session
            .get(session_key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| indexes.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All records.
    pub async fn list(&self) -> Vec<ThreadBindingRecord> {
        let mut records: Vec<_> = self.indexes.read().await.by_id.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Remove every record with `expires_at < now`, in memory and in
    /// storage. Returns the removed count.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let indexes = self.indexes.read().await;
            indexes
                .by_id
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.id.clone())
                .collect()
        };

        let mut removed = 0;
        for id in expired {
            self.indexes.write().await.remove(&id);
            if let Err(e) = self.storage.delete(&id).await {
                warn!(id = %id, error = %e, "failed to delete expired binding from storage");
            }
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "expired thread bindings swept");
        }
        Ok(removed)
    }

    /// Effective policy for a `(channel, account, kind)` triple.
    ///
    /// Config overrides are consulted most-specific first
    /// (`"{channel}:{account}"`, then `"{channel}"`) on top of the
    /// defaults.
    pub fn resolve_policy(
        &self,
        channel: &str,
        account_id: &str,
        _kind: BindingTargetKind,
    ) -> BindingPolicy {
        let mut policy = BindingPolicy::default();

        let account = if account_id.is_empty() { "default" } else { account_id };
        let keys = [format!("{channel}:{account}"), channel.to_string()];

        // Apply generic before specific so the specific wins.
        for key in keys.iter().rev() {
            if let Some(ov) = self.overrides.get(key) {
                if let Some(enabled) = ov.enabled {
                    policy.enabled = enabled;
                }
                if let Some(spawn_enabled) = ov.spawn_enabled {
                    policy.spawn_enabled = spawn_enabled;
                }
                if let Some(idle) = ov.idle_timeout_ms {
                    policy.idle_timeout_ms = idle;
                }
                if let Some(max_age) = ov.max_age_ms {
                    policy.max_age_ms = max_age;
                }
            }
        }

        policy
    }
}

#[async_trait]
impl ThreadRouter for ThreadBindingService {
    async fn resolve(
        &self,
        channel: &str,
        account_id: &str,
        conversation_id: &str,
    ) -> Option<ThreadBindingRecord> {
        let record = self
            .get_by_conversation(channel, account_id, conversation_id)
            .await?;
        if record.is_expired(Utc::now()) {
            return None;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use storage::JsonFileBindingStorage;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir(prefix: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("tether_binding_{prefix}_{}_{id}", std::process::id()))
    }

    async fn service(dir: &PathBuf) -> ThreadBindingService {
        let storage = Arc::new(JsonFileBindingStorage::new(dir));
        ThreadBindingService::new(storage, HashMap::new())
            .await
            .unwrap()
    }

    fn bind_input(conversation_id: &str) -> BindInput {
        BindInput {
            target_session_key: "acp:default:work".into(),
            target_kind: BindingTargetKind::Session,
            conversation: BindingConversation {
                channel: "slack".into(),
                account_id: "a1".into(),
                conversation_id: conversation_id.into(),
            },
            placement: "thread".into(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn bind_and_lookup() {
        let dir = temp_dir("bind");
        let svc = service(&dir).await;

        let record = svc.bind(bind_input("C1")).await.unwrap();
        assert!(!record.id.is_empty());
        assert!(record.expires_at.is_some());

        let found = svc.get_by_conversation("slack", "a1", "C1").await.unwrap();
        assert_eq!(found.id, record.id);

        let by_session = svc.get_by_session("acp:default:work").await;
        assert_eq!(by_session.len(), 1);

        assert!(svc.get(&record.id).await.is_some());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn duplicate_conversation_rejected() {
        let dir = temp_dir("dup");
        let svc = service(&dir).await;

        svc.bind(bind_input("C1")).await.unwrap();
        let err = svc.bind(bind_input("C1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::BindingExists(_)));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn unbind_removes_everywhere() {
        let dir = temp_dir("unbind");
        let svc = service(&dir).await;

        let record = svc.bind(bind_input("C1")).await.unwrap();
        svc.unbind(&record.id).await.unwrap();

        assert!(svc.get(&record.id).await.is_none());
        assert!(svc.get_by_conversation("slack", "a1", "C1").await.is_none());
        assert!(svc.get_by_session("acp:default:work").await.is_empty());

        // A new bind for the same conversation now succeeds.
        svc.bind(bind_input("C1")).await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn unbind_unknown_fails() {
        let dir = temp_dir("unbind_unknown");
        let svc = service(&dir).await;
        assert!(matches!(
            svc.unbind("ghost").await,
            Err(ServiceError::BindingNotFound(_))
        ));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn ttl_sweep_removes_expired_and_persists() {
        let dir = temp_dir("sweep");
        let storage = Arc::new(JsonFileBindingStorage::new(&dir));
        let now = Utc::now();

        // Seed storage with one expired and one live record.
        let mut expired = ThreadBindingRecord {
            id: "old".into(),
            target_session_key: "acp:default:a".into(),
            target_kind: BindingTargetKind::Session,
            conversation: BindingConversation {
                channel: "slack".into(),
                account_id: "a1".into(),
                conversation_id: "C-old".into(),
            },
            placement: String::new(),
            metadata: HashMap::new(),
            created_at: now - Duration::hours(2),
            expires_at: Some(now - Duration::hours(1)),
        };
        storage.save(&expired).await.unwrap();
        expired.id = "fresh".into();
        expired.conversation.conversation_id = "C-new".into();
        expired.expires_at = Some(now + Duration::hours(1));
        storage.save(&expired).await.unwrap();

        let svc = ThreadBindingService::new(storage.clone(), HashMap::new())
            .await
            .unwrap();

        let removed = svc.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);

        let remaining = svc.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "fresh");

        // Storage reflects the sweep after reload.
        let reloaded = ThreadBindingService::new(storage, HashMap::new())
            .await
            .unwrap();
        assert_eq!(reloaded.list().await.len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn router_port_skips_expired_records() {
        let dir = temp_dir("router");
        let svc = service(&dir).await;
        let record = svc.bind(bind_input("C1")).await.unwrap();

        // Live record resolves.
        let resolved = svc.resolve("slack", "a1", "C1").await;
        assert_eq!(resolved.unwrap().id, record.id);

        // Force-expire it in the index.
        {
            let mut indexes = svc.indexes.write().await;
            indexes.by_id.get_mut(&record.id).unwrap().expires_at =
                Some(Utc::now() - Duration::hours(1));
        }
        assert!(svc.resolve("slack", "a1", "C1").await.is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn policy_defaults_and_overrides() {
        let dir = temp_dir("policy");
        let mut overrides = HashMap::new();
        overrides.insert(
            "slack".to_string(),
            BindingOverride {
                max_age_ms: Some(10_000),
                ..Default::default()
            },
        );
        overrides.insert(
            "slack:a1".to_string(),
            BindingOverride {
                max_age_ms: Some(5_000),
                spawn_enabled: Some(false),
                ..Default::default()
            },
        );

        let storage = Arc::new(JsonFileBindingStorage::new(&dir));
        let svc = ThreadBindingService::new(storage, overrides).await.unwrap();

        let default = svc.resolve_policy("discord", "x", BindingTargetKind::Session);
        assert!(default.enabled);
        assert_eq!(default.idle_timeout_ms, 300_000);
        assert_eq!(default.max_age_ms, 3_600_000);

        let channel_level = svc.resolve_policy("slack", "other", BindingTargetKind::Session);
        assert_eq!(channel_level.max_age_ms, 10_000);

        let account_level = svc.resolve_policy("slack", "a1", BindingTargetKind::Session);
        assert_eq!(account_level.max_age_ms, 5_000);
        assert!(!account_level.spawn_enabled);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn bindings_reload_from_storage() {
        let dir = temp_dir("reload");
        {
            let svc = service(&dir).await;
            svc.bind(bind_input("C1")).await.unwrap();
        }
        {
            let svc = service(&dir).await;
            assert!(svc.get_by_conversation("slack", "a1", "C1").await.is_some());
        }
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
