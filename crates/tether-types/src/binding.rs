//! Thread-binding records.
//!
//! A binding maps one channel conversation to a dedicated target session
//! (typically an ACP-backed coding session). At most one active record
//! exists per conversation key; records may expire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of target a binding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingTargetKind {
    /// A full agent session.
    Session,
    /// A sub-agent spawned under a parent session.
    Subagent,
}

/// The conversation side of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingConversation {
    /// Channel name.
    pub channel: String,

    /// Account within the channel.
    #[serde(default)]
    pub account_id: String,

    /// Conversation / chat identifier.
    pub conversation_id: String,
}

impl BindingConversation {
    /// Uniqueness key: `"{channel}:{account}:{conversation}"`.
    pub fn key(&self) -> String {
        let account = if self.account_id.is_empty() {
            "default"
        } else {
            &self.account_id
        };
        format!("{}:{}:{}", self.channel, account, self.conversation_id)
    }
}

/// A durable conversation→session binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadBindingRecord {
    /// Unique record id.
    pub id: String,

    /// Session key the conversation is bound to.
    pub target_session_key: String,

    /// Whether the target is a session or sub-agent.
    pub target_kind: BindingTargetKind,

    /// The bound conversation.
    pub conversation: BindingConversation,

    /// Where replies are placed (e.g. "thread", "dm").
    #[serde(default)]
    pub placement: String,

    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the binding was created.
    pub created_at: DateTime<Utc>,

    /// When the binding expires, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ThreadBindingRecord {
    /// True when the record has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Effective binding policy for a `(channel, account, kind)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingPolicy {
    /// Whether thread binding is enabled at all.
    pub enabled: bool,

    /// Whether new target sessions may be spawned on demand.
    pub spawn_enabled: bool,

    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: i64,

    /// Maximum binding age in milliseconds.
    pub max_age_ms: i64,
}

impl Default for BindingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            spawn_enabled: true,
            idle_timeout_ms: 5 * 60 * 1000,
            max_age_ms: 60 * 60 * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: Option<DateTime<Utc>>) -> ThreadBindingRecord {
        ThreadBindingRecord {
            id: "b1".into(),
            target_session_key: "acp:default:work".into(),
            target_kind: BindingTargetKind::Session,
            conversation: BindingConversation {
                channel: "slack".into(),
                account_id: "a1".into(),
                conversation_id: "C9".into(),
            },
            placement: "thread".into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn conversation_key_format() {
        let conv = BindingConversation {
            channel: "slack".into(),
            account_id: "a1".into(),
            conversation_id: "C9".into(),
        };
        assert_eq!(conv.key(), "slack:a1:C9");
    }

    #[test]
    fn conversation_key_defaults_account() {
        let conv = BindingConversation {
            channel: "slack".into(),
            account_id: String::new(),
            conversation_id: "C9".into(),
        };
        assert_eq!(conv.key(), "slack:default:C9");
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        assert!(record(Some(now - chrono::Duration::hours(1))).is_expired(now));
        assert!(!record(Some(now + chrono::Duration::hours(1))).is_expired(now));
        assert!(!record(None).is_expired(now));
    }

    #[test]
    fn policy_defaults() {
        let p = BindingPolicy::default();
        assert!(p.enabled);
        assert!(p.spawn_enabled);
        assert_eq!(p.idle_timeout_ms, 300_000);
        assert_eq!(p.max_age_ms, 3_600_000);
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = record(Some(Utc::now() + chrono::Duration::minutes(30)));
        let json = serde_json::to_string(&rec).unwrap();
        let restored: ThreadBindingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, rec);
    }
}
