//! Conversation sessions.
//!
//! A [`Session`] holds the append-only message history for one
//! `(channel, account, conversation)` triple. Truncated reads go through
//! [`history_safe`](Session::history_safe), which never cuts a
//! tool-call/tool-result pair in half.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Role, sanitize_history};

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session key, `"{channel}:{account}:{chat_id}"`.
    pub key: String,

    /// Ordered message history (append-only).
    #[serde(default)]
    pub messages: Vec<Message>,

    /// When the session was first created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the session was last updated.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Arbitrary session metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Create a new empty session with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Append messages to the history and bump `updated_at`.
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }

    /// Number of messages in the history.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the history is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Return the last at-most-`max_n` messages without breaking a
    /// tool-call/tool-result pair.
    ///
    /// If the naive cut would land on a tool message (or just after an
    /// assistant message with unanswered tool calls), the window is
    /// extended backwards to the nearest `user` boundary. Orphaned tool
    /// messages are filtered from the result.
    pub fn history_safe(&self, max_n: usize) -> Vec<Message> {
        if max_n == 0 || self.messages.is_empty() {
            return Vec::new();
        }

        let mut start = self.messages.len().saturating_sub(max_n);

        // A window starting on a tool or assistant message may reference
        // tool calls announced before the cut. Walk back to a user message
        // (or the beginning) so the slice opens on a turn boundary.
        if start > 0 && self.messages[start].role != Role::User {
            while start > 0 && self.messages[start].role != Role::User {
                start -= 1;
            }
        }

        sanitize_history(&self.messages[start..])
    }

    /// Remove all messages, keeping the key and metadata.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn new_session_is_empty() {
        let s = Session::new("test:default:c1");
        assert!(s.is_empty());
        assert_eq!(s.key, "test:default:c1");
    }

    #[test]
    fn append_updates_timestamp() {
        let mut s = Session::new("k");
        let before = s.updated_at;
        s.append([Message::user("hi")]);
        assert_eq!(s.len(), 1);
        assert!(s.updated_at >= before);
    }

    #[test]
    fn history_safe_returns_all_when_short() {
        let mut s = Session::new("k");
        s.append([Message::user("one"), Message::assistant("two")]);
        let hist = s.history_safe(10);
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn history_safe_truncates_on_user_boundary() {
        let mut s = Session::new("k");
        for i in 0..5 {
            s.append([
                Message::user(format!("q{i}")),
                Message::assistant(format!("a{i}")),
            ]);
        }
        let hist = s.history_safe(3);
        // Naive cut would start on assistant "a3"; extended back to user "q3".
        assert_eq!(hist.len(), 4);
        assert_eq!(hist[0].role, Role::User);
        assert_eq!(hist[0].content, "q3");
    }

    #[test]
    fn history_safe_never_splits_tool_pair() {
        let mut s = Session::new("k");
        s.append([
            Message::user("q"),
            Message::assistant_with_tools("", vec![tool_call("t1")]),
            Message::tool_result("t1", "r1"),
            Message::assistant("done"),
        ]);
        // A window of 2 would open on the tool result; it must instead
        // open on the user message, keeping the full pair.
        let hist = s.history_safe(2);
        assert_eq!(hist[0].role, Role::User);
        let tool_count = hist.iter().filter(|m| m.role == Role::Tool).count();
        let announced: Vec<_> = hist
            .iter()
            .flat_map(|m| m.tool_call_ids())
            .collect();
        assert_eq!(tool_count, 1);
        assert!(announced.contains(&"t1"));
    }

    #[test]
    fn history_safe_filters_orphans_at_window_start() {
        let mut s = Session::new("k");
        // History begins mid-pair (e.g. earlier messages were pruned).
        s.messages.push(Message::tool_result("lost", "r"));
        s.messages.push(Message::user("q"));
        s.messages.push(Message::assistant("a"));
        let hist = s.history_safe(10);
        assert!(hist.iter().all(|m| m.role != Role::Tool));
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn history_safe_zero_window() {
        let mut s = Session::new("k");
        s.append([Message::user("q")]);
        assert!(s.history_safe(0).is_empty());
    }

    #[test]
    fn clear_keeps_key() {
        let mut s = Session::new("k");
        s.append([Message::user("q")]);
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.key, "k");
    }

    #[test]
    fn serde_roundtrip() {
        let mut s = Session::new("slack:default:C1");
        s.append([
            Message::user("hi"),
            Message::assistant_with_tools("", vec![tool_call("t1")]),
            Message::tool_result("t1", "ok"),
        ]);
        let json = serde_json::to_string(&s).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.key, s.key);
        assert_eq!(restored.messages, s.messages);
    }
}
