//! Conversation message model.
//!
//! [`Message`] is the typed unit of a session history. The invariants:
//! `tool_calls` only appears on assistant messages, `tool_call_id` only on
//! tool messages, and every tool message must be preceded by an assistant
//! message whose `tool_calls` contains the same id. [`sanitize_history`]
//! enforces the pairing on histories loaded from disk.

use serde::{Deserialize, Serialize};

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call, echoed by the tool result.
    pub id: String,

    /// Tool name, resolved against the registry.
    pub name: String,

    /// Arguments as a JSON object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,

    /// Text content.
    #[serde(default)]
    pub content: String,

    /// Attached image URLs or data URIs (user messages only in practice).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// For tool messages: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For assistant messages: the tool calls requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create a user message with attached images.
    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        let mut msg = Self::plain(Role::User, content);
        msg.images = images;
        msg
    }

    /// Create an assistant message without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::plain(Role::Assistant, content);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    /// Create a tool-result message for a given call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::plain(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// The tool call ids requested by this message (empty for non-assistant).
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.tool_calls
            .as_deref()
            .map(|calls| calls.iter().map(|c| c.id.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Drop tool messages whose `tool_call_id` is not announced by a preceding
/// assistant message.
///
/// Histories can lose the pairing when truncated or partially persisted;
/// sending an orphaned tool message upstream is a provider error, so the
/// orphans are filtered before use.
pub fn sanitize_history(messages: &[Message]) -> Vec<Message> {
    let mut open_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                for id in msg.tool_call_ids() {
                    open_ids.insert(id.to_string());
                }
                out.push(msg.clone());
            }
            Role::Tool => {
                let keep = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| open_ids.contains(id));
                if keep {
                    out.push(msg.clone());
                }
            }
            _ => out.push(msg.clone()),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("t1", "ok").role, Role::Tool);
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result("call-9", "42");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-9"));
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn assistant_with_tools_exposes_ids() {
        let msg = Message::assistant_with_tools(
            "",
            vec![
                ToolCall {
                    id: "t1".into(),
                    name: "echo".into(),
                    arguments: serde_json::json!({"x": 1}),
                },
                ToolCall {
                    id: "t2".into(),
                    name: "echo".into(),
                    arguments: serde_json::json!({}),
                },
            ],
        );
        assert_eq!(msg.tool_call_ids(), vec!["t1", "t2"]);
    }

    #[test]
    fn sanitize_keeps_paired_tool_messages() {
        let history = vec![
            Message::user("hi"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "t1".into(),
                    name: "echo".into(),
                    arguments: serde_json::json!({}),
                }],
            ),
            Message::tool_result("t1", "result"),
            Message::assistant("done"),
        ];
        let clean = sanitize_history(&history);
        assert_eq!(clean.len(), 4);
    }

    #[test]
    fn sanitize_drops_orphaned_tool_messages() {
        let history = vec![
            Message::tool_result("ghost", "orphan"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let clean = sanitize_history(&history);
        assert_eq!(clean.len(), 2);
        assert!(clean.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn sanitize_drops_tool_message_without_id() {
        let mut orphan = Message::tool_result("x", "r");
        orphan.tool_call_id = None;
        let clean = sanitize_history(&[Message::user("hi"), orphan]);
        assert_eq!(clean.len(), 1);
    }

    #[test]
    fn role_serde_names() {
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
        let r: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(r, Role::Assistant);
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = Message::assistant_with_tools(
            "checking",
            vec![ToolCall {
                id: "t1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({"q": "weather"}),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn optional_fields_omitted_in_json() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("images"));
    }
}
