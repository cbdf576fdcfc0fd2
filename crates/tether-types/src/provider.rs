//! Shared provider-facing types.
//!
//! [`ToolDef`] is the schema form of a tool advertised to the model.
//! Content blocks are the tagged union used by tool results.

use serde::{Deserialize, Serialize};

/// A tool definition advertised to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Unique tool name.
    pub name: String,

    /// What the tool does, for the model.
    pub description: String,

    /// JSON schema for the tool parameters.
    pub parameters: serde_json::Value,
}

/// A block of tool-result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// An image by URL or data URI.
    Image { url: String },

    /// A nested tool call emitted by a tool (e.g. sub-agent delegation).
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl ContentBlock {
    /// Text content of this block, empty for non-text blocks.
    pub fn as_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } => text,
            _ => "",
        }
    }
}

/// Join the text blocks of a content list.
pub fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_tagged_serde() {
        let block = ContentBlock::Text { text: "hi".into() };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"text\""));

        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn join_text_skips_non_text() {
        let blocks = vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Image {
                url: "http://x/i.png".into(),
            },
            ContentBlock::Text { text: "b".into() },
        ];
        assert_eq!(join_text(&blocks), "ab");
    }

    #[test]
    fn tool_def_roundtrip() {
        let def = ToolDef {
            name: "echo".into(),
            description: "Echo input".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"x": {"type": "number"}},
                "required": ["x"],
            }),
        };
        let json = serde_json::to_string(&def).unwrap();
        let back: ToolDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
