//! Context compaction.
//!
//! When a history grows past the threshold, keep all system messages plus
//! the most recent N turns. A turn starts at a `user` message; assistant
//! and tool messages extend the current turn. Original message order is
//! preserved and compaction is idempotent.

use tether_types::message::{Message, Role};

/// Compaction settings.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// Message count that triggers compaction (default: 30).
    pub threshold: usize,

    /// Most recent turns kept (default: 20).
    pub max_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            max_turns: 20,
        }
    }
}

/// Produce a shorter equivalent of `messages`.
///
/// Inputs at or below the threshold are returned unchanged. System
/// messages are always preserved; the rest of the output is the last
/// `max_turns` turns in original order.
pub fn compact_messages(messages: &[Message], config: &CompactionConfig) -> Vec<Message> {
    if messages.len() <= config.threshold {
        return messages.to_vec();
    }

    // Walk backwards collecting turn start indexes (non-system only).
    let mut turn_starts: Vec<usize> = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.role == Role::User {
            turn_starts.push(idx);
        }
    }

    let cutoff = if turn_starts.len() > config.max_turns {
        turn_starts[turn_starts.len() - config.max_turns]
    } else {
        // Fewer turns than the cap: only drop non-system preamble before
        // the first turn.
        turn_starts.first().copied().unwrap_or(0)
    };

    let mut out = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.role == Role::System || idx >= cutoff {
            out.push(msg.clone());
        }
    }

    debug_assert!(out.len() <= messages.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> [Message; 2] {
        [
            Message::user(format!("q{n}")),
            Message::assistant(format!("a{n}")),
        ]
    }

    fn history(turns: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("you are helpful")];
        for i in 0..turns {
            msgs.extend(turn(i));
        }
        msgs
    }

    #[test]
    fn short_history_unchanged() {
        let msgs = history(5);
        let config = CompactionConfig::default();
        assert_eq!(compact_messages(&msgs, &config), msgs);
    }

    #[test]
    fn long_history_keeps_recent_turns() {
        let msgs = history(30); // 61 messages
        let config = CompactionConfig::default();
        let out = compact_messages(&msgs, &config);

        // 1 system + 20 turns * 2
        assert_eq!(out.len(), 41);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].content, "q10");
        assert_eq!(out.last().unwrap().content, "a29");
    }

    #[test]
    fn system_messages_always_preserved() {
        let mut msgs = history(30);
        msgs.insert(20, Message::system("mid-stream instruction"));
        let config = CompactionConfig::default();
        let out = compact_messages(&msgs, &config);

        let systems: Vec<_> = out.iter().filter(|m| m.role == Role::System).collect();
        assert_eq!(systems.len(), 2);
    }

    #[test]
    fn output_never_longer_than_input() {
        for turns in [0, 1, 10, 25, 50] {
            let msgs = history(turns);
            let out = compact_messages(&msgs, &CompactionConfig::default());
            assert!(out.len() <= msgs.len());
        }
    }

    #[test]
    fn compaction_is_idempotent() {
        let msgs = history(40);
        let config = CompactionConfig::default();
        let once = compact_messages(&msgs, &config);
        let twice = compact_messages(&once, &config);
        assert_eq!(once, twice);
    }

    #[test]
    fn order_preserved() {
        let msgs = history(35);
        let out = compact_messages(&msgs, &CompactionConfig::default());
        let contents: Vec<_> = out.iter().map(|m| m.content.clone()).collect();
        let mut sorted = contents.clone();
        sorted.sort_by_key(|c| {
            msgs.iter()
                .position(|m| m.content == *c)
                .unwrap_or(usize::MAX)
        });
        assert_eq!(contents, sorted);
    }

    #[test]
    fn tool_messages_stay_with_their_turn() {
        let mut msgs = vec![Message::system("sys")];
        for i in 0..25 {
            msgs.push(Message::user(format!("q{i}")));
            msgs.push(Message::assistant_with_tools(
                "",
                vec![tether_types::message::ToolCall {
                    id: format!("t{i}"),
                    name: "echo".into(),
                    arguments: serde_json::json!({}),
                }],
            ));
            msgs.push(Message::tool_result(format!("t{i}"), "r"));
            msgs.push(Message::assistant(format!("a{i}")));
        }

        let config = CompactionConfig {
            threshold: 30,
            max_turns: 5,
        };
        let out = compact_messages(&msgs, &config);

        // Every tool message in the output is preceded by its assistant.
        for (idx, msg) in out.iter().enumerate() {
            if msg.role == Role::Tool {
                let id = msg.tool_call_id.as_deref().unwrap();
                let announced = out[..idx]
                    .iter()
                    .any(|m| m.tool_call_ids().contains(&id));
                assert!(announced, "tool message {id} lost its assistant");
            }
        }
    }

    #[test]
    fn fewer_turns_than_cap_drops_only_preamble() {
        // 35 assistant-only messages then two turns: over threshold but
        // under the turn cap.
        let mut msgs: Vec<Message> = (0..35).map(|i| Message::assistant(format!("n{i}"))).collect();
        msgs.extend(turn(0));
        msgs.extend(turn(1));

        let out = compact_messages(&msgs, &CompactionConfig::default());
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].content, "q0");
    }
}
