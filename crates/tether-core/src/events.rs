//! Orchestrator event stream.
//!
//! The orchestrator narrates each run over an unbounded channel so hosts
//! can render progress (streaming edits, tool spinners) without touching
//! loop internals.

use tether_types::message::Message;

use crate::tools::ToolResult;

/// Events emitted during one orchestrator run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A run started.
    AgentStart,

    /// An inner turn started.
    TurnStart,

    /// A message is about to be produced (user echo or assistant reply).
    MessageStart {
        role: tether_types::message::Role,
    },

    /// The message finished.
    MessageEnd {
        message: Message,
    },

    /// A tool call started executing.
    ToolExecutionStart {
        tool_call_id: String,
        name: String,
    },

    /// A partial tool result arrived.
    ToolExecutionUpdate {
        tool_call_id: String,
        partial: ToolResult,
    },

    /// The tool call finished (result or error).
    ToolExecutionEnd {
        tool_call_id: String,
        result: ToolResult,
    },

    /// The inner turn finished.
    TurnEnd,

    /// The run finished; carries every message generated by the run.
    AgentEnd {
        final_messages: Vec<Message>,
    },
}

/// Sink for agent events. Send failures are ignored -- a departed listener
/// must not abort the run.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

/// Send an event, ignoring a closed sink.
pub fn emit(sink: Option<&EventSink>, event: AgentEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
