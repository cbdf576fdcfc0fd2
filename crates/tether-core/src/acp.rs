//! Ports to external subsystems.
//!
//! The router consults a [`ThreadRouter`] to decide whether a
//! conversation is bound to an ACP coding session, and drives the bound
//! session through [`AcpManager`]. Both are traits so the services crate
//! (and tests) can supply implementations without a dependency cycle into
//! the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use tether_types::binding::ThreadBindingRecord;
use tether_types::error::Result;

/// Lookup port from the router into the thread-binding registry.
#[async_trait]
pub trait ThreadRouter: Send + Sync {
    /// Resolve the active binding for a conversation, if any.
    async fn resolve(
        &self,
        channel: &str,
        account_id: &str,
        conversation_id: &str,
    ) -> Option<ThreadBindingRecord>;
}

/// Summary of one ACP-backed session.
#[derive(Debug, Clone, PartialEq)]
pub struct AcpSessionInfo {
    /// Session key the backend is bound to.
    pub session_key: String,

    /// Backend name (e.g. an external coding agent).
    pub backend: String,

    /// Free-form state string ("idle", "busy", "disconnected").
    pub state: String,

    /// When the backend session was created.
    pub created_at: DateTime<Utc>,
}

/// Driver for external ACP agent backends.
///
/// The core never talks the ACP wire protocol itself; it hands prompts to
/// the manager and streams text deltas back into a chat reply.
#[async_trait]
pub trait AcpManager: Send + Sync {
    /// Run one turn against the backend bound to `session_key`.
    ///
    /// Text deltas are pushed into `deltas` as they arrive; the call
    /// returns once the turn completes. Dropping the receiver cancels
    /// delivery but not the backend turn.
    async fn run_tracked_turn(
        &self,
        session_key: &str,
        prompt: &str,
        deltas: mpsc::Sender<String>,
    ) -> Result<()>;

    /// Health-check the subsystem; returns a human-readable report.
    async fn doctor(&self) -> Result<String>;

    /// List active backend sessions.
    async fn list_sessions(&self) -> Result<Vec<AcpSessionInfo>>;

    /// Status of one backend session.
    async fn status(&self, session_key: &str) -> Result<AcpSessionInfo>;

    /// Close one backend session.
    async fn close(&self, session_key: &str) -> Result<()>;

    /// Spawn a backend session for `session_key`.
    async fn spawn(&self, session_key: &str, backend: &str) -> Result<AcpSessionInfo>;
}

/// Port for tools that spawn sub-agents, breaking the
/// tools→manager import cycle.
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    /// Spawn a sub-agent under `parent_session` to work on `task`.
    /// Returns the sub-agent's session key.
    async fn spawn_subagent(&self, parent_session: &str, task: &str) -> Result<String>;
}
