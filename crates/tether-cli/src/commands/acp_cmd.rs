//! `tether acp` -- ACP subsystem administration.
//!
//! All operations delegate to the configured [`AcpManager`] backend. No
//! backend ships with the core runtime; without one, every command
//! reports the subsystem as unconfigured and exits non-zero.

use std::sync::Arc;

use clap::Subcommand;

use tether_core::acp::AcpManager;

/// Subcommands for `tether acp`.
#[derive(Subcommand)]
pub enum AcpAction {
    /// Health-check the ACP subsystem.
    Doctor,

    /// List active backend sessions.
    List,

    /// Show the status of one backend session.
    Status {
        /// Session key.
        session_key: String,
    },

    /// Close one backend session.
    Close {
        /// Session key.
        session_key: String,
    },

    /// Spawn a backend session.
    Spawn {
        /// Session key to bind the backend to.
        session_key: String,

        /// Backend name.
        #[arg(short, long, default_value = "default")]
        backend: String,
    },
}

/// Resolve the configured backend. The core ships none.
fn backend() -> Option<Arc<dyn AcpManager>> {
    None
}

pub async fn run(action: AcpAction) -> anyhow::Result<()> {
    let Some(acp) = backend() else {
        anyhow::bail!("no ACP backend configured");
    };

    match action {
        AcpAction::Doctor => {
            println!("{}", acp.doctor().await?);
        }
        AcpAction::List => {
            for session in acp.list_sessions().await? {
                println!(
                    "{}  backend={}  state={}",
                    session.session_key, session.backend, session.state
                );
            }
        }
        AcpAction::Status { session_key } => {
            let session = acp.status(&session_key).await?;
            println!(
                "{}  backend={}  state={}  created={}",
                session.session_key,
                session.backend,
                session.state,
                session.created_at.to_rfc3339()
            );
        }
        AcpAction::Close { session_key } => {
            acp.close(&session_key).await?;
            println!("closed {session_key}");
        }
        AcpAction::Spawn {
            session_key,
            backend,
        } => {
            let session = acp.spawn(&session_key, &backend).await?;
            println!("spawned {} ({})", session.session_key, session.backend);
        }
    }

    Ok(())
}
