//! `tether sessions` -- inspect conversation history on disk.

use clap::Subcommand;

use tether_core::sessions::SessionStore;

use super::workspace_dir;

/// Subcommands for `tether sessions`.
#[derive(Subcommand)]
pub enum SessionsAction {
    /// List all session keys.
    List,

    /// Delete one session.
    Clear {
        /// Session key ("channel:account:chat").
        key: String,
    },
}

pub async fn run(config_override: Option<&str>, action: SessionsAction) -> anyhow::Result<()> {
    let _ = super::load_config(config_override).await?;
    let store = SessionStore::new(workspace_dir()?.join("sessions"));

    match action {
        SessionsAction::List => {
            let keys = store.list().await?;
            if keys.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for key in keys {
                println!("{key}");
            }
        }
        SessionsAction::Clear { key } => {
            store.delete(&key).await?;
            println!("cleared {key}");
        }
    }

    Ok(())
}
