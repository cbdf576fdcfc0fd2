//! `tether install` -- ensure the workspace exists.

use tracing::info;

use super::workspace_dir;

/// Create the workspace directory tree and a default config file.
/// Idempotent: existing files are left alone.
pub async fn run() -> anyhow::Result<()> {
    let root = workspace_dir()?;

    for sub in ["sessions", "cron", "cron/runs", "bindings"] {
        tokio::fs::create_dir_all(root.join(sub)).await?;
    }

    let config_path = root.join("config.json");
    if !tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        let default = serde_json::to_string_pretty(&tether_types::config::Config::default())?;
        tokio::fs::write(&config_path, default).await?;
        info!(path = %config_path.display(), "default config written");
    }

    println!("workspace ready at {}", root.display());
    Ok(())
}
