//! CLI command implementations.

pub mod acp_cmd;
pub mod cron_cmd;
pub mod install;
pub mod sessions_cmd;
pub mod start;

use std::path::PathBuf;

use anyhow::Context;

use tether_types::config::Config;

/// Resolve the workspace directory (`$TETHER_HOME` or `~/.tether`).
pub fn workspace_dir() -> anyhow::Result<PathBuf> {
    tether_types::config::resolve_workspace_dir(dirs::home_dir())
        .context("cannot determine home directory")
}

/// Load configuration from an explicit path or `<workspace>/config.json`.
///
/// A missing file yields the default config; a malformed file is a
/// startup failure.
pub async fn load_config(config_override: Option<&str>) -> anyhow::Result<Config> {
    let path = match config_override {
        Some(path) => PathBuf::from(path),
        None => workspace_dir()?.join("config.json"),
    };

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if config_override.is_some() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Config::default());
        }
        Err(e) => return Err(e).context("failed to read config"),
    };

    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

/// Resolve the provider API key: config literal, `$VAR` indirection, or
/// the `TETHER_API_KEY` environment variable.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    let raw = config.providers.api_key.trim();
    if let Some(var) = raw.strip_prefix('$') {
        return std::env::var(var).ok();
    }
    if !raw.is_empty() {
        return Some(raw.to_string());
    }
    std::env::var("TETHER_API_KEY").ok()
}
