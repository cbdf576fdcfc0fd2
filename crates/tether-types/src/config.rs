//! Configuration tree.
//!
//! Loaded from `~/.tether/config.json` (or an explicit path). Every field
//! has a serde default so partial configs and older files keep loading.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent defaults and per-agent overrides.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Provider endpoint settings.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Cron service settings.
    #[serde(default)]
    pub cron: CronConfig,

    /// Thread-binding policy overrides keyed by `"{channel}:{account}"`
    /// or `"{channel}"`.
    #[serde(default)]
    pub bindings: HashMap<String, BindingOverride>,

    /// Channel adapter settings keyed by channel name.
    #[serde(default)]
    pub channels: HashMap<String, serde_json::Value>,
}

/// Agent behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Model identifier passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// System prompt prepended to every turn.
    #[serde(default)]
    pub system_prompt: String,

    /// Maximum history messages loaded per turn.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Message count that triggers compaction.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,

    /// Turns kept by compaction.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Agent bindings: `"{channel}:{account}"` → agent name.
    #[serde(default)]
    pub bindings: HashMap<String, String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: String::new(),
            max_history: default_max_history(),
            compact_threshold: default_compact_threshold(),
            max_history_turns: default_max_history_turns(),
            bindings: HashMap::new(),
        }
    }
}

/// Provider endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default)]
    pub base_url: String,

    /// API key (or the name of an env var holding it, `$VAR` form).
    #[serde(default)]
    pub api_key: String,
}

/// Cron service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Per-run timeout in milliseconds.
    #[serde(default = "default_cron_timeout_ms")]
    pub default_timeout_ms: i64,

    /// Run-log rotation threshold in bytes.
    #[serde(default = "default_runlog_max_bytes")]
    pub runlog_max_bytes: u64,

    /// Entries kept when a run log rotates.
    #[serde(default = "default_runlog_keep_lines")]
    pub runlog_keep_lines: usize,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_cron_timeout_ms(),
            runlog_max_bytes: default_runlog_max_bytes(),
            runlog_keep_lines: default_runlog_keep_lines(),
        }
    }
}

/// Partial binding-policy override from config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BindingOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_ms: Option<i64>,
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_max_history() -> usize {
    50
}

fn default_compact_threshold() -> usize {
    30
}

fn default_max_history_turns() -> usize {
    20
}

fn default_cron_timeout_ms() -> i64 {
    10 * 60 * 1000
}

fn default_runlog_max_bytes() -> u64 {
    512 * 1024
}

fn default_runlog_keep_lines() -> usize {
    200
}

/// Default workspace directory: `~/.tether`.
pub fn workspace_dir() -> Option<PathBuf> {
    Some(PathBuf::from(std::env::var("TETHER_HOME").ok()?))
}

/// Resolve the workspace directory, falling back to `~/.tether`.
pub fn resolve_workspace_dir(home: Option<PathBuf>) -> Option<PathBuf> {
    if let Ok(custom) = std::env::var("TETHER_HOME") {
        return Some(PathBuf::from(custom));
    }
    home.map(|h| h.join(".tether"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_loads_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.agents.model, "gpt-4o");
        assert_eq!(cfg.agents.max_history, 50);
        assert_eq!(cfg.agents.compact_threshold, 30);
        assert_eq!(cfg.agents.max_history_turns, 20);
        assert_eq!(cfg.cron.default_timeout_ms, 600_000);
    }

    #[test]
    fn partial_agents_config() {
        let cfg: Config =
            serde_json::from_str(r#"{"agents": {"model": "local-7b"}}"#).unwrap();
        assert_eq!(cfg.agents.model, "local-7b");
        assert_eq!(cfg.agents.max_history, 50);
    }

    #[test]
    fn binding_override_partial() {
        let cfg: Config = serde_json::from_str(
            r#"{"bindings": {"slack": {"max_age_ms": 1000}}}"#,
        )
        .unwrap();
        let ov = &cfg.bindings["slack"];
        assert_eq!(ov.max_age_ms, Some(1000));
        assert!(ov.enabled.is_none());
    }

    #[test]
    fn roundtrip() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let _restored: Config = serde_json::from_str(&json).unwrap();
    }

    #[test]
    fn resolve_workspace_uses_home() {
        // TETHER_HOME may leak from the environment; only assert the
        // home-join path when it is unset.
        if std::env::var("TETHER_HOME").is_err() {
            let dir = resolve_workspace_dir(Some(PathBuf::from("/home/u"))).unwrap();
            assert_eq!(dir, PathBuf::from("/home/u/.tether"));
        }
    }
}
