//! Job persistence.
//!
//! Jobs live in a single `jobs.json` array. Saves are atomic: content is
//! written to `jobs.json.tmp`, the previous file becomes `jobs.json.bak`,
//! then the temp file is renamed into place; a failed rename restores the
//! backup. Legacy schedule shapes are migrated on load.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use tether_types::cron::{CronJob, migrate_legacy_job};

use crate::error::Result;

/// File-backed job store.
pub struct CronStore {
    path: PathBuf,
}

impl CronStore {
    /// A store writing to `jobs.json` under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("jobs.json"),
        }
    }

    /// Path of the jobs file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all jobs. A missing file reads as empty; records that fail to
    /// deserialize even after migration are skipped with a warning.
    pub async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let raw: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        let mut jobs = Vec::with_capacity(raw.len());

        for mut value in raw {
            migrate_legacy_job(&mut value);
            match serde_json::from_value::<CronJob>(value) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "skipping unreadable job record"),
            }
        }

        debug!(count = jobs.len(), "loaded cron jobs");
        Ok(jobs)
    }

    /// Save all jobs atomically.
    pub async fn save_jobs(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        let bak = self.path.with_extension("json.bak");

        tokio::fs::write(&tmp, &content).await?;

        let had_previous = tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        if had_previous {
            tokio::fs::copy(&self.path, &bak).await?;
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            // Restore the backup so a torn rename cannot lose the file.
            if had_previous {
                let _ = tokio::fs::copy(&bak, &self.path).await;
            }
            return Err(e.into());
        }

        debug!(count = jobs.len(), path = %self.path.display(), "cron jobs saved");
        Ok(())
    }
}
