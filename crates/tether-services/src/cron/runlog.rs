//! Per-job run logs.
//!
//! One JSONL file per job under `runs/<jobId>.jsonl`, appended on every
//! execution. When a file reaches the size limit the next append rewrites
//! it with only the most recent entries. Reads return newest-first with
//! filtering and pagination.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use tether_types::cron::{JobStatus, RunLogEntry};

use crate::error::Result;

/// Filter for [`RunLogger::read_logs`].
#[derive(Debug, Clone, Default)]
pub struct RunLogFilter {
    /// Restrict to one job. Required to locate the file.
    pub job_id: String,

    /// Only runs started at or after this instant.
    pub after: Option<DateTime<Utc>>,

    /// Only runs started at or before this instant.
    pub before: Option<DateTime<Utc>>,

    /// Only runs with this status.
    pub status: Option<JobStatus>,

    /// Entries to skip from the newest end.
    pub offset: usize,

    /// Maximum entries returned (0 = unlimited).
    pub limit: usize,
}

/// Append-mostly run-log writer with size-based rotation.
pub struct RunLogger {
    dir: PathBuf,
    max_bytes: u64,
    keep_lines: usize,
}

impl RunLogger {
    /// A logger writing under `dir/runs`.
    pub fn new(dir: impl AsRef<Path>, max_bytes: u64, keep_lines: usize) -> Self {
        Self {
            dir: dir.as_ref().join("runs"),
            max_bytes,
            keep_lines: keep_lines.max(1),
        }
    }

    /// Record one run.
    ///
    /// If the log file has reached the size limit, it is rewritten with
    /// the most recent `keep_lines` entries (the new one included).
    pub async fn append(&self, entry: &RunLogEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.log_path(&entry.job_id);

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if size >= self.max_bytes {
            self.rotate(&path, entry).await?;
            return Ok(());
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read runs newest-first under `filter`.
    pub async fn read_logs(&self, filter: &RunLogFilter) -> Result<Vec<RunLogEntry>> {
        let path = self.log_path(&filter.job_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<RunLogEntry> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping malformed run-log line");
                    None
                }
            })
            .collect();

        entries.reverse(); // newest first

        let filtered = entries.into_iter().filter(|e| {
            if let Some(after) = filter.after
                && e.started_at < after
            {
                return false;
            }
            if let Some(before) = filter.before
                && e.started_at > before
            {
                return false;
            }
            if let Some(status) = filter.status
                && e.status != status
            {
                return false;
            }
            true
        });

        let skipped = filtered.skip(filter.offset);
        Ok(if filter.limit > 0 {
            skipped.take(filter.limit).collect()
        } else {
            skipped.collect()
        })
    }

    /// Rewrite the file with the tail of its entries plus `entry`.
    async fn rotate(&self, path: &Path, entry: &RunLogEntry) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let mut lines: Vec<&str> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();

        let keep_existing = self.keep_lines.saturating_sub(1);
        if lines.len() > keep_existing {
            lines.drain(..lines.len() - keep_existing);
        }

        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');

        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &out).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), kept = self.keep_lines, "run log rotated");
        Ok(())
    }

    fn log_path(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }
}
