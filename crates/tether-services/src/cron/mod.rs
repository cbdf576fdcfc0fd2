//! Cron scheduling service.
//!
//! Jobs fire synthesized [`InboundMessage`]s into the bus on a timetable.
//! A 1-second tick scans for due jobs; each execution is single-flight
//! per job (the `running_at` latch), failures back off exponentially, and
//! every run is recorded in a per-job JSONL log. Jobs persist to
//! `jobs.json` with atomic writes.

pub mod runlog;
pub mod schedule;
pub mod store;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_core::bus::MessageBus;
use tether_core::manager::{CronJobSummary, CronRunner};
use tether_types::cron::{
    CronDelivery, CronJob, CronPayload, CronSchedule, DeliveryMode, JobStatus, PayloadKind,
    RunLogEntry,
};
use tether_types::error::{ErrorCode, TetherError};
use tether_types::event::{InboundMessage, OutboundMessage};

use crate::error::{Result, ServiceError};
use runlog::{RunLogFilter, RunLogger};
use schedule::{apply_backoff, next_run_after, should_run};
use store::CronStore;

/// Service settings.
#[derive(Debug, Clone)]
pub struct CronServiceConfig {
    /// Per-run timeout.
    pub default_timeout: Duration,

    /// Run-log rotation threshold in bytes.
    pub runlog_max_bytes: u64,

    /// Entries kept when a run log rotates.
    pub runlog_keep_lines: usize,
}

impl Default for CronServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10 * 60),
            runlog_max_bytes: 512 * 1024,
            runlog_keep_lines: 200,
        }
    }
}

/// The cron scheduler.
pub struct CronService {
    jobs: Arc<RwLock<HashMap<String, CronJob>>>,
    store: CronStore,
    runlog: RunLogger,
    bus: Arc<MessageBus>,
    config: CronServiceConfig,
}

impl CronService {
    /// Create a service rooted at `dir`, loading any persisted jobs.
    pub async fn new(
        dir: impl AsRef<Path>,
        bus: Arc<MessageBus>,
        config: CronServiceConfig,
    ) -> Result<Arc<Self>> {
        let store = CronStore::new(&dir);
        let runlog = RunLogger::new(&dir, config.runlog_max_bytes, config.runlog_keep_lines);

        let mut jobs = HashMap::new();
        for mut job in store.load_jobs().await? {
            // A crash mid-run leaves the latch set; clear it on load so
            // the job is not wedged forever.
            if job.state.running_at.is_some() {
                warn!(job_id = %job.id, "clearing stale running_at from previous process");
                job.state.running_at = None;
            }
            jobs.insert(job.id.clone(), job);
        }
        info!(count = jobs.len(), "cron service loaded jobs");

        Ok(Arc::new(Self {
            jobs: Arc::new(RwLock::new(jobs)),
            store,
            runlog,
            bus,
            config,
        }))
    }

    /// Add a job. Returns the generated id (`job-<alnum>`).
    pub async fn add_job(
        &self,
        name: impl Into<String>,
        schedule: CronSchedule,
        payload: CronPayload,
        delivery: CronDelivery,
    ) -> Result<String> {
        let id = format!("job-{}", uuid::Uuid::new_v4().simple());
        let now = Utc::now();

        let next_run_at = next_run_after(&schedule, now)?;

        let mut job = CronJob {
            id: id.clone(),
            name: name.into(),
            schedule,
            payload,
            delivery,
            wake_mode: Default::default(),
            state: Default::default(),
            created_at: now,
            updated_at: now,
        };
        job.state.next_run_at = next_run_at;

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(id.clone(), job);
            self.store
                .save_jobs(&jobs.values().cloned().collect::<Vec<_>>())
                .await?;
        }

        info!(job_id = %id, "cron job added");
        Ok(id)
    }

    /// Remove a job.
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.remove(job_id).is_none() {
            return Err(ServiceError::JobNotFound(job_id.to_string()));
        }
        self.store
            .save_jobs(&jobs.values().cloned().collect::<Vec<_>>())
            .await?;
        info!(job_id, "cron job removed");
        Ok(())
    }

    /// Enable or disable a job. Enabling recomputes `next_run_at` when it
    /// is unset.
    pub async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        job.state.enabled = enabled;
        job.updated_at = Utc::now();
        if enabled && job.state.next_run_at.is_none() {
            job.state.next_run_at = next_run_after(&job.schedule, Utc::now())?;
        }

        self.store
            .save_jobs(&jobs.values().cloned().collect::<Vec<_>>())
            .await?;
        info!(job_id, enabled, "cron job enabled state changed");
        Ok(())
    }

    /// Get a job snapshot.
    pub async fn get_job(&self, job_id: &str) -> Option<CronJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// List all jobs.
    pub async fn jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Read run-log entries, newest first.
    pub async fn read_logs(&self, filter: &RunLogFilter) -> Result<Vec<RunLogEntry>> {
        self.runlog.read_logs(filter).await
    }

    /// Run the tick loop until `cancel` fires.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) {
        info!("cron service started");
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cron service shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.clone().tick(Utc::now(), &cancel).await;
                }
            }
        }
    }

    /// One scheduler pass: claim every due job and execute it in its own
    /// task.
    pub async fn tick(self: Arc<Self>, now: DateTime<Utc>, cancel: &CancellationToken) {
        let claimed = {
            let mut jobs = self.jobs.write().await;
            let mut claimed = Vec::new();
            for job in jobs.values_mut() {
                if should_run(&job.state, now) {
                    job.state.running_at = Some(now);
                    claimed.push(job.clone());
                }
            }
            claimed
        };

        for job in claimed {
            debug!(job_id = %job.id, name = %job.name, "cron job due");
            let service = self.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                service.execute(job, cancel).await;
            });
        }
    }

    /// Execute one job immediately (manual trigger).
    ///
    /// A job that is already running is a no-op recorded as a skipped run.
    pub async fn run_job_now(&self, job_id: &str) -> Result<()> {
        let now = Utc::now();
        let claimed = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

            if job.state.running_at.is_some() {
                None
            } else {
                job.state.running_at = Some(now);
                Some(job.clone())
            }
        };

        match claimed {
            Some(job) => {
                self.execute(job, CancellationToken::new()).await;
                Ok(())
            }
            None => {
                let entry = RunLogEntry {
                    run_id: format!("run-{}", uuid::Uuid::new_v4().simple()),
                    job_id: job_id.to_string(),
                    started_at: now,
                    finished_at: now,
                    status: JobStatus::Skipped,
                    error: Some("already running".into()),
                    duration_ms: 0,
                };
                self.runlog.append(&entry).await?;
                debug!(job_id, "job already running, manual run skipped");
                Ok(())
            }
        }
    }

    /// Run the payload, mark completion, log, persist.
    async fn execute(&self, job: CronJob, cancel: CancellationToken) {
        let started_at = Utc::now();
        let run_id = format!("run-{}", uuid::Uuid::new_v4().simple());

        let payload = self.fire_payload(&job, &cancel);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(TetherError::cancelled()),
            result = tokio::time::timeout(self.config.default_timeout, payload) => match result {
                Ok(result) => result,
                Err(_) => Err(TetherError::new(ErrorCode::Timeout, "cron run timed out")),
            },
        };

        let finished_at = Utc::now();
        let (status, err_text) = match &outcome {
            Ok(()) => (JobStatus::Ok, None),
            Err(e) => (JobStatus::Error, Some(e.to_string())),
        };

        if let Some(ref e) = err_text {
            error!(job_id = %job.id, error = %e, "cron job failed");
        }

        self.mark_completed(&job.id, finished_at, status, err_text.clone())
            .await;

        let entry = RunLogEntry {
            run_id,
            job_id: job.id.clone(),
            started_at,
            finished_at,
            status,
            error: err_text,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        };
        if let Err(e) = self.runlog.append(&entry).await {
            warn!(job_id = %job.id, error = %e, "failed to append run log");
        }
    }

    /// Synthesize the payload's bus traffic and optional delivery.
    async fn fire_payload(
        &self,
        job: &CronJob,
        _cancel: &CancellationToken,
    ) -> std::result::Result<(), TetherError> {
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("job_id".into(), serde_json::json!(job.id));
        metadata.insert("job_name".into(), serde_json::json!(job.name));

        let content = match job.payload.kind {
            PayloadKind::SystemEvent => {
                metadata.insert("is_system_event".into(), serde_json::json!(true));
                job.payload.event_type.clone()
            }
            PayloadKind::AgentTurn => {
                metadata.insert("is_cron".into(), serde_json::json!(true));
                job.payload.message.clone()
            }
        };

        let msg = InboundMessage {
            id: String::new(),
            channel: "cron".into(),
            account_id: String::new(),
            chat_id: job.id.clone(),
            sender_id: "system".into(),
            content,
            media: vec![],
            timestamp: Utc::now(),
            metadata,
        };
        self.bus.publish_inbound(msg).await?;

        self.deliver(job).await
    }

    /// Optional result delivery. `webhook` is reserved; with
    /// `best_effort` set, delivery errors never fail the run.
    async fn deliver(&self, job: &CronJob) -> std::result::Result<(), TetherError> {
        let result = match job.delivery.mode {
            DeliveryMode::None => Ok(()),
            DeliveryMode::Announce => {
                let (Some(channel), Some(to)) = (&job.delivery.channel, &job.delivery.to) else {
                    return if job.delivery.best_effort {
                        Ok(())
                    } else {
                        Err(TetherError::invalid_config(
                            "announce delivery requires channel and to",
                        ))
                    };
                };
                let out = OutboundMessage {
                    id: String::new(),
                    channel: channel.clone(),
                    chat_id: to.clone(),
                    content: job.payload.message.clone(),
                    reply_to: None,
                    media: vec![],
                    timestamp: Utc::now(),
                    metadata: HashMap::new(),
                };
                self.bus.publish_outbound(out).await
            }
            DeliveryMode::Webhook => {
                debug!(job_id = %job.id, "webhook delivery reserved, skipping");
                Ok(())
            }
        };

        match result {
            Err(e) if job.delivery.best_effort => {
                warn!(job_id = %job.id, error = %e, "best-effort delivery failed");
                Ok(())
            }
            other => other,
        }
    }

    /// Clear the latch, update counters, recompute the next run, persist.
    /// One-shot jobs disable themselves after any terminal status.
    async fn mark_completed(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        status: JobStatus,
        error: Option<String>,
    ) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };

        job.state.running_at = None;
        job.state.last_run_at = Some(now);
        job.state.last_status = Some(status);
        job.state.last_error = error;
        job.state.run_count += 1;
        job.updated_at = now;

        match status {
            JobStatus::Error => job.state.consecutive_errors += 1,
            JobStatus::Ok => {
                job.state.consecutive_errors = 0;
                job.state.error_backoff_until = None;
            }
            JobStatus::Skipped => {}
        }

        if job.schedule.is_one_shot() {
            job.state.enabled = false;
            job.state.next_run_at = None;
        } else {
            let next = next_run_after(&job.schedule, now).ok().flatten();
            let (effective, backoff_until) = apply_backoff(&job.state, next, now);
            job.state.next_run_at = effective;
            job.state.error_backoff_until = backoff_until;
        }

        let snapshot: Vec<CronJob> = jobs.values().cloned().collect();
        drop(jobs);

        if let Err(e) = self.store.save_jobs(&snapshot).await {
            warn!(job_id, error = %e, "failed to persist jobs after run");
        }
    }
}

#[async_trait]
impl CronRunner for CronService {
    async fn list_jobs(&self) -> tether_types::Result<Vec<CronJobSummary>> {
        Ok(self
            .jobs()
            .await
            .into_iter()
            .map(|j| CronJobSummary {
                id: j.id,
                name: j.name,
                enabled: j.state.enabled,
            })
            .collect())
    }

    async fn run_job(&self, job_id: &str) -> tether_types::Result<()> {
        self.run_job_now(job_id)
            .await
            .map_err(|e| TetherError::not_found(e.to_string()))
    }
}
