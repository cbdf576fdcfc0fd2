//! Cron job data model.
//!
//! [`CronJob`] is the persisted record for one scheduled job. The wire
//! format keeps durations as `*_duration_ms` integers and the one-shot
//! instant as `at_iso` (RFC3339). Legacy records that carried
//! `cron_expression`, `every`, or `at` are migrated on load by
//! [`migrate_legacy_job`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a job is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fire once at a specific instant, then disable.
    At,
    /// Fire repeatedly at a fixed interval.
    Every,
    /// Fire according to a cron expression.
    Cron,
}

/// Schedule definition for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// The type of schedule.
    pub kind: ScheduleKind,

    /// For [`ScheduleKind::At`]: the one-shot instant.
    #[serde(
        rename = "at_iso",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub at: Option<DateTime<Utc>>,

    /// For [`ScheduleKind::Every`]: interval in milliseconds (must be > 0).
    #[serde(
        rename = "every_duration_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub every_ms: Option<i64>,

    /// For [`ScheduleKind::Cron`]: 5- or 6-field cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,

    /// Additive offset applied to every computed run time.
    #[serde(rename = "stagger_duration_ms", default)]
    pub stagger_ms: i64,

    /// Timezone name for cron expressions (informational; evaluation is UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

impl CronSchedule {
    /// A one-shot schedule at the given instant.
    pub fn at(when: DateTime<Utc>) -> Self {
        Self {
            kind: ScheduleKind::At,
            at: Some(when),
            every_ms: None,
            expr: None,
            stagger_ms: 0,
            tz: None,
        }
    }

    /// A fixed-interval schedule.
    pub fn every_ms(interval_ms: i64) -> Self {
        Self {
            kind: ScheduleKind::Every,
            at: None,
            every_ms: Some(interval_ms),
            expr: None,
            stagger_ms: 0,
            tz: None,
        }
    }

    /// A cron-expression schedule.
    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            kind: ScheduleKind::Cron,
            at: None,
            every_ms: None,
            expr: Some(expr.into()),
            stagger_ms: 0,
            tz: None,
        }
    }

    /// True for one-shot (`at`) schedules.
    pub fn is_one_shot(&self) -> bool {
        self.kind == ScheduleKind::At
    }
}

/// What a job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Publish a synthesized system event into the bus.
    SystemEvent,
    /// Publish a synthesized user turn for the agent.
    AgentTurn,
}

/// Payload executed when a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronPayload {
    /// The type of payload.
    pub kind: PayloadKind,

    /// Agent prompt for [`PayloadKind::AgentTurn`].
    #[serde(default)]
    pub message: String,

    /// Event type name for [`PayloadKind::SystemEvent`].
    #[serde(default)]
    pub event_type: String,
}

impl Default for CronPayload {
    fn default() -> Self {
        Self {
            kind: PayloadKind::AgentTurn,
            message: String::new(),
            event_type: String::new(),
        }
    }
}

/// How a run's result is delivered, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// No delivery.
    #[default]
    None,
    /// Publish an outbound message to a channel.
    Announce,
    /// Reserved; best-effort HTTP callback.
    Webhook,
}

/// Delivery settings for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CronDelivery {
    /// Delivery mode.
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Target channel for [`DeliveryMode::Announce`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Target chat / recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Swallow delivery errors instead of marking the run failed.
    #[serde(default)]
    pub best_effort: bool,
}

/// Whether a due job may wake the host from idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WakeMode {
    /// Fire on the next tick regardless of host state.
    #[default]
    Now,
    /// Defer to the next natural wake-up.
    NextHeartbeat,
}

/// Outcome of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Completed successfully.
    Ok,
    /// Failed with an error.
    Error,
    /// Skipped (e.g. already running).
    Skipped,
}

/// Runtime state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJobState {
    /// Whether the job is active.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Next scheduled run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,

    /// Last completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,

    /// Set while an execution is in flight; acts as the single-flight latch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at: Option<DateTime<Utc>>,

    /// Outcome of the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,

    /// Error message from the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Number of consecutive failed runs.
    #[serde(default)]
    pub consecutive_errors: u32,

    /// Runs are suppressed until this instant after failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_backoff_until: Option<DateTime<Utc>>,

    /// Total number of completed runs.
    #[serde(default)]
    pub run_count: u64,
}

impl Default for CronJobState {
    fn default() -> Self {
        Self {
            enabled: true,
            next_run_at: None,
            last_run_at: None,
            running_at: None,
            last_status: None,
            last_error: None,
            consecutive_errors: 0,
            error_backoff_until: None,
            run_count: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique job identifier (`job-` prefix by convention).
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// When to run.
    pub schedule: CronSchedule,

    /// What to do.
    #[serde(default)]
    pub payload: CronPayload,

    /// How to deliver the result.
    #[serde(default)]
    pub delivery: CronDelivery,

    /// Whether a due job may wake the host.
    #[serde(default)]
    pub wake_mode: WakeMode,

    /// Runtime state.
    #[serde(default)]
    pub state: CronJobState,

    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// One run-log record, stored as a JSONL line under `runs/<jobId>.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// Unique run identifier.
    pub run_id: String,

    /// The job this run belongs to.
    pub job_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Run outcome.
    pub status: JobStatus,

    /// Error message for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

/// Migrate a legacy job object in place.
///
/// Legacy records carried `cron_expression`, `every` (ms), or `at`
/// (RFC3339) at the schedule level without a `kind`; the kind is inferred
/// from whichever field is populated. Records already in the current
/// format are returned untouched.
pub fn migrate_legacy_job(value: &mut serde_json::Value) {
    let Some(schedule) = value.get_mut("schedule").and_then(|s| s.as_object_mut()) else {
        return;
    };
    if schedule.contains_key("kind") {
        return;
    }

    if let Some(expr) = schedule.remove("cron_expression") {
        schedule.insert("kind".into(), serde_json::json!("cron"));
        schedule.insert("expr".into(), expr);
    } else if let Some(every) = schedule.remove("every") {
        schedule.insert("kind".into(), serde_json::json!("every"));
        schedule.insert("every_duration_ms".into(), every);
    } else if let Some(at) = schedule.remove("at") {
        schedule.insert("kind".into(), serde_json::json!("at"));
        schedule.insert("at_iso".into(), at);
    }
}
