//! `tether cron` -- job administration.
//!
//! Operates directly on the workspace's cron storage; the commands work
//! whether or not a runtime is running (the runtime reloads jobs on
//! start, and the file write is atomic either way).

use std::sync::Arc;

use clap::Subcommand;

use tether_core::bus::MessageBus;
use tether_services::cron::runlog::RunLogFilter;
use tether_services::cron::{CronService, CronServiceConfig};
use tether_types::cron::{CronPayload, CronSchedule, PayloadKind};

use super::workspace_dir;

/// Subcommands for `tether cron`.
#[derive(Subcommand)]
pub enum CronAction {
    /// List all jobs.
    List,

    /// Add a job with a cron expression.
    Add {
        /// Job name.
        name: String,

        /// 5- or 6-field cron expression (e.g. "0 8 * * *").
        schedule: String,

        /// Agent prompt fired when the job runs.
        message: String,
    },

    /// Remove a job.
    Remove {
        /// Job id (job-<id>).
        job_id: String,
    },

    /// Enable a job.
    Enable {
        /// Job id.
        job_id: String,
    },

    /// Disable a job.
    Disable {
        /// Job id.
        job_id: String,
    },

    /// Run a job immediately.
    Run {
        /// Job id.
        job_id: String,
    },

    /// Show recent runs of a job, newest first.
    Runs {
        /// Job id.
        job_id: String,

        /// Maximum entries shown.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

async fn open_service(config_override: Option<&str>) -> anyhow::Result<Arc<CronService>> {
    let _ = super::load_config(config_override).await?;
    let root = workspace_dir()?;
    // A detached bus: admin commands synthesize inbound traffic only for
    // `run`, and a running daemon will pick up persisted state itself.
    let bus = MessageBus::new();
    Ok(CronService::new(root.join("cron"), bus, CronServiceConfig::default()).await?)
}

pub async fn run(config_override: Option<&str>, action: CronAction) -> anyhow::Result<()> {
    let service = open_service(config_override).await?;

    match action {
        CronAction::List => {
            let jobs = service.jobs().await;
            if jobs.is_empty() {
                println!("no cron jobs");
                return Ok(());
            }
            for job in jobs {
                let next = job
                    .state
                    .next_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}  {}  enabled={}  next={}  runs={}",
                    job.id, job.name, job.state.enabled, next, job.state.run_count
                );
            }
        }
        CronAction::Add {
            name,
            schedule,
            message,
        } => {
            let id = service
                .add_job(
                    name,
                    CronSchedule::cron(schedule),
                    CronPayload {
                        kind: PayloadKind::AgentTurn,
                        message,
                        event_type: String::new(),
                    },
                    Default::default(),
                )
                .await?;
            println!("{id}");
        }
        CronAction::Remove { job_id } => {
            service.remove_job(&job_id).await?;
            println!("removed {job_id}");
        }
        CronAction::Enable { job_id } => {
            service.set_enabled(&job_id, true).await?;
            println!("enabled {job_id}");
        }
        CronAction::Disable { job_id } => {
            service.set_enabled(&job_id, false).await?;
            println!("disabled {job_id}");
        }
        CronAction::Run { job_id } => {
            service.run_job_now(&job_id).await?;
            println!("ran {job_id}");
        }
        CronAction::Runs { job_id, limit } => {
            let logs = service
                .read_logs(&RunLogFilter {
                    job_id,
                    limit,
                    ..Default::default()
                })
                .await?;
            if logs.is_empty() {
                println!("no runs");
                return Ok(());
            }
            for entry in logs {
                let status = serde_json::to_string(&entry.status)?;
                println!(
                    "{}  {}  {}ms  {}",
                    entry.started_at.to_rfc3339(),
                    status.trim_matches('"'),
                    entry.duration_ms,
                    entry.error.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
