//! `tether` -- CLI binary for the tether assistant runtime.
//!
//! Subcommands:
//!
//! - `tether install` -- create the workspace directory and default files.
//! - `tether start` -- boot the bus, sessions, provider, channels, cron,
//!   and agent manager; runs until SIGINT/SIGTERM.
//! - `tether cron` -- manage scheduled jobs.
//! - `tether sessions` -- list or clear conversation sessions.
//! - `tether acp` -- administer the ACP coding-agent subsystem.

use clap::{Parser, Subcommand};

mod commands;

/// tether assistant CLI.
#[derive(Parser)]
#[command(name = "tether", about = "tether assistant CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the workspace directory and default files.
    Install,

    /// Start the runtime (bus, channels, cron, agent manager).
    Start,

    /// Manage scheduled (cron) jobs.
    Cron {
        #[command(subcommand)]
        action: commands::cron_cmd::CronAction,
    },

    /// List or clear conversation sessions.
    Sessions {
        #[command(subcommand)]
        action: commands::sessions_cmd::SessionsAction,
    },

    /// Administer the ACP coding-agent subsystem.
    Acp {
        #[command(subcommand)]
        action: commands::acp_cmd::AcpAction,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Install => commands::install::run().await,
        Commands::Start => commands::start::run(cli.config.as_deref()).await,
        Commands::Cron { action } => commands::cron_cmd::run(cli.config.as_deref(), action).await,
        Commands::Sessions { action } => {
            commands::sessions_cmd::run(cli.config.as_deref(), action).await
        }
        Commands::Acp { action } => commands::acp_cmd::run(action).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
