//! `tether start` -- boot the full runtime.
//!
//! Wires the bus, session store, provider, orchestrator, cron service,
//! thread-binding registry, channel supervisor, and agent manager, then
//! runs until SIGINT/SIGTERM. Shutdown cancels every loop, closes the
//! bus, and joins the spawned tasks.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tether_channels::ChannelSupervisor;
use tether_channels::traits::{ChannelError, ChannelHost};
use tether_core::bus::MessageBus;
use tether_core::manager::{AgentManager, AgentManagerConfig};
use tether_core::orchestrator::{Orchestrator, OrchestratorConfig};
use tether_core::sessions::SessionStore;
use tether_core::tools::ToolRegistry;
use tether_llm::openai_compat::{OpenAiCompatProvider, ProviderConfig};
use tether_services::binding::storage::JsonFileBindingStorage;
use tether_services::binding::ThreadBindingService;
use tether_services::cron::{CronService, CronServiceConfig};
use tether_types::event::InboundMessage;

use super::{load_config, resolve_api_key, workspace_dir};

/// Bridges channel adapters into the bus.
struct BusHost {
    bus: Arc<MessageBus>,
}

#[async_trait::async_trait]
impl ChannelHost for BusHost {
    async fn deliver_inbound(&self, msg: InboundMessage) -> Result<(), ChannelError> {
        self.bus
            .publish_inbound(msg)
            .await
            .map_err(|e| ChannelError::Other(e.to_string()))
    }
}

pub async fn run(config_override: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_override).await?;
    let root = workspace_dir()?;
    let cancel = CancellationToken::new();

    // Core plumbing.
    let bus = MessageBus::new();
    let sessions = Arc::new(SessionStore::new(root.join("sessions")));

    let api_key = resolve_api_key(&config)
        .context("no provider API key configured (providers.api_key or TETHER_API_KEY)")?;
    let base_url = if config.providers.base_url.is_empty() {
        "https://api.openai.com/v1".to_string()
    } else {
        config.providers.base_url.clone()
    };
    let provider = Arc::new(OpenAiCompatProvider::new(
        ProviderConfig {
            name: "openai-compat".into(),
            base_url,
            default_model: config.agents.model.clone(),
        },
        api_key,
    ));

    let tools = Arc::new(ToolRegistry::new());
    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        tools,
        OrchestratorConfig {
            system_prompt: config.agents.system_prompt.clone(),
            model: Some(config.agents.model.clone()),
            ..Default::default()
        },
    ));

    // Services.
    let cron = CronService::new(
        root.join("cron"),
        bus.clone(),
        CronServiceConfig {
            default_timeout: std::time::Duration::from_millis(
                config.cron.default_timeout_ms.max(1000) as u64,
            ),
            runlog_max_bytes: config.cron.runlog_max_bytes,
            runlog_keep_lines: config.cron.runlog_keep_lines,
        },
    )
    .await
    .context("failed to start cron service")?;

    let binding_storage = Arc::new(JsonFileBindingStorage::new(root.join("bindings")));
    let bindings = Arc::new(
        ThreadBindingService::new(binding_storage, config.bindings.clone())
            .await
            .context("failed to load thread bindings")?,
    );

    // Manager.
    let manager_config = AgentManagerConfig {
        max_history: config.agents.max_history,
        ..Default::default()
    };
    let manager = Arc::new(
        AgentManager::new(
            bus.clone(),
            sessions,
            orchestrator,
            manager_config,
            cancel.child_token(),
        )
        .with_thread_router(bindings.clone())
        .with_cron(cron.clone()),
    );
    for (channel_account, agent) in &config.agents.bindings {
        manager.bind_agent(channel_account.clone(), agent.clone()).await;
    }

    // Channels. Adapters register here from config; none are built in.
    let supervisor = Arc::new(ChannelSupervisor::new(
        Arc::new(BusHost { bus: bus.clone() }),
        cancel.child_token(),
    ));
    if !config.channels.is_empty() {
        warn!(
            configured = config.channels.len(),
            "channel adapters configured but no adapter crates are linked"
        );
    }

    // Spawn the long-running loops.
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(cron.clone().start(cancel.child_token())));
    tasks.push(tokio::spawn(manager.clone().run()));
    supervisor.start_all().await;

    let outbound = bus.subscribe_outbound();
    let supervisor_loop = supervisor.clone();
    tasks.push(tokio::spawn(async move {
        supervisor_loop.run_outbound_loop(outbound.rx).await;
    }));

    // Periodic binding TTL sweep.
    let sweep_bindings = bindings.clone();
    let sweep_cancel = cancel.child_token();
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = sweep_bindings.cleanup_expired().await {
                        warn!(error = %e, "binding sweep failed");
                    }
                }
            }
        }
    }));

    info!("tether started; press Ctrl-C to stop");
    wait_for_shutdown().await;

    info!("shutting down");
    cancel.cancel();
    supervisor.stop_all().await;
    bus.close().await;
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
