//! Agent manager and inbound router.
//!
//! A single consumer drains the bus's inbound queue and routes each
//! message:
//!
//! 1. Conversations bound to an ACP coding session are handed to the
//!    [`AcpManager`] and never reach the LLM loop.
//! 2. "Run a cron job once" requests are intercepted, acknowledged,
//!    and executed in the background with a per-job cooldown.
//! 3. Everything else selects an agent by `(channel:account)` binding
//!    (falling back to the default agent), loads the session history,
//!    and runs the orchestrator.
//!
//! After a successful run only the newly generated message suffix is
//! persisted, and the last assistant message is published as the reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_types::error::{ErrorCode, Result, TetherError};
use tether_types::event::{InboundMessage, OutboundMessage};
use tether_types::message::{Message, Role};

use crate::acp::{AcpManager, SubagentSpawner, ThreadRouter};
use crate::bus::MessageBus;
use crate::compact::{CompactionConfig, compact_messages};
use crate::intent::detect_cron_run;
use crate::orchestrator::{MessageQueue, Orchestrator, RunOptions};
use crate::sessions::SessionStore;

/// Summary of a job as the router sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJobSummary {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

/// Port into the cron service for the one-shot intent handler.
#[async_trait]
pub trait CronRunner: Send + Sync {
    /// List all jobs.
    async fn list_jobs(&self) -> Result<Vec<CronJobSummary>>;

    /// Execute one job immediately.
    async fn run_job(&self, job_id: &str) -> Result<()>;
}

/// Manager settings.
#[derive(Clone)]
pub struct AgentManagerConfig {
    /// Maximum history messages loaded per turn.
    pub max_history: usize,

    /// Compaction applied on context overflow.
    pub compaction: CompactionConfig,

    /// Per-job cooldown for manual cron runs.
    pub cron_cooldown: Duration,

    /// Timeout for a manual cron run.
    pub cron_run_timeout: Duration,
}

impl Default for AgentManagerConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            compaction: CompactionConfig::default(),
            cron_cooldown: Duration::from_secs(60),
            cron_run_timeout: Duration::from_secs(120),
        }
    }
}

/// Routes inbound messages to agents, intents, and bound ACP sessions.
pub struct AgentManager {
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    default_agent: Arc<Orchestrator>,
    agents: RwLock<HashMap<String, Arc<Orchestrator>>>,
    /// `"{channel}:{account}"` → agent name.
    bindings: RwLock<HashMap<String, String>>,
    thread_router: Option<Arc<dyn ThreadRouter>>,
    acp: Option<Arc<dyn AcpManager>>,
    cron: Option<Arc<dyn CronRunner>>,
    /// Manual-cron cooldown per job id.
    cooldowns: Mutex<HashMap<String, Instant>>,
    config: AgentManagerConfig,
    cancel: CancellationToken,
}

impl AgentManager {
    /// Create a manager with a default agent.
    pub fn new(
        bus: Arc<MessageBus>,
        sessions: Arc<SessionStore>,
        default_agent: Arc<Orchestrator>,
        config: AgentManagerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            sessions,
            default_agent,
            agents: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            thread_router: None,
            acp: None,
            cron: None,
            cooldowns: Mutex::new(HashMap::new()),
            config,
            cancel,
        }
    }

    /// Attach the thread-binding lookup port.
    pub fn with_thread_router(mut self, router: Arc<dyn ThreadRouter>) -> Self {
        self.thread_router = Some(router);
        self
    }

    /// Attach the ACP driver.
    pub fn with_acp(mut self, acp: Arc<dyn AcpManager>) -> Self {
        self.acp = Some(acp);
        self
    }

    /// Attach the cron port for the one-shot intent.
    pub fn with_cron(mut self, cron: Arc<dyn CronRunner>) -> Self {
        self.cron = Some(cron);
        self
    }

    /// Register a named agent.
    pub async fn register_agent(&self, name: impl Into<String>, agent: Arc<Orchestrator>) {
        self.agents.write().await.insert(name.into(), agent);
    }

    /// Bind `"{channel}:{account}"` to a named agent.
    pub async fn bind_agent(&self, channel_account: impl Into<String>, agent: impl Into<String>) {
        self.bindings
            .write()
            .await
            .insert(channel_account.into(), agent.into());
    }

    /// Consume inbound messages until the bus closes or `cancel` fires.
    ///
    /// Errors on individual messages are logged; the loop continues.
    pub async fn run(self: Arc<Self>) {
        info!("agent manager started");
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("agent manager cancelled, exiting");
                    break;
                }
                msg = self.bus.consume_inbound() => match msg {
                    Some(msg) => msg,
                    None => {
                        info!("inbound queue closed, agent manager exiting");
                        break;
                    }
                },
            };

            debug!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                "routing inbound message"
            );
            if let Err(e) = self.clone().route(msg).await {
                error!(error = %e, "failed to route inbound message");
            }
        }
    }

    /// Route one inbound message. Exactly one handler processes it.
    pub async fn route(self: Arc<Self>, msg: InboundMessage) -> Result<()> {
        // 1. ACP thread-bound conversation?
        if let Some(record) = self.resolve_binding(&msg).await {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.run_acp_turn(record.target_session_key, msg).await;
            });
            return Ok(());
        }

        // 2. One-shot cron intent? Synthesized cron traffic is exempt so a
        //    job prompt mentioning the keywords cannot re-trigger itself.
        if msg.channel != "cron"
            && self.cron.is_some()
            && let Some(intent) = detect_cron_run(&msg.content)
        {
            return self.handle_cron_intent(msg, intent.job_id).await;
        }

        // 3. The LLM loop.
        self.run_agent_turn(msg).await
    }

    async fn resolve_binding(
        &self,
        msg: &InboundMessage,
    ) -> Option<tether_types::binding::ThreadBindingRecord> {
        let router = self.thread_router.as_ref()?;
        self.acp.as_ref()?;
        router
            .resolve(&msg.channel, &msg.account_id, &msg.chat_id)
            .await
    }

    /// Stream one tracked ACP turn into a single outbound reply.
    async fn run_acp_turn(&self, target_session_key: String, msg: InboundMessage) {
        let Some(acp) = self.acp.as_ref() else {
            return;
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
        let turn = acp.run_tracked_turn(&target_session_key, &msg.content, tx);

        let collector = async {
            let mut text = String::new();
            while let Some(delta) = rx.recv().await {
                text.push_str(&delta);
            }
            text
        };

        let (result, text) = tokio::join!(turn, collector);

        let reply = match result {
            Ok(()) if !text.is_empty() => text,
            Ok(()) => "(no output)".to_string(),
            Err(e) => {
                warn!(error = %e, session = %target_session_key, "acp turn failed");
                "ACP session is currently unavailable — please retry".to_string()
            }
        };

        let outbound = OutboundMessage::reply_to_inbound(&msg, reply);
        if let Err(e) = self.bus.publish_outbound(outbound).await {
            warn!(error = %e, "failed to publish acp reply");
        }
    }

    /// Handle a detected "run a cron job once" request.
    async fn handle_cron_intent(
        self: Arc<Self>,
        msg: InboundMessage,
        explicit_job_id: Option<String>,
    ) -> Result<()> {
        let cron = self
            .cron
            .clone()
            .ok_or_else(|| TetherError::internal("cron runner not attached"))?;

        // Resolve the target job.
        let job_id = match explicit_job_id {
            Some(id) => id,
            None => {
                let jobs = cron.list_jobs().await?;
                let enabled: Vec<_> = jobs.into_iter().filter(|j| j.enabled).collect();
                match enabled.len() {
                    1 => enabled[0].id.clone(),
                    0 => {
                        return self
                            .reply(&msg, "No enabled cron job found to run.")
                            .await;
                    }
                    n => {
                        return self
                            .reply(
                                &msg,
                                format!(
                                    "Found {n} enabled cron jobs — name one explicitly (job-<id>)."
                                ),
                            )
                            .await;
                    }
                }
            }
        };

        // Per-job manual cooldown.
        {
            let mut cooldowns = self.cooldowns.lock().await;
            if let Some(last) = cooldowns.get(&job_id)
                && last.elapsed() < self.config.cron_cooldown
            {
                debug!(job_id = %job_id, "manual cron run within cooldown, ignoring");
                return self
                    .reply(
                        &msg,
                        format!("Job {job_id} was triggered moments ago — please wait a minute."),
                    )
                    .await;
            }
            cooldowns.insert(job_id.clone(), Instant::now());
        }

        // Acknowledge immediately, run in the background.
        self.reply(&msg, format!("Running cron job {job_id} now…"))
            .await?;

        let manager = self.clone();
        let timeout = self.config.cron_run_timeout;
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, cron.run_job(&job_id)).await;
            let text = match result {
                Ok(Ok(())) => format!("Cron job {job_id} completed."),
                Ok(Err(e)) => format!("Cron job {job_id} failed: {e}"),
                Err(_) => format!("Cron job {job_id} timed out."),
            };
            if let Err(e) = manager.reply(&msg, text).await {
                warn!(error = %e, "failed to publish cron run result");
            }
        });

        Ok(())
    }

    /// Run the LLM loop for one inbound message.
    async fn run_agent_turn(&self, msg: InboundMessage) -> Result<()> {
        let session_key = effective_session_key(&msg);
        let agent = self.select_agent(&msg).await;

        let session = self.sessions.get_or_create(&session_key).await?;
        let history = session.history_safe(self.config.max_history);
        let user_msg = Message::user_with_images(msg.content.clone(), msg.media.clone());

        let result = self
            .run_with_recovery(&agent, &session_key, history, user_msg, &msg)
            .await;

        match result {
            Ok((history_len, final_messages)) => {
                let suffix = final_messages[history_len..].to_vec();
                let reply = suffix
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.content.clone());

                // Durable before acknowledging.
                self.sessions.append(&session_key, suffix).await?;

                if let Some(content) = reply
                    && !content.is_empty()
                {
                    let outbound = OutboundMessage::reply_to_inbound(&msg, content);
                    self.bus.publish_outbound(outbound).await?;
                }
                Ok(())
            }
            Err(e) => {
                let text = user_facing_error(&e);
                warn!(error = %e, session = %session_key, "agent turn failed");
                self.reply(&msg, text).await?;
                Err(e)
            }
        }
    }

    /// Run the orchestrator with overflow compaction and corrupted-session
    /// recovery.
    ///
    /// Returns `(history_len, final_messages)` so the caller can slice off
    /// the newly generated suffix.
    async fn run_with_recovery(
        &self,
        agent: &Arc<Orchestrator>,
        session_key: &str,
        history: Vec<Message>,
        user_msg: Message,
        msg: &InboundMessage,
    ) -> Result<(usize, Vec<Message>)> {
        let opts = self.run_options(session_key, msg);
        let history_len = history.len();

        match agent.run(history.clone(), vec![user_msg.clone()], &opts).await {
            Ok(final_messages) => Ok((history_len, final_messages)),
            Err(e) if e.code == ErrorCode::ContextOverflow => {
                info!(session = %session_key, "context overflow, compacting and retrying");
                let compacted = compact_messages(&history, &self.config.compaction);
                let compacted_len = compacted.len();
                let opts = self.run_options(session_key, msg);
                agent
                    .run(compacted, vec![user_msg], &opts)
                    .await
                    .map(|m| (compacted_len, m))
            }
            Err(e) if is_session_corruption(&e) => {
                warn!(session = %session_key, "session format mismatch, resetting session");
                self.sessions.delete(session_key).await?;
                let opts = self.run_options(session_key, msg);
                agent
                    .run(Vec::new(), vec![user_msg], &opts)
                    .await
                    .map(|m| (0, m))
            }
            Err(e) => Err(e),
        }
    }

    fn run_options(&self, session_key: &str, msg: &InboundMessage) -> RunOptions {
        RunOptions {
            session_key: session_key.to_string(),
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            events: None,
            cancel: self.cancel.child_token(),
            steering: MessageQueue::new(),
            follow_up: MessageQueue::new(),
        }
    }

    async fn select_agent(&self, msg: &InboundMessage) -> Arc<Orchestrator> {
        let account = if msg.account_id.is_empty() {
            "default"
        } else {
            &msg.account_id
        };
        let binding_key = format!("{}:{}", msg.channel, account);

        let bindings = self.bindings.read().await;
        if let Some(name) = bindings.get(&binding_key) {
            let agents = self.agents.read().await;
            if let Some(agent) = agents.get(name) {
                return agent.clone();
            }
            warn!(agent = %name, "bound agent not registered, using default");
        }
        self.default_agent.clone()
    }

    async fn reply(&self, msg: &InboundMessage, content: impl Into<String>) -> Result<()> {
        let outbound = OutboundMessage::reply_to_inbound(msg, content);
        self.bus.publish_outbound(outbound).await
    }
}

#[async_trait]
impl SubagentSpawner for AgentManager {
    async fn spawn_subagent(&self, parent_session: &str, task: &str) -> Result<String> {
        let key = format!("subagent:{}:{}", parent_session, uuid::Uuid::new_v4());
        let opts = RunOptions {
            session_key: key.clone(),
            channel: "subagent".into(),
            chat_id: key.clone(),
            events: None,
            cancel: self.cancel.child_token(),
            steering: MessageQueue::new(),
            follow_up: MessageQueue::new(),
        };

        let final_messages = self
            .default_agent
            .run(Vec::new(), vec![Message::user(task.to_string())], &opts)
            .await?;
        self.sessions.append(&key, final_messages).await?;
        Ok(key)
    }
}

/// Session key for an inbound message; a missing or "default" chat id gets
/// a per-timestamp key so unrelated messages do not share history.
fn effective_session_key(msg: &InboundMessage) -> String {
    if msg.chat_id.is_empty() || msg.chat_id == "default" {
        let account = if msg.account_id.is_empty() {
            "default"
        } else {
            &msg.account_id
        };
        format!(
            "{}:{}:{}",
            msg.channel,
            account,
            msg.timestamp.timestamp_millis()
        )
    } else {
        msg.session_key()
    }
}

/// The provider-side symptom of a history whose tool pairing no longer
/// matches what the provider requires.
fn is_session_corruption(err: &TetherError) -> bool {
    err.code == ErrorCode::SessionCorrupted
        || (err.message.contains("tool_call_id") && err.message.contains("mismatch"))
}

/// Short prose for user-visible failures.
fn user_facing_error(err: &TetherError) -> String {
    match err.code {
        ErrorCode::ContextOverflow => "Context overflow — please simplify".into(),
        ErrorCode::RateLimit => "Rate limited — please retry shortly".into(),
        ErrorCode::BillingError => "Provider billing problem — check your account".into(),
        ErrorCode::AuthenticationFailed => "Provider authentication failed".into(),
        ErrorCode::ProviderTimeout | ErrorCode::Timeout => {
            "The model took too long — please retry".into()
        }
        _ => format!("Something went wrong: {}", err.message),
    }
}
