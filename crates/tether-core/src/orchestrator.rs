//! The agent turn/tool loop.
//!
//! [`Orchestrator::run`] implements a two-level loop. The inner loop
//! produces assistant turns and executes their tool calls; steering
//! messages injected mid-run abandon the remaining tool calls of the
//! current turn and are appended before the next assistant response. When
//! the agent would otherwise stop, the outer loop picks up queued
//! follow-up messages and continues.
//!
//! Provider calls are wrapped in classify+retry; an optional context
//! transform runs before each call and falls back to the untransformed
//! context on error.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_llm::retry::{RetryConfig, retry};
use tether_llm::types::{ChatInput, ChatOptions, ProviderResponse, ToolCallRequest};
use tether_llm::{FailoverReason, Provider, ProviderError};
use tether_types::error::{ErrorCode, Result, TetherError};
use tether_types::message::{Message, Role};

use crate::events::{AgentEvent, EventSink, emit};
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

/// A shared FIFO of messages injected into a running agent.
#[derive(Clone, Default)]
pub struct MessageQueue {
    inner: Arc<std::sync::Mutex<VecDeque<Message>>>,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message.
    pub fn push(&self, msg: Message) {
        self.inner.lock().expect("queue lock poisoned").push_back(msg);
    }

    /// Take all queued messages, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .drain(..)
            .collect()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").is_empty()
    }
}

/// Hook applied to the context before each provider call.
pub type TransformContext =
    Arc<dyn Fn(Vec<Message>) -> Result<Vec<Message>> + Send + Sync>;

/// Orchestrator settings.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// System prompt prepended to every provider call (not persisted).
    pub system_prompt: String,

    /// Model override passed to the provider.
    pub model: Option<String>,

    /// Upper bound on provider calls per run.
    pub max_turns: usize,

    /// Retry policy for provider calls.
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: None,
            max_turns: 24,
            retry: RetryConfig::default(),
        }
    }
}

/// Per-run options and queues.
pub struct RunOptions {
    /// Session the run belongs to.
    pub session_key: String,

    /// Originating channel.
    pub channel: String,

    /// Originating chat.
    pub chat_id: String,

    /// Event sink for progress narration.
    pub events: Option<EventSink>,

    /// Cancellation token for the whole run.
    pub cancel: CancellationToken,

    /// Steering messages (user interruptions mid-run).
    pub steering: MessageQueue,

    /// Follow-up messages (queued work after the agent would stop).
    pub follow_up: MessageQueue,
}

impl RunOptions {
    /// Minimal options for tests and internal runs.
    pub fn detached() -> Self {
        Self {
            session_key: String::new(),
            channel: String::new(),
            chat_id: String::new(),
            events: None,
            cancel: CancellationToken::new(),
            steering: MessageQueue::new(),
            follow_up: MessageQueue::new(),
        }
    }
}

/// Mutable state of one run.
struct AgentState {
    /// Full context: history plus everything generated this run.
    messages: Vec<Message>,

    /// Tool calls currently executing. Must be empty at terminal exit.
    pending_tool_ids: HashSet<String>,
}

/// The turn/tool loop runner.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: OrchestratorConfig,
    transform: Option<TransformContext>,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
            transform: None,
        }
    }

    /// Install a context transform hook.
    pub fn with_transform(mut self, transform: TransformContext) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Run the loop over `history` with the new `prompts` appended.
    ///
    /// Returns the full message list; the suffix past `history.len()` is
    /// what the run generated (prompts included).
    pub async fn run(
        &self,
        history: Vec<Message>,
        prompts: Vec<Message>,
        opts: &RunOptions,
    ) -> Result<Vec<Message>> {
        let history_len = history.len();
        let mut state = AgentState {
            messages: history,
            pending_tool_ids: HashSet::new(),
        };
        let mut pending: Vec<Message> = prompts;
        let mut provider_calls = 0usize;

        emit(opts.events.as_ref(), AgentEvent::AgentStart);

        // Outer loop: picks up follow-up messages.
        loop {
            let mut has_more_tool_calls = false;

            // Inner loop: assistant turns and their tool calls.
            while has_more_tool_calls || !pending.is_empty() {
                if opts.cancel.is_cancelled() {
                    return Err(TetherError::cancelled());
                }
                provider_calls += 1;
                if provider_calls > self.config.max_turns {
                    return Err(TetherError::internal(format!(
                        "max turns ({}) exceeded",
                        self.config.max_turns
                    )));
                }

                emit(opts.events.as_ref(), AgentEvent::TurnStart);

                for msg in pending.drain(..) {
                    emit(
                        opts.events.as_ref(),
                        AgentEvent::MessageStart { role: msg.role },
                    );
                    emit(
                        opts.events.as_ref(),
                        AgentEvent::MessageEnd {
                            message: msg.clone(),
                        },
                    );
                    state.messages.push(msg);
                }

                emit(
                    opts.events.as_ref(),
                    AgentEvent::MessageStart {
                        role: Role::Assistant,
                    },
                );
                let response = self.chat(&state.messages, &opts.cancel).await?;
                let assistant = response.to_message();
                emit(
                    opts.events.as_ref(),
                    AgentEvent::MessageEnd {
                        message: assistant.clone(),
                    },
                );
                state.messages.push(assistant);

                let mut steered = false;
                if response.tool_calls.is_empty() {
                    has_more_tool_calls = false;
                } else {
                    let steering = self
                        .execute_tool_calls(&response.tool_calls, &mut state, opts)
                        .await;
                    has_more_tool_calls = true;

                    if !steering.is_empty() {
                        // Abandon the remaining flow of this turn; the
                        // steering messages open the next one.
                        pending = steering;
                        steered = true;
                    }
                }

                emit(opts.events.as_ref(), AgentEvent::TurnEnd);

                if !steered && pending.is_empty() {
                    pending = opts.steering.drain();
                }
            }

            let follow_ups = opts.follow_up.drain();
            if follow_ups.is_empty() {
                break;
            }
            debug!(count = follow_ups.len(), "continuing with follow-up messages");
            pending = follow_ups;
        }

        debug_assert!(state.pending_tool_ids.is_empty());

        emit(
            opts.events.as_ref(),
            AgentEvent::AgentEnd {
                final_messages: state.messages[history_len..].to_vec(),
            },
        );
        Ok(state.messages)
    }

    /// Execute the turn's tool calls in order.
    ///
    /// After each tool, the steering queue is polled once; when it holds
    /// messages the remaining tools are skipped (no results synthesized
    /// for them) and the steering messages are returned.
    async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRequest],
        state: &mut AgentState,
        opts: &RunOptions,
    ) -> Vec<Message> {
        let ctx = ToolContext {
            session_key: opts.session_key.clone(),
            channel: opts.channel.clone(),
            chat_id: opts.chat_id.clone(),
            cancel: opts.cancel.clone(),
        };

        for (idx, call) in calls.iter().enumerate() {
            emit(
                opts.events.as_ref(),
                AgentEvent::ToolExecutionStart {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                },
            );
            state.pending_tool_ids.insert(call.id.clone());

            let events = opts.events.clone();
            let call_id = call.id.clone();
            let on_update = move |partial: ToolResult| {
                emit(
                    events.as_ref(),
                    AgentEvent::ToolExecutionUpdate {
                        tool_call_id: call_id.clone(),
                        partial,
                    },
                );
            };

            let result = self
                .tools
                .execute(&call.name, &ctx, call.params.clone(), Some(&on_update))
                .await;

            state.pending_tool_ids.remove(&call.id);
            emit(
                opts.events.as_ref(),
                AgentEvent::ToolExecutionEnd {
                    tool_call_id: call.id.clone(),
                    result: result.clone(),
                },
            );

            state
                .messages
                .push(Message::tool_result(call.id.clone(), result.text_content()));

            let steering = opts.steering.drain();
            if !steering.is_empty() {
                let skipped = calls.len() - idx - 1;
                if skipped > 0 {
                    warn!(skipped, "steering received, skipping remaining tool calls");
                }
                return steering;
            }
        }

        Vec::new()
    }

    /// One provider call: transform hook, system prompt, classify+retry.
    async fn chat(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse> {
        let transformed = match &self.transform {
            Some(transform) => match transform(messages.to_vec()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "context transform failed, using untransformed context");
                    messages.to_vec()
                }
            },
            None => messages.to_vec(),
        };

        let mut context = Vec::with_capacity(transformed.len() + 1);
        if !self.config.system_prompt.is_empty() {
            context.push(Message::system(self.config.system_prompt.clone()));
        }
        context.extend(transformed);

        let tool_defs = self.tools.definitions();
        let outcome = retry(&self.config.retry, cancel, || {
            let input = ChatInput {
                messages: &context,
                tools: &tool_defs,
                options: ChatOptions {
                    model: self.config.model.clone(),
                    ..Default::default()
                },
            };
            self.provider.chat(input, cancel)
        })
        .await;

        for attempt in &outcome.attempts {
            debug!(
                attempt = attempt.attempt,
                reason = %attempt.reason,
                "provider attempt failed"
            );
        }

        outcome.result.map_err(provider_error_to_core)
    }
}

/// Map a provider error to the typed core taxonomy.
pub fn provider_error_to_core(err: ProviderError) -> TetherError {
    let code = match tether_llm::retry::reason_for(&err) {
        FailoverReason::Auth => ErrorCode::AuthenticationFailed,
        FailoverReason::RateLimit => ErrorCode::RateLimit,
        FailoverReason::Timeout => ErrorCode::ProviderTimeout,
        FailoverReason::Billing => ErrorCode::BillingError,
        FailoverReason::ContextOverflow => ErrorCode::ContextOverflow,
        FailoverReason::Unknown => match err {
            ProviderError::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::ProviderUnavailable,
        },
    };
    TetherError::new(code, err.to_string()).with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::tools::{OnUpdate, Tool};
    use tether_llm::types::ChatInput;

    /// Provider that replays a scripted sequence of responses.
    struct ScriptedProvider {
        script: Mutex<VecDeque<std::result::Result<ProviderResponse, ProviderError>>>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(
            script: Vec<std::result::Result<ProviderResponse, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            input: ChatInput<'_>,
            _cancel: &CancellationToken,
        ) -> tether_llm::Result<ProviderResponse> {
            self.calls.lock().unwrap().push(input.messages.len());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ProviderResponse::text("out of script")))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"x": {}}, "required": ["x"]})
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            params: serde_json::Value,
            _on_update: Option<OnUpdate<'_>>,
        ) -> Result<ToolResult> {
            Ok(ToolResult::text(params["x"].to_string()))
        }
    }

    fn tool_call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            params: serde_json::json!({"x": 1}),
        }
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool)).unwrap();
        Arc::new(reg)
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn simple_text_turn() {
        let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::text("hi"))]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config());

        let final_messages = orch
            .run(vec![], vec![Message::user("hello")], &RunOptions::detached())
            .await
            .unwrap();

        assert_eq!(final_messages.len(), 2);
        assert_eq!(final_messages[0].role, Role::User);
        assert_eq!(final_messages[1].content, "hi");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn tool_call_then_text() {
        let provider = ScriptedProvider::new(vec![
            Ok(ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "echo")],
                finish_reason: Some("tool_calls".into()),
                usage: None,
            }),
            Ok(ProviderResponse::text("done")),
        ]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config());

        let messages = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap();

        // user, assistant(toolCalls), tool(t1), assistant("done")
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_call_ids(), vec!["t1"]);
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(messages[2].content, "1");
        assert_eq!(messages[3].content, "done");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn missing_tool_appends_error_result() {
        let provider = ScriptedProvider::new(vec![
            Ok(ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "no_such_tool")],
                finish_reason: Some("tool_calls".into()),
                usage: None,
            }),
            Ok(ProviderResponse::text("sorry")),
        ]);
        let orch = Orchestrator::new(provider, tools(), fast_config());

        let messages = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap();

        assert_eq!(messages[2].role, Role::Tool);
        assert!(messages[2].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn steering_skips_remaining_tools() {
        let provider = ScriptedProvider::new(vec![
            Ok(ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "echo"), tool_call("t2", "echo")],
                finish_reason: Some("tool_calls".into()),
                usage: None,
            }),
            Ok(ProviderResponse::text("adjusted")),
        ]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config());

        let opts = RunOptions::detached();
        // Steering waiting before the run reaches the tool loop: polled
        // after the first tool executes.
        opts.steering.push(Message::user("actually, stop"));

        let messages = orch
            .run(vec![], vec![Message::user("go")], &opts)
            .await
            .unwrap();

        // t1 executed, t2 skipped, steering message appended, final reply.
        let tool_results: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_results.len(), 1);
        assert_eq!(tool_results[0].tool_call_id.as_deref(), Some("t1"));
        assert!(messages.iter().any(|m| m.content == "actually, stop"));
        assert_eq!(messages.last().unwrap().content, "adjusted");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn follow_up_starts_new_outer_loop() {
        let provider = ScriptedProvider::new(vec![
            Ok(ProviderResponse::text("first")),
            Ok(ProviderResponse::text("second")),
        ]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config());

        let opts = RunOptions::detached();
        opts.follow_up.push(Message::user("and another thing"));

        let messages = orch
            .run(vec![], vec![Message::user("go")], &opts)
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        assert_eq!(messages.last().unwrap().content, "second");
        assert!(messages.iter().any(|m| m.content == "and another thing"));
    }

    #[tokio::test]
    async fn transient_provider_error_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Timeout),
            Ok(ProviderResponse::text("recovered")),
        ]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config());

        let messages = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap();

        assert_eq!(messages.last().unwrap().content, "recovered");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn billing_error_aborts_with_code() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Billing("no credit".into()))]);
        let orch = Orchestrator::new(provider, tools(), fast_config());

        let err = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BillingError);
    }

    #[tokio::test]
    async fn context_overflow_surfaces_typed_code() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::ContextOverflow(
            "prompt is too long".into(),
        ))]);
        let orch = Orchestrator::new(provider, tools(), fast_config());

        let err = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ContextOverflow);
    }

    #[tokio::test]
    async fn system_prompt_prepended_not_persisted() {
        let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::text("hi"))]);
        let mut config = fast_config();
        config.system_prompt = "be brief".into();
        let orch = Orchestrator::new(provider.clone(), tools(), config);

        let messages = orch
            .run(vec![], vec![Message::user("hello")], &RunOptions::detached())
            .await
            .unwrap();

        // Provider saw system + user; run output holds user + assistant.
        assert_eq!(*provider.calls.lock().unwrap(), vec![2]);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn transform_error_falls_back_to_untransformed() {
        let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::text("ok"))]);
        let orch = Orchestrator::new(provider.clone(), tools(), fast_config())
            .with_transform(Arc::new(|_msgs| {
                Err(TetherError::internal("transform exploded"))
            }));

        let messages = orch
            .run(vec![], vec![Message::user("hello")], &RunOptions::detached())
            .await
            .unwrap();
        assert_eq!(messages.last().unwrap().content, "ok");
        assert_eq!(*provider.calls.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn events_narrate_tool_execution() {
        let provider = ScriptedProvider::new(vec![
            Ok(ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "echo")],
                finish_reason: Some("tool_calls".into()),
                usage: None,
            }),
            Ok(ProviderResponse::text("done")),
        ]);
        let orch = Orchestrator::new(provider, tools(), fast_config());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut opts = RunOptions::detached();
        opts.events = Some(tx);

        orch.run(vec![], vec![Message::user("go")], &opts)
            .await
            .unwrap();

        let mut saw_start = false;
        let mut saw_end = false;
        let mut saw_agent_end = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::ToolExecutionStart { ref tool_call_id, .. } => {
                    assert_eq!(tool_call_id, "t1");
                    saw_start = true;
                }
                AgentEvent::ToolExecutionEnd { ref result, .. } => {
                    assert!(!result.is_error());
                    saw_end = true;
                }
                AgentEvent::AgentEnd { ref final_messages } => {
                    assert_eq!(final_messages.len(), 4);
                    saw_agent_end = true;
                }
                _ => {}
            }
        }
        assert!(saw_start && saw_end && saw_agent_end);
    }

    #[tokio::test]
    async fn history_suffix_is_the_new_messages() {
        let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::text("reply"))]);
        let orch = Orchestrator::new(provider, tools(), fast_config());

        let history = vec![Message::user("old q"), Message::assistant("old a")];
        let messages = orch
            .run(history.clone(), vec![Message::user("new q")], &RunOptions::detached())
            .await
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(&messages[..2], &history[..]);
        assert_eq!(messages[2].content, "new q");
        assert_eq!(messages[3].content, "reply");
    }

    #[tokio::test]
    async fn max_turns_guard() {
        // Provider always asks for another tool call.
        let script: Vec<_> = (0..50)
            .map(|i| {
                Ok(ProviderResponse {
                    content: String::new(),
                    tool_calls: vec![tool_call(&format!("t{i}"), "echo")],
                    finish_reason: Some("tool_calls".into()),
                    usage: None,
                })
            })
            .collect();
        let provider = ScriptedProvider::new(script);
        let mut config = fast_config();
        config.max_turns = 4;
        let orch = Orchestrator::new(provider, tools(), config);

        let err = orch
            .run(vec![], vec![Message::user("go")], &RunOptions::detached())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(err.message.contains("max turns"));
    }

    #[test]
    fn message_queue_fifo() {
        let q = MessageQueue::new();
        assert!(q.is_empty());
        q.push(Message::user("a"));
        q.push(Message::user("b"));
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].content, "a");
        assert!(q.is_empty());
    }
}
