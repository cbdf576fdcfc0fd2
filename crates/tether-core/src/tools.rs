//! Tool contract and registry.
//!
//! A [`Tool`] is a named capability with a JSON-schema parameter
//! description. The [`ToolRegistry`] owns all registered tools, validates
//! required parameters before dispatch, and turns failures (including
//! unknown tool names) into error results the model can read and
//! self-correct from.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use tether_types::error::{Result, TetherError};
use tether_types::provider::{ContentBlock, ToolDef, join_text};

/// Execution context handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the call belongs to.
    pub session_key: String,

    /// Originating channel.
    pub channel: String,

    /// Originating chat.
    pub chat_id: String,

    /// Cancellation token inherited from the request.
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// A detached context for tests and internal calls.
    pub fn detached() -> Self {
        Self {
            session_key: String::new(),
            channel: String::new(),
            chat_id: String::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResult {
    /// Content blocks; streaming updates monotonically extend this.
    pub content: Vec<ContentBlock>,

    /// Structured details for the host (not shown to the model).
    pub details: HashMap<String, serde_json::Value>,

    /// Error text when the execution failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            ..Default::default()
        }
    }

    /// A failed result with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            content: vec![ContentBlock::Text {
                text: format!("Error: {error}"),
            }],
            details: HashMap::new(),
            error: Some(error),
        }
    }

    /// Concatenated text content.
    pub fn text_content(&self) -> String {
        join_text(&self.content)
    }

    /// True when the execution failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Callback for streaming partial results while a tool runs.
pub type OnUpdate<'a> = &'a (dyn Fn(ToolResult) + Send + Sync);

/// A named capability callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// Short human-readable label for progress display.
    fn label(&self) -> &str {
        self.name()
    }

    /// JSON schema of the parameters object.
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool.
    ///
    /// `on_update` may be called any number of times with partial results
    /// before the final result is returned.
    async fn execute(
        &self,
        ctx: &ToolContext,
        params: serde_json::Value,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<ToolResult>;
}

/// Registry of all tools available to the orchestrator.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(TetherError::already_exists(format!(
                "tool already registered: {name}"
            )));
        }
        debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of all tools, sorted by name for stable prompts.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .values()
            .map(|t| ToolDef {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    ///
    /// Unknown names and missing required parameters produce an error
    /// [`ToolResult`] rather than an `Err`, so the result is always
    /// appendable to the conversation for the model to self-correct.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &ToolContext,
        params: serde_json::Value,
        on_update: Option<OnUpdate<'_>>,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failed(format!("unknown tool: {name}"));
        };

        if let Err(missing) = check_required(&tool.parameters(), &params) {
            return ToolResult::failed(format!(
                "missing required parameter(s) for {name}: {missing}"
            ));
        }

        match tool.execute(ctx, params, on_update).await {
            Ok(result) => result,
            Err(e) => {
                error!(tool = name, error = %e, "tool execution failed");
                ToolResult::failed(e.to_string())
            }
        }
    }
}

/// Verify that every `required` field of the schema is present in `params`.
fn check_required(schema: &serde_json::Value, params: &serde_json::Value) -> std::result::Result<(), String> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };

    let missing: Vec<&str> = required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|field| params.get(field).is_none())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the x parameter"
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"x": {}},
                "required": ["x"],
            })
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            params: serde_json::Value,
            on_update: Option<OnUpdate<'_>>,
        ) -> Result<ToolResult> {
            if let Some(update) = on_update {
                update(ToolResult::text("working"));
            }
            Ok(ToolResult::text(params["x"].to_string()))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _params: serde_json::Value,
            _on_update: Option<OnUpdate<'_>>,
        ) -> Result<ToolResult> {
            Err(TetherError::new(
                tether_types::error::ErrorCode::ToolExecutionFailed,
                "exploded",
            ))
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool)).unwrap();
        reg.register(Arc::new(FailingTool)).unwrap();
        reg
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = registry();
        let err = reg.register(Arc::new(EchoTool)).unwrap_err();
        assert_eq!(err.code, tether_types::error::ErrorCode::AlreadyExists);
    }

    #[test]
    fn definitions_sorted_by_name() {
        let defs = registry().definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "boom");
        assert_eq!(defs[1].name, "echo");
    }

    #[tokio::test]
    async fn execute_success() {
        let reg = registry();
        let result = reg
            .execute(
                "echo",
                &ToolContext::detached(),
                serde_json::json!({"x": 1}),
                None,
            )
            .await;
        assert!(!result.is_error());
        assert_eq!(result.text_content(), "1");
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_synthetic_error() {
        let reg = registry();
        let result = reg
            .execute("nope", &ToolContext::detached(), serde_json::json!({}), None)
            .await;
        assert!(result.is_error());
        assert!(result.text_content().contains("unknown tool: nope"));
    }

    #[tokio::test]
    async fn execute_missing_required_param() {
        let reg = registry();
        let result = reg
            .execute("echo", &ToolContext::detached(), serde_json::json!({}), None)
            .await;
        assert!(result.is_error());
        assert!(result.error.as_deref().unwrap().contains("x"));
    }

    #[tokio::test]
    async fn execute_tool_error_becomes_result() {
        let reg = registry();
        let result = reg
            .execute("boom", &ToolContext::detached(), serde_json::json!({}), None)
            .await;
        assert!(result.is_error());
        assert!(result.error.as_deref().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn on_update_receives_partials() {
        let reg = registry();
        let updates = std::sync::Mutex::new(Vec::new());
        let on_update = |partial: ToolResult| {
            updates.lock().unwrap().push(partial.text_content());
        };

        let result = reg
            .execute(
                "echo",
                &ToolContext::detached(),
                serde_json::json!({"x": 2}),
                Some(&on_update),
            )
            .await;

        assert_eq!(result.text_content(), "2");
        assert_eq!(*updates.lock().unwrap(), vec!["working"]);
    }

    #[test]
    fn check_required_without_required_block() {
        let schema = serde_json::json!({"type": "object"});
        assert!(check_required(&schema, &serde_json::json!({})).is_ok());
    }

    #[test]
    fn failed_result_shape() {
        let result = ToolResult::failed("no network");
        assert!(result.is_error());
        assert_eq!(result.text_content(), "Error: no network");
    }
}
