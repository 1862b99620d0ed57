use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pagehost_core::{Error, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::capture::{PdfTool, ScreenshotTool, SnapshotTool};
use crate::content::{EvaluateTool, GetHtmlTool, GetTextTool};
use crate::interaction::{ClickTool, FillTool, SelectTool, WaitTool};
use crate::lifecycle::CloseTool;
use crate::navigation::NavigateTool;
use crate::{Tool, ToolContext};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        // Navigation
        registry.register(Arc::new(NavigateTool));

        // Interaction
        registry.register(Arc::new(ClickTool));
        registry.register(Arc::new(FillTool));
        registry.register(Arc::new(SelectTool));
        registry.register(Arc::new(WaitTool));

        // Capture
        registry.register(Arc::new(SnapshotTool));
        registry.register(Arc::new(ScreenshotTool));
        registry.register(Arc::new(PdfTool));

        // Content
        registry.register(Arc::new(GetTextTool));
        registry.register(Arc::new(GetHtmlTool));
        registry.register(Arc::new(EvaluateTool));

        // Lifecycle
        registry.register(Arc::new(CloseTool));

        registry
    }

    /// Names are unique; a later registration replaces an earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, timeout_ms = tool.timeout_ms(), "Registering tool");
        if self.tools.insert(schema.name.to_string(), tool).is_some() {
            warn!(name = schema.name, "Tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                (schema.name.to_string(), schema.description.to_string())
            })
            .collect();
        entries.sort();
        entries
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Validate, then run the handler against the tool's time limit.
///
/// A handler that loses the race is not cancelled: it runs on in its own task
/// and its eventual result is discarded.
pub async fn execute_tool(tool: Arc<dyn Tool>, ctx: ToolContext, params: Value) -> Result<Value> {
    let name = tool.schema().name;

    if let Err(e) = tool.validate(&params) {
        warn!(tool = name, error = %e, "Tool validation failed");
        return Err(e);
    }

    let timeout_ms = tool.timeout_ms();
    debug!(tool = name, timeout_ms, "Executing tool");
    let handle = tokio::spawn({
        let tool = tool.clone();
        async move { tool.execute(ctx, params).await }
    });

    match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            warn!(tool = name, error = %join_err, "Tool handler panicked");
            Err(Error::Tool(format!("Tool '{}' panicked", name)))
        }
        Err(_) => {
            warn!(tool = name, timeout_ms, "Tool timed out, handler left running");
            Err(Error::timeout(timeout_ms, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrowsingSession, ToolSchema};
    use async_trait::async_trait;
    use pagehost_core::{Config, Paths};
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.list().is_empty());
        assert!(reg.get("navigate").is_none());
    }

    #[test]
    fn test_registry_with_defaults_has_catalogue() {
        let reg = ToolRegistry::with_defaults();
        let names: Vec<String> = reg.list().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec![
                "click", "close", "evaluate", "fill", "get_html", "get_text", "navigate", "pdf",
                "screenshot", "select", "snapshot", "wait",
            ]
        );
        let list = reg.list();
        assert_eq!(list.len(), 12);
        assert!(list.iter().all(|(_, desc)| !desc.is_empty()));
    }

    #[test]
    fn test_catalogue_timeouts() {
        let reg = ToolRegistry::with_defaults();
        let timeout = |n: &str| reg.get(n).unwrap().timeout_ms();
        assert_eq!(timeout("navigate"), 60_000);
        assert_eq!(timeout("wait"), 30_000);
        assert_eq!(timeout("click"), 5_000);
        assert_eq!(timeout("fill"), 5_000);
        assert_eq!(timeout("get_text"), 5_000);
        assert_eq!(timeout("snapshot"), 10_000);
        assert_eq!(timeout("close"), 10_000);
    }

    enum Behavior {
        Echo,
        Fail,
        Hang,
        Panic,
    }

    struct MockTool(Behavior);

    #[async_trait]
    impl Tool for MockTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "mock",
                description: "Test tool",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, params: &Value) -> Result<()> {
            crate::require_str(params, "input").map(|_| ())
        }

        fn timeout_ms(&self) -> u64 {
            250
        }

        async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
            match self.0 {
                Behavior::Echo => Ok(json!({ "echo": params["input"] })),
                Behavior::Fail => Err(Error::Tool("Element not found: #nope".into())),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("boom"),
            }
        }
    }

    fn ctx() -> ToolContext {
        let paths = Paths::with_dirs(
            std::env::temp_dir().join("pagehost-registry-test"),
            std::env::temp_dir().join("pagehost-registry-test-run"),
        );
        let config = Config::default();
        ToolContext {
            session: Arc::new(BrowsingSession::new(config.clone(), &paths, None)),
            config,
            caller_cwd: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = execute_tool(Arc::new(MockTool(Behavior::Echo)), ctx(), json!({"input": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        // The hanging handler would time out if it were invoked.
        let err = execute_tool(Arc::new(MockTool(Behavior::Hang)), ctx(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_handler_error_keeps_message() {
        let err = execute_tool(Arc::new(MockTool(Behavior::Fail)), ctx(), json!({"input": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Element not found: #nope");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_handler_times_out() {
        let start = tokio::time::Instant::now();
        let err = execute_tool(Arc::new(MockTool(Behavior::Hang)), ctx(), json!({"input": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Timeout after 250ms: mock");
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let err = execute_tool(Arc::new(MockTool(Behavior::Panic)), ctx(), json!({"input": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool 'mock' panicked");
    }
}
