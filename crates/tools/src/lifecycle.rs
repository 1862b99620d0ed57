use async_trait::async_trait;
use pagehost_core::{process, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{require_object, Tool, ToolContext, ToolSchema};

/// Ends the browser itself, not just this host's connection to it.
pub struct CloseTool;

#[async_trait]
impl Tool for CloseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "close",
            description: "Close browser (stops the browser process)",
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)
    }

    fn timeout_ms(&self) -> u64 {
        10_000
    }

    async fn execute(&self, ctx: ToolContext, _params: Value) -> Result<Value> {
        let registry = ctx.session.registry();
        let Some(record) = registry.load() else {
            return Ok(json!({ "status": "not_running" }));
        };

        if let Err(e) = ctx.session.close_browser().await {
            debug!(error = %e, "Graceful close unavailable, falling back to signal");
        }
        if process::is_alive(record.pid) {
            info!(pid = record.pid, "Terminating browser host");
            process::terminate(record.pid);
        }
        registry.remove();

        Ok(json!({ "status": "closed" }))
    }
}
