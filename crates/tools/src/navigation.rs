use async_trait::async_trait;
use pagehost_core::Result;
use serde_json::{json, Value};

use crate::browser::page::{WaitUntil, NAVIGATION_TIMEOUT_MS};
use crate::timeout::wait_for_completion;
use crate::{optional_enum, require_object, require_str, Tool, ToolContext, ToolSchema};

const WAIT_UNTIL: &[&str] = &["load", "domcontentloaded", "networkidle"];
const WAIT_UNTIL_KEYS: &[&str] = &["wait_until", "waitUntil"];

/// Go to a URL in the session page.
pub struct NavigateTool;

#[async_trait]
impl Tool for NavigateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "navigate",
            description: "Navigate to URL",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL to navigate to"
                    },
                    "wait_until": {
                        "type": "string",
                        "enum": WAIT_UNTIL,
                        "description": "When to consider navigation complete (default: domcontentloaded)"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "url")?;
        optional_enum(params, WAIT_UNTIL_KEYS, WAIT_UNTIL)?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        NAVIGATION_TIMEOUT_MS
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = require_str(&params, "url")?;
        let wait_until = optional_enum(&params, WAIT_UNTIL_KEYS, WAIT_UNTIL)?
            .and_then(WaitUntil::parse)
            .unwrap_or(WaitUntil::DomContentLoaded);

        // A blank page is fine here: this is how one gets loaded.
        let page = ctx.session.page().await?;
        wait_for_completion(&page, &ctx.config.timing, page.goto(url, wait_until)).await?;

        let title = page.title().await?;
        Ok(json!({
            "url": page.url().await?,
            "title": title
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_schema() {
        let schema = NavigateTool.schema();
        assert_eq!(schema.name, "navigate");
        assert_eq!(schema.parameters["required"], json!(["url"]));
        assert_eq!(NavigateTool.timeout_ms(), 60_000);
    }

    #[test]
    fn test_navigate_validate() {
        let tool = NavigateTool;
        assert!(tool.validate(&json!({"url": "https://example.com"})).is_ok());
        assert!(tool
            .validate(&json!({"url": "https://example.com", "waitUntil": "networkidle"}))
            .is_ok());
        assert!(tool.validate(&json!({})).is_err());
        assert!(tool.validate(&json!({"url": 42})).is_err());
        assert!(tool
            .validate(&json!({"url": "https://example.com", "wait_until": "idle"}))
            .is_err());
    }
}
