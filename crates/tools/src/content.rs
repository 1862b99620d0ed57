//! Reading from the page: text, HTML and arbitrary script results.

use async_trait::async_trait;
use pagehost_core::{Error, Result};
use serde_json::{json, Value};

use crate::{optional_bool, require_object, require_str, Tool, ToolContext, ToolSchema};

/// Trimmed texts with empty entries dropped.
pub fn clean_texts(texts: Vec<String>) -> Vec<String> {
    texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub struct GetTextTool;

#[async_trait]
impl Tool for GetTextTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_text",
            description: "Get text content from element",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" },
                    "all": { "type": "boolean", "description": "Get text from all matching elements" }
                },
                "required": ["selector"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        optional_bool(params, &["all"])?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = require_str(&params, "selector")?;
        let page = ctx.session.require_page().await?;

        if optional_bool(&params, &["all"])?.unwrap_or(false) {
            let texts = clean_texts(page.text_contents(selector).await?);
            return Ok(json!({ "texts": texts }));
        }

        let text = page
            .text_content(selector)
            .await?
            .ok_or_else(|| Error::Tool(format!("Element not found: {}", selector)))?;
        Ok(json!({ "text": text.trim() }))
    }
}

pub struct GetHtmlTool;

#[async_trait]
impl Tool for GetHtmlTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_html",
            description: "Get HTML from element",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" },
                    "outer": { "type": "boolean", "description": "Include outer element HTML" }
                },
                "required": ["selector"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        optional_bool(params, &["outer"])?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = require_str(&params, "selector")?;
        let outer = optional_bool(&params, &["outer"])?.unwrap_or(false);
        let page = ctx.session.require_page().await?;

        let html = page
            .html(selector, outer)
            .await?
            .ok_or_else(|| Error::Tool(format!("Element not found: {}", selector)))?;
        Ok(json!({ "html": html }))
    }
}

pub struct EvaluateTool;

#[async_trait]
impl Tool for EvaluateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "evaluate",
            description: "Run JavaScript in page context",
            parameters: json!({
                "type": "object",
                "properties": {
                    "script": { "type": "string", "description": "JavaScript to evaluate" }
                },
                "required": ["script"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "script")?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        10_000
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let script = require_str(&params, "script")?;
        let page = ctx.session.require_page().await?;
        let result = page.evaluate(script).await?;
        Ok(json!({ "result": result }))
    }
}
