//! Tools that act on page elements: click, fill, select and wait.

use async_trait::async_trait;
use pagehost_core::Result;
use serde_json::{json, Value};

use crate::browser::page::{ElementState, SelectBy};
use crate::browser::Page;
use crate::selector::normalize;
use crate::timeout::{wait_for_completion, with_timeout};
use crate::{
    optional_bool, optional_enum, require_object, require_str, safe_truncate, Tool, ToolContext,
    ToolSchema,
};

const SELECTOR_HELP: &str = "Selector: CSS, text=, xpath=, or role format (e.g. button \"Submit\")";
const DIALOG_ROLES: &str = r#"[role="dialog"], [role="alertdialog"]"#;
const MENU_ROLES: &str = r#"[role="menu"], [role="listbox"]"#;
/// Overlay checks must not stall the response.
const OVERLAY_CHECK_MS: u64 = 100;
const DISPLAY_VALUE_CHARS: usize = 50;

const STATES: &[&str] = &["visible", "hidden", "attached", "detached"];
const SELECT_BY: &[&str] = &["value", "label", "index"];

/// What a click visibly did, from most to least specific.
pub fn classify_click(
    pages_before: usize,
    pages_after: usize,
    url_before: &str,
    url_after: &str,
    dialog: bool,
    menu: bool,
) -> String {
    if pages_after > pages_before {
        "new tab opened".to_string()
    } else if url_after != url_before {
        format!("navigated to {}", url_after)
    } else if dialog {
        "dialog opened".to_string()
    } else if menu {
        "menu opened".to_string()
    } else {
        "clicked".to_string()
    }
}

/// Shorten long values for display only.
pub fn display_value(value: &str) -> String {
    if value.chars().count() > DISPLAY_VALUE_CHARS {
        format!("{}...", safe_truncate(value, DISPLAY_VALUE_CHARS - 3))
    } else {
        value.to_string()
    }
}

async fn overlay_visible(page: &Page, css: &str) -> bool {
    with_timeout(OVERLAY_CHECK_MS, "overlay check", page.any_visible(css))
        .await
        .unwrap_or(false)
}

pub struct ClickTool;

#[async_trait]
impl Tool for ClickTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "click",
            description: "Click element. Supports CSS, text=, xpath=, or role format like: button \"Submit\"",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": SELECTOR_HELP },
                    "force": { "type": "boolean", "description": "Bypass actionability checks" },
                    "double": { "type": "boolean", "description": "Double click" }
                },
                "required": ["selector"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        optional_bool(params, &["force"])?;
        optional_bool(params, &["double"])?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = normalize(require_str(&params, "selector")?);
        let force = optional_bool(&params, &["force"])?.unwrap_or(false);
        let double = optional_bool(&params, &["double"])?.unwrap_or(false);
        let page = ctx.session.require_page().await?;

        let url_before = page.url().await?;
        let pages_before = page.context_page_count().await?;

        wait_for_completion(&page, &ctx.config.timing, page.click(&selector, double, force)).await?;

        let url_after = page.url().await.unwrap_or_else(|_| url_before.clone());
        let pages_after = page.context_page_count().await.unwrap_or(pages_before);
        let (dialog, menu) = tokio::join!(
            overlay_visible(&page, DIALOG_ROLES),
            overlay_visible(&page, MENU_ROLES)
        );

        let effect = classify_click(pages_before, pages_after, &url_before, &url_after, dialog, menu);
        Ok(json!({ "selector": selector, "effect": effect }))
    }
}

pub struct FillTool;

#[async_trait]
impl Tool for FillTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "fill",
            description: "Fill input field. Supports role format like: textbox \"Email\"",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": SELECTOR_HELP },
                    "value": { "type": "string", "description": "Value to fill" }
                },
                "required": ["selector", "value"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        require_str(params, "value")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = normalize(require_str(&params, "selector")?);
        let value = require_str(&params, "value")?;
        let page = ctx.session.require_page().await?;

        wait_for_completion(&page, &ctx.config.timing, page.fill(&selector, value)).await?;

        Ok(json!({ "filled": selector, "value": display_value(value) }))
    }
}

pub struct SelectTool;

#[async_trait]
impl Tool for SelectTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "select",
            description: "Select dropdown option. Supports role format like: combobox \"Country\"",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": SELECTOR_HELP },
                    "value": { "type": "string", "description": "Value to select" },
                    "by": {
                        "type": "string",
                        "enum": SELECT_BY,
                        "description": "How to match the option (default: value)"
                    }
                },
                "required": ["selector", "value"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        require_str(params, "value")?;
        optional_enum(params, &["by"], SELECT_BY)?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = normalize(require_str(&params, "selector")?);
        let value = require_str(&params, "value")?;
        let by = optional_enum(&params, &["by"], SELECT_BY)?
            .and_then(SelectBy::parse)
            .unwrap_or(SelectBy::Value);
        let page = ctx.session.require_page().await?;

        let values = wait_for_completion(
            &page,
            &ctx.config.timing,
            page.select_option(&selector, by, value),
        )
        .await?;

        Ok(json!({
            "selected": selector,
            "value": value,
            "by": by.as_str(),
            "values": values
        }))
    }
}

pub struct WaitTool;

impl WaitTool {
    const TIMEOUT_MS: u64 = 30_000;
}

#[async_trait]
impl Tool for WaitTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "wait",
            description: "Wait for element. Supports role format like: button \"Submit\"",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": SELECTOR_HELP },
                    "state": {
                        "type": "string",
                        "enum": STATES,
                        "description": "Element state to wait for (default: visible)"
                    }
                },
                "required": ["selector"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        require_str(params, "selector")?;
        optional_enum(params, &["state"], STATES)?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        Self::TIMEOUT_MS
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = normalize(require_str(&params, "selector")?);
        let state = optional_enum(&params, &["state"], STATES)?
            .and_then(ElementState::parse)
            .unwrap_or(ElementState::Visible);
        let page = ctx.session.require_page().await?;

        page.wait_for_selector(&selector, state, Self::TIMEOUT_MS).await?;

        Ok(json!({ "selector": selector, "state": state.as_str() }))
    }
}
