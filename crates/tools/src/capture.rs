//! Snapshot, screenshot and PDF capture.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagehost_core::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::browser::page::{ImageFormat, PaperFormat, PdfOptions, ScreenshotOptions};
use crate::selector::normalize;
use crate::{
    optional_bool, optional_enum, optional_str, require_object, Tool, ToolContext, ToolSchema,
};

const IMAGE_TYPES: &[&str] = &["png", "jpeg"];
const PAPER_FORMATS: &[&str] = &["A4", "Letter"];
const FULL_PAGE_KEYS: &[&str] = &["full_page", "fullPage"];

/// `<prefix>-<UTC timestamp>.<ext>`, safe for any filesystem.
pub fn timestamped_name(prefix: &str, ext: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}.{}", prefix, at.format("%Y-%m-%dT%H-%M-%S"), ext)
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    info!(path = %path.display(), bytes = bytes.len(), "Capture written");
    Ok(())
}

pub struct SnapshotTool;

#[async_trait]
impl Tool for SnapshotTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "snapshot",
            description: "Get aria snapshot of page (clean accessibility tree)",
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "Selector to snapshot (default: body)"
                    },
                    "file": {
                        "type": "string",
                        "description": "Save to file instead of returning"
                    }
                }
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        optional_str(params, &["selector"])?;
        optional_str(params, &["file"])?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        10_000
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let selector = normalize(optional_str(&params, &["selector"])?.unwrap_or("body"));
        let page = ctx.session.require_page().await?;
        let snapshot = page.aria_snapshot(&selector).await?;

        match optional_str(&params, &["file"])? {
            Some(file) => {
                let path = ctx.resolve_path(file);
                write_output(&path, snapshot.as_bytes()).await?;
                Ok(json!({ "saved": path.display().to_string() }))
            }
            None => Ok(json!({ "snapshot": snapshot })),
        }
    }
}

pub struct ScreenshotTool;

#[async_trait]
impl Tool for ScreenshotTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "screenshot",
            description: "Capture screenshot of page",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path (defaults to timestamp)" },
                    "full_page": { "type": "boolean", "description": "Capture full page" },
                    "selector": { "type": "string", "description": "Capture specific element" },
                    "type": {
                        "type": "string",
                        "enum": IMAGE_TYPES,
                        "description": "Image format (default: png)"
                    }
                }
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        optional_str(params, &["path"])?;
        optional_bool(params, FULL_PAGE_KEYS)?;
        optional_str(params, &["selector"])?;
        optional_enum(params, &["type"], IMAGE_TYPES)?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        10_000
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let format = optional_enum(&params, &["type"], IMAGE_TYPES)?
            .and_then(ImageFormat::parse)
            .unwrap_or(ImageFormat::Png);
        let full_page = optional_bool(&params, FULL_PAGE_KEYS)?.unwrap_or(false);
        let selector = optional_str(&params, &["selector"])?.map(str::to_string);
        let path = match optional_str(&params, &["path"])? {
            Some(p) => ctx.resolve_path(p),
            None => ctx.resolve_path(&timestamped_name("screenshot", format.extension(), Utc::now())),
        };

        let page = ctx.session.require_page().await?;
        let options = ScreenshotOptions {
            full_page,
            selector: selector.clone(),
            format,
        };
        let bytes = page.screenshot(&options).await?;
        write_output(&path, &bytes).await?;

        let path = path.display().to_string();
        Ok(match selector {
            Some(selector) => json!({ "path": path, "selector": selector }),
            None => json!({ "path": path, "fullPage": full_page }),
        })
    }
}

pub struct PdfTool;

#[async_trait]
impl Tool for PdfTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "pdf",
            description: "Export page as PDF (requires headless mode)",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path (defaults to timestamp)" },
                    "format": {
                        "type": "string",
                        "enum": PAPER_FORMATS,
                        "description": "Paper format (default: A4)"
                    },
                    "landscape": { "type": "boolean", "description": "Landscape orientation" }
                }
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_object(params)?;
        optional_str(params, &["path"])?;
        optional_enum(params, &["format"], PAPER_FORMATS)?;
        optional_bool(params, &["landscape"])?;
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        30_000
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let format = optional_enum(&params, &["format"], PAPER_FORMATS)?
            .and_then(PaperFormat::parse)
            .unwrap_or(PaperFormat::A4);
        let landscape = optional_bool(&params, &["landscape"])?.unwrap_or(false);
        let path = match optional_str(&params, &["path"])? {
            Some(p) => ctx.resolve_path(p),
            None => ctx.resolve_path(&timestamped_name("page", "pdf", Utc::now())),
        };

        let page = ctx.session.require_page().await?;
        let bytes = page.pdf(&PdfOptions { format, landscape }).await?;
        write_output(&path, &bytes).await?;

        Ok(json!({
            "path": path.display().to_string(),
            "format": format.as_str(),
            "landscape": landscape
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_timestamped_name() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            timestamped_name("screenshot", "png", at),
            "screenshot-2026-03-04T05-06-07.png"
        );
        assert_eq!(timestamped_name("page", "pdf", at), "page-2026-03-04T05-06-07.pdf");
    }

    #[test]
    fn test_validation() {
        assert!(SnapshotTool.validate(&json!({})).is_ok());
        assert!(SnapshotTool.validate(&json!({"file": 1})).is_err());
        assert!(ScreenshotTool.validate(&json!({"fullPage": true, "type": "jpeg"})).is_ok());
        assert!(ScreenshotTool.validate(&json!({"type": "gif"})).is_err());
        assert!(PdfTool.validate(&json!({"format": "Letter", "landscape": true})).is_ok());
        assert!(PdfTool.validate(&json!({"format": "A3"})).is_err());
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(SnapshotTool.timeout_ms(), 10_000);
        assert_eq!(ScreenshotTool.timeout_ms(), 10_000);
        assert_eq!(PdfTool.timeout_ms(), 30_000);
    }

    #[tokio::test]
    async fn test_write_output_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shots/nested/a.png");
        write_output(&path, b"png").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }
}
