use pagehost_core::Config;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::Commands;

/// The tool and params a subcommand maps to, or `None` for local commands.
pub fn tool_call(command: &Commands) -> Option<(&'static str, Value)> {
    let mut params = Map::new();
    let mut set = |key: &str, value: Value| {
        params.insert(key.to_string(), value);
    };

    let name = match command {
        Commands::Navigate { url, wait_until } => {
            set("url", json!(url));
            if let Some(w) = wait_until {
                set("wait_until", json!(w));
            }
            "navigate"
        }
        Commands::Click {
            selector,
            force,
            double,
        } => {
            set("selector", json!(selector));
            if *force {
                set("force", json!(true));
            }
            if *double {
                set("double", json!(true));
            }
            "click"
        }
        Commands::Fill { selector, value } => {
            set("selector", json!(selector));
            set("value", json!(value.join(" ")));
            "fill"
        }
        Commands::Select { selector, value, by } => {
            set("selector", json!(selector));
            set("value", json!(value));
            if let Some(by) = by {
                set("by", json!(by));
            }
            "select"
        }
        Commands::Wait { selector, state } => {
            set("selector", json!(selector));
            if let Some(state) = state {
                set("state", json!(state));
            }
            "wait"
        }
        Commands::Snapshot { selector, file } => {
            if let Some(s) = selector {
                set("selector", json!(s));
            }
            if let Some(f) = file {
                set("file", json!(f));
            }
            "snapshot"
        }
        Commands::GetText { selector, all } => {
            set("selector", json!(selector));
            if *all {
                set("all", json!(true));
            }
            "get_text"
        }
        Commands::GetHtml { selector, outer } => {
            set("selector", json!(selector));
            if *outer {
                set("outer", json!(true));
            }
            "get_html"
        }
        Commands::Screenshot {
            path,
            full_page,
            selector,
            image_type,
        } => {
            if let Some(p) = path {
                set("path", json!(p));
            }
            if *full_page {
                set("full_page", json!(true));
            }
            if let Some(s) = selector {
                set("selector", json!(s));
            }
            if let Some(t) = image_type {
                set("type", json!(t));
            }
            "screenshot"
        }
        Commands::Pdf {
            path,
            format,
            landscape,
        } => {
            if let Some(p) = path {
                set("path", json!(p));
            }
            if let Some(f) = format {
                set("format", json!(f));
            }
            if *landscape {
                set("landscape", json!(true));
            }
            "pdf"
        }
        Commands::Evaluate { script } => {
            set("script", json!(script.join(" ")));
            "evaluate"
        }
        Commands::Close => "close",
        _ => return None,
    };
    Some((name, Value::Object(params)))
}

/// Snapshot text is printed as is, everything else as pretty JSON.
pub fn render_result(value: &Value) -> String {
    if let Some(snapshot) = value.get("snapshot").and_then(|s| s.as_str()) {
        return snapshot.to_string();
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// One request against a fresh host. The host is always shut down.
pub async fn run(config: &Config, verbose: bool, tool: &str, params: Value) -> anyhow::Result<i32> {
    let client = super::start_host(&config.host, verbose).await?;
    let result = client.call_tool(tool, params).await;
    if let Err(e) = client.shutdown().await {
        debug!(error = %e, "Host shutdown failed");
    }

    println!("{}", render_result(&result?));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;

    fn mapped(args: &[&str]) -> Option<(&'static str, Value)> {
        let cli = Cli::try_parse_from(std::iter::once("pagehost").chain(args.iter().copied())).unwrap();
        tool_call(&cli.command)
    }

    #[test]
    fn test_positionals_map_to_params() {
        assert_eq!(
            mapped(&["navigate", "https://example.com"]),
            Some(("navigate", json!({"url": "https://example.com"})))
        );
        assert_eq!(
            mapped(&["fill", "#q", "hello", "world"]),
            Some(("fill", json!({"selector": "#q", "value": "hello world"})))
        );
        assert_eq!(
            mapped(&["evaluate", "document.title", "+", "'!'"]),
            Some(("evaluate", json!({"script": "document.title + '!'"})))
        );
        assert_eq!(
            mapped(&["click", "button \"Submit\"", "--double"]),
            Some(("click", json!({"selector": "button \"Submit\"", "double": true})))
        );
        assert_eq!(mapped(&["snapshot"]), Some(("snapshot", json!({}))));
        assert_eq!(
            mapped(&["screenshot", "shot.png", "--full-page", "--type", "jpeg"]),
            Some(("screenshot", json!({"path": "shot.png", "full_page": true, "type": "jpeg"})))
        );
        assert_eq!(
            mapped(&["get_html", "main", "--outer"]),
            Some(("get_html", json!({"selector": "main", "outer": true})))
        );
        assert_eq!(mapped(&["close"]), Some(("close", json!({}))));
    }

    #[test]
    fn test_local_commands_are_not_tools() {
        assert!(mapped(&["tools"]).is_none());
        assert!(mapped(&["launch", "--fg"]).is_none());
        assert!(mapped(&["record-stop"]).is_none());
    }

    #[test]
    fn test_render_result() {
        assert_eq!(render_result(&json!({"snapshot": "- heading \"Hi\""})), "- heading \"Hi\"");
        assert_eq!(
            render_result(&json!({"status": "closed"})),
            "{\n  \"status\": \"closed\"\n}"
        );
    }
}
