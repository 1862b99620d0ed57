pub mod browser;
pub mod capture;
pub mod content;
pub mod interaction;
pub mod lifecycle;
pub mod navigation;
pub mod registry;
pub mod selector;
pub mod timeout;

use async_trait::async_trait;
use pagehost_core::config::BrowserConfig;
use pagehost_core::{Config, Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use browser::BrowsingSession;
pub use registry::ToolRegistry;

/// Used when a tool does not declare its own limit.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5_000;

/// Truncate a string to at most `max_chars` characters, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Starts a detached browser host when none is reachable. Implemented by the
/// binary, which knows how to re-launch itself.
pub trait LaunchHandle: Send + Sync {
    /// Spawn the launcher and return its pid without waiting for the browser.
    fn spawn_detached(&self, config: &BrowserConfig) -> Result<u32>;
}

#[derive(Clone)]
pub struct ToolContext {
    pub session: Arc<BrowsingSession>,
    pub config: Config,
    /// Directory of the shell that issued the command.
    pub caller_cwd: PathBuf,
}

impl ToolContext {
    /// Resolve a user-supplied path against the caller's directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.caller_cwd.join(p)
        }
    }
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    /// Upper bound for one execution, in milliseconds.
    fn timeout_ms(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_MS
    }
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}

/// First present, non-null value among `names` (snake_case name plus aliases).
pub fn param<'a>(params: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| params.get(*n))
        .find(|v| !v.is_null())
}

pub fn require_str<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    match params.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(Error::Validation(format!("Parameter '{}' must be a string", name))),
        None => Err(Error::Validation(format!("Missing required parameter: {}", name))),
    }
}

pub fn optional_str<'a>(params: &'a Value, names: &[&str]) -> Result<Option<&'a str>> {
    match param(params, names) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::Validation(format!("Parameter '{}' must be a string", names[0]))),
    }
}

pub fn optional_bool(params: &Value, names: &[&str]) -> Result<Option<bool>> {
    match param(params, names) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::Validation(format!("Parameter '{}' must be a boolean", names[0]))),
    }
}

/// Optional string restricted to `allowed`.
pub fn optional_enum<'a>(params: &'a Value, names: &[&str], allowed: &[&str]) -> Result<Option<&'a str>> {
    match optional_str(params, names)? {
        Some(v) if !allowed.contains(&v) => Err(Error::Validation(format!(
            "Parameter '{}' must be one of: {}",
            names[0],
            allowed.join(", ")
        ))),
        other => Ok(other),
    }
}

/// Params must be an object (or absent).
pub fn require_object(params: &Value) -> Result<()> {
    if params.is_object() || params.is_null() {
        Ok(())
    } else {
        Err(Error::Validation("Params must be an object".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_truncate_char_boundary() {
        assert_eq!(safe_truncate("hello", 10), "hello");
        assert_eq!(safe_truncate("hello", 3), "hel");
        assert_eq!(safe_truncate("héllo", 2), "hé");
    }

    #[test]
    fn test_param_aliases() {
        let p = json!({"fullPage": true, "wait_until": null});
        assert_eq!(optional_bool(&p, &["full_page", "fullPage"]).unwrap(), Some(true));
        assert_eq!(optional_str(&p, &["wait_until", "waitUntil"]).unwrap(), None);
    }

    #[test]
    fn test_type_errors_are_validation_errors() {
        let p = json!({"selector": 3, "all": "yes"});
        assert!(matches!(require_str(&p, "selector"), Err(Error::Validation(_))));
        assert!(matches!(require_str(&p, "missing"), Err(Error::Validation(_))));
        assert!(matches!(optional_bool(&p, &["all"]), Err(Error::Validation(_))));
        assert!(require_object(&json!([1])).is_err());
        assert!(require_object(&json!({})).is_ok());
    }

    #[test]
    fn test_optional_enum() {
        let p = json!({"state": "gone"});
        let err = optional_enum(&p, &["state"], &["visible", "hidden"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Parameter 'state' must be one of: visible, hidden"
        );
        assert_eq!(
            optional_enum(&json!({}), &["state"], &["visible"]).unwrap(),
            None
        );
    }
}
