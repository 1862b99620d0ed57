//! Line-delimited JSON-RPC 2.0 framing between the CLI and the host process.

use std::sync::Arc;

use pagehost_core::Error;
use pagehost_tools::{Tool, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const TOOL_ERROR: i64 = -32000;

/// Internal parameter carrying the invoking shell's working directory.
pub const CALLER_CWD_PARAM: &str = "_callerCwd";

/// Written to stderr once the host reads requests.
pub const READY_LINE: &str = "[pagehost-host] Ready";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Value::from(id),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn from_error(id: Value, err: &Error) -> Self {
        Self::failure(id, error_code(err), err.rpc_message())
    }

    /// Collapse into a `Result`, turning an error object into `Error::Rpc`.
    pub fn into_result(self) -> pagehost_core::Result<Value> {
        match self.error {
            Some(e) => Err(Error::Rpc {
                code: e.code,
                message: e.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

pub fn error_code(err: &Error) -> i64 {
    match err {
        Error::Validation(_) => INVALID_PARAMS,
        Error::Rpc { code, .. } => *code,
        _ => TOOL_ERROR,
    }
}

/// Every method the host answers, resolved once per request.
#[derive(Clone)]
pub enum HostMethod {
    ListTools,
    Shutdown,
    Tool(Arc<dyn Tool>),
}

impl HostMethod {
    pub fn resolve(method: &str, registry: &ToolRegistry) -> Option<Self> {
        match method {
            "list_tools" => Some(Self::ListTools),
            "shutdown" => Some(Self::Shutdown),
            name => registry.get(name).cloned().map(Self::Tool),
        }
    }
}

impl std::fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListTools => f.write_str("ListTools"),
            Self::Shutdown => f.write_str("Shutdown"),
            Self::Tool(tool) => write!(f, "Tool({})", tool.schema().name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_serialization_is_exclusive() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(1), json!({"ok": true}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}));

        let err = serde_json::to_value(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error"))
            .unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );
    }

    #[test]
    fn test_request_accepts_string_ids() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a-1","method":"navigate","params":{"url":"x"}}"#)
                .unwrap();
        assert_eq!(req.id, json!("a-1"));
        assert_eq!(req.params, Some(json!({"url": "x"})));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(error_code(&Error::Validation("x".into())), INVALID_PARAMS);
        assert_eq!(error_code(&Error::Tool("x".into())), TOOL_ERROR);
        assert_eq!(error_code(&Error::timeout(5000, "fill")), TOOL_ERROR);
        assert_eq!(
            JsonRpcResponse::from_error(json!(3), &Error::timeout(5000, "fill")).error,
            Some(JsonRpcError {
                code: TOOL_ERROR,
                message: "Timeout after 5000ms: fill".into()
            })
        );
    }

    #[test]
    fn test_into_result() {
        let err = JsonRpcResponse::failure(json!(1), TOOL_ERROR, "PDF export requires headless mode")
            .into_result()
            .unwrap_err();
        assert_eq!(err.rpc_message(), "PDF export requires headless mode");
        assert_eq!(
            JsonRpcResponse::success(json!(1), json!([1])).into_result().unwrap(),
            json!([1])
        );
    }

    #[test]
    fn test_resolve_methods() {
        let registry = ToolRegistry::with_defaults();
        assert!(matches!(HostMethod::resolve("list_tools", &registry), Some(HostMethod::ListTools)));
        assert!(matches!(HostMethod::resolve("shutdown", &registry), Some(HostMethod::Shutdown)));
        assert!(matches!(HostMethod::resolve("click", &registry), Some(HostMethod::Tool(_))));
        assert!(HostMethod::resolve("frobnicate", &registry).is_none());
    }
}
