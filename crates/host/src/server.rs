//! The host side of the JSON-RPC channel.

use std::path::PathBuf;
use std::sync::Arc;

use pagehost_core::{Config, Result};
use pagehost_tools::registry::execute_tool;
use pagehost_tools::{BrowsingSession, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::protocol::{
    HostMethod, JsonRpcRequest, JsonRpcResponse, CALLER_CWD_PARAM, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};

/// Why `serve` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    Shutdown,
    InputClosed,
}

/// Outcome of one input line.
#[derive(Debug)]
pub enum Reply {
    Respond(JsonRpcResponse),
    /// Respond, then stop reading.
    Shutdown(JsonRpcResponse),
}

pub struct HostServer {
    registry: ToolRegistry,
    session: Arc<BrowsingSession>,
    config: Config,
}

impl HostServer {
    pub fn new(registry: ToolRegistry, session: Arc<BrowsingSession>, config: Config) -> Self {
        Self {
            registry,
            session,
            config,
        }
    }

    pub fn session(&self) -> &Arc<BrowsingSession> {
        &self.session
    }

    /// Handle one line. Blank lines produce nothing.
    pub async fn handle_line(&self, line: &str) -> Option<Reply> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparsable request line");
                return Some(Reply::Respond(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                )));
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(Reply::Respond(JsonRpcResponse::failure(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                )));
            }
        };

        debug!(id = %request.id, method = %request.method, "Request");
        let Some(method) = HostMethod::resolve(&request.method, &self.registry) else {
            return Some(Reply::Respond(JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            )));
        };

        let reply = match method {
            HostMethod::ListTools => {
                let tools: Vec<Value> = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|(name, description)| json!({ "name": name, "description": description }))
                    .collect();
                Reply::Respond(JsonRpcResponse::success(request.id, Value::Array(tools)))
            }
            HostMethod::Shutdown => Reply::Shutdown(JsonRpcResponse::success(request.id, json!({ "ok": true }))),
            HostMethod::Tool(tool) => {
                let params = self.scope_params(request.params).await;
                let ctx = ToolContext {
                    session: self.session.clone(),
                    config: self.config.clone(),
                    caller_cwd: self.session.caller_cwd().await,
                };
                match execute_tool(tool, ctx, params).await {
                    Ok(result) => Reply::Respond(JsonRpcResponse::success(request.id, result)),
                    Err(e) => {
                        debug!(method = %request.method, error = %e, "Tool failed");
                        Reply::Respond(JsonRpcResponse::from_error(request.id, &e))
                    }
                }
            }
        };
        Some(reply)
    }

    /// Remove the caller directory from the params and apply it to the session.
    async fn scope_params(&self, params: Option<Value>) -> Value {
        let mut params = params.unwrap_or_else(|| json!({}));
        if let Some(obj) = params.as_object_mut() {
            if let Some(Value::String(cwd)) = obj.remove(CALLER_CWD_PARAM) {
                self.session.set_caller_cwd(PathBuf::from(cwd)).await;
            }
        }
        params
    }

    /// Answer requests one line at a time until `shutdown` or end of input.
    ///
    /// Tool calls run strictly one after another against the shared session.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<ServeEnd>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            match self.handle_line(&line).await {
                None => continue,
                Some(Reply::Respond(resp)) => write_response(&mut writer, &resp).await?,
                Some(Reply::Shutdown(resp)) => {
                    write_response(&mut writer, &resp).await?;
                    info!("Shutdown requested");
                    self.session.disconnect_rpc().await;
                    return Ok(ServeEnd::Shutdown);
                }
            }
        }
        info!("Input closed");
        Ok(ServeEnd::InputClosed)
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: &JsonRpcResponse) -> Result<()> {
    let mut line = serde_json::to_string(resp)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{INVALID_PARAMS, TOOL_ERROR};
    use async_trait::async_trait;
    use pagehost_core::{Error, Paths};
    use pagehost_tools::{require_str, Tool, ToolSchema};
    use tempfile::TempDir;
    use tokio::io::BufReader;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo",
                description: "Echo params",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, params: &Value) -> Result<()> {
            require_str(params, "text").map(|_| ())
        }

        async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
            Ok(json!({ "params": params, "cwd": ctx.caller_cwd }))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "fail",
                description: "Always fails",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, _params: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _ctx: ToolContext, _params: Value) -> Result<Value> {
            Err(Error::Tool("PDF export requires headless mode".into()))
        }
    }

    fn server(dir: &TempDir) -> HostServer {
        let paths = Paths::with_dirs(dir.path().join("home"), dir.path().join("run"));
        let config = Config::default();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailTool));
        let session = Arc::new(BrowsingSession::new(config.clone(), &paths, None));
        HostServer::new(registry, session, config)
    }

    async fn run(server: &HostServer, input: &str) -> (ServeEnd, Vec<Value>) {
        let mut out = Vec::new();
        let end = server
            .serve(BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        let responses = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (end, responses)
    }

    #[tokio::test]
    async fn test_parse_error_does_not_stop_loop() {
        let dir = TempDir::new().unwrap();
        let input = "this is not json\n\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"list_tools\"}\n";
        let (end, responses) = run(&server(&dir), input).await;

        assert_eq!(end, ServeEnd::InputClosed);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(
            responses[1]["result"],
            json!([
                {"name": "echo", "description": "Echo params"},
                {"name": "fail", "description": "Always fails"}
            ])
        );
    }

    #[tokio::test]
    async fn test_unknown_method_and_invalid_request() {
        let dir = TempDir::new().unwrap();
        let input = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"frobnicate\"}\n{\"id\":7}\n";
        let (_, responses) = run(&server(&dir), input).await;

        assert_eq!(responses[0]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[0]["error"]["message"], "Unknown method: frobnicate");
        assert_eq!(responses[1]["id"], 7);
        assert_eq!(responses[1]["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_tool_errors_are_structured() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"echo\",\"params\":{}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":\"b\",\"method\":\"fail\",\"params\":{}}\n",
        );
        let (_, responses) = run(&server(&dir), input).await;

        assert_eq!(responses[0]["error"]["code"], INVALID_PARAMS);
        assert!(responses[0].get("result").is_none());
        assert_eq!(responses[1]["id"], "b");
        assert_eq!(
            responses[1]["error"],
            json!({"code": TOOL_ERROR, "message": "PDF export requires headless mode"})
        );
    }

    #[tokio::test]
    async fn test_caller_cwd_is_stripped_and_applied() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        let input = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"echo\",\"params\":{\"text\":\"hi\",\"_callerCwd\":\"/work/site\"}}\n";
        let (_, responses) = run(&server, input).await;

        assert_eq!(responses[0]["result"]["params"], json!({"text": "hi"}));
        assert_eq!(responses[0]["result"]["cwd"], "/work/site");
        assert_eq!(server.session().caller_cwd().await, PathBuf::from("/work/site"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_reading() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"shutdown\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"list_tools\"}\n",
        );
        let (end, responses) = run(&server(&dir), input).await;

        assert_eq!(end, ServeEnd::Shutdown);
        assert_eq!(responses, vec![json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}})]);
    }
}
