//! The CLI side: spawn a host process, wait until it is ready, and talk to it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pagehost_core::config::HostConfig;
use pagehost_core::{Error, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, CALLER_CWD_PARAM, READY_LINE};

/// Host stderr lines kept for a failed start.
const STDERR_CAPTURE_LINES: usize = 20;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

pub struct HostClient {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    pending: PendingMap,
    request_timeout: Duration,
    shut_down: AtomicBool,
}

impl HostClient {
    /// Spawn the host and wait for its ready line on stderr.
    pub async fn start(mut cmd: Command, config: &HostConfig) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::HostUnavailable(format!("failed to start host: {}", e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("host has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("host has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Transport("host has no stderr".into()))?;

        let mut stderr = BufReader::new(stderr).lines();
        let mut captured: Vec<String> = Vec::new();
        let ready = async {
            while let Some(line) = stderr.next_line().await? {
                if line.trim() == READY_LINE {
                    return Ok::<(), Error>(());
                }
                debug!(target: "pagehost::host", "{}", line);
                if captured.len() == STDERR_CAPTURE_LINES {
                    captured.remove(0);
                }
                captured.push(line);
            }
            let mut message = "host exited before becoming ready".to_string();
            if !captured.is_empty() {
                message.push_str(": ");
                message.push_str(&captured.join("\n"));
            }
            Err(Error::HostUnavailable(message))
        };
        match tokio::time::timeout(Duration::from_millis(config.ready_timeout_ms), ready).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let _ = child.kill().await;
                return Err(Error::timeout(config.ready_timeout_ms, "waiting for host to start"));
            }
        }
        debug!("Host ready");

        tokio::spawn(forward_stderr(stderr.into_inner()));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(reader_task(stdout, pending.clone()));

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            pending,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Send one request and wait for the response with the same id.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        line.push('\n');
        debug!(id, method, "→ host");

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard
                .as_mut()
                .ok_or_else(|| Error::Transport("host connection closed".into()))?;
            self.pending.lock().await.insert(id, tx);
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = written.await {
                self.pending.lock().await.remove(&id);
                return Err(Error::Transport(format!("write to host: {}", e)));
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport("host closed the connection".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::timeout(self.request_timeout.as_millis() as u64, method))
            }
        }
    }

    /// Call a tool, passing along the directory this process runs in.
    pub async fn call_tool(&self, name: &str, params: Value) -> Result<Value> {
        let mut params = match params {
            Value::Null => json!({}),
            other => other,
        };
        if let (Some(obj), Ok(cwd)) = (params.as_object_mut(), std::env::current_dir()) {
            obj.insert(CALLER_CWD_PARAM.to_string(), json!(cwd.display().to_string()));
        }
        self.request(name, Some(params)).await
    }

    pub async fn list_tools(&self) -> Result<Vec<(String, String)>> {
        let result = self.request("list_tools", None).await?;
        Ok(result
            .as_array()
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| {
                        Some((
                            t.get("name")?.as_str()?.to_string(),
                            t.get("description").and_then(|d| d.as_str()).unwrap_or_default().to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Ask the host to exit and reap it. Later calls do nothing.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let asked = self.request("shutdown", None).await;
        if let Err(e) = &asked {
            debug!(error = %e, "Shutdown request failed");
        }
        // Closing stdin is the host's other exit path.
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Host exited"),
            Ok(Err(e)) => warn!(error = %e, "Waiting for host failed"),
            Err(_) => {
                warn!("Host did not exit, killing it");
                let _ = child.kill().await;
            }
        }
        asked.map(|_| ())
    }
}

async fn reader_task(stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<JsonRpcResponse>(&line) {
                Ok(resp) => {
                    let Some(id) = resp.id.as_u64() else {
                        warn!(id = %resp.id, "Response without a request id");
                        continue;
                    };
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(resp.into_result());
                    }
                }
                Err(e) => warn!(error = %e, "Unparsable host response"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Reading from host failed");
                break;
            }
        }
    }
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(Error::Transport("host exited".into())));
    }
}

async fn forward_stderr(stderr: BufReader<ChildStderr>) {
    let mut lines = stderr.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "pagehost::host", "{}", line);
    }
}
