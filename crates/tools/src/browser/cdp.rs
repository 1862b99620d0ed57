//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One connection is made to the browser-level endpoint. Page targets are driven
//! through flattened sessions: every command may carry a `sessionId`, and events
//! are delivered with the session they originated from.

use pagehost_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 512;

/// An event pushed by the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

struct Listener {
    methods: Vec<String>,
    /// `None` receives events from every session, including the browser itself.
    session_id: Option<String>,
    tx: mpsc::Sender<CdpEvent>,
}

impl Listener {
    fn wants(&self, method: &str, session_id: Option<&str>) -> bool {
        if !self.methods.iter().any(|m| m == method) {
            return false;
        }
        match self.session_id.as_deref() {
            Some(wanted) => session_id == Some(wanted),
            None => true,
        }
    }
}

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    endpoint: String,
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    listeners: Arc<Mutex<Vec<Listener>>>,
    closed: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a browser-level CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Transport(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let listeners: Arc<Mutex<Vec<Listener>>> = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_listeners = listeners.clone();
        let reader_closed = closed.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            dispatch(val, &reader_pending, &reader_listeners).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err(Error::Transport("CDP connection closed".into())));
            }
            // Dropping the senders ends every subscriber's stream.
            reader_listeners.lock().await.clear();
        });

        Ok(Self {
            endpoint: ws_url.to_string(),
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            listeners,
            closed,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a browser-level command.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send(method, params, None).await
    }

    /// Send a command, optionally routed to an attached target session.
    pub async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Transport("CDP connection closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            msg["sessionId"] = json!(sid);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(format!("Failed to send CDP command: {}", e)));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(Error::Transport("CDP response channel closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Cdp(format!("'{}' timed out after 30s", method)))
            }
        }
    }

    /// Subscribe to one or more events, optionally scoped to one target session.
    pub async fn subscribe(&self, methods: &[&str], session_id: Option<&str>) -> mpsc::Receiver<CdpEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut listeners = self.listeners.lock().await;
        listeners.retain(|l| !l.tx.is_closed());
        if !self.is_closed() {
            listeners.push(Listener {
                methods: methods.iter().map(|m| m.to_string()).collect(),
                session_id: session_id.map(str::to_string),
                tx,
            });
        }
        rx
    }

    /// All targets currently known to the browser.
    pub async fn get_targets(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str, browser_context_id: Option<&str>) -> Result<String> {
        let mut params = json!({ "url": url });
        if let Some(ctx) = browser_context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.send_command("Target.createTarget", params).await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("No targetId returned from createTarget".into()))
    }

    /// Attach with `flatten` and return the session id.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<String> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("No sessionId returned from attachToTarget".into()))
    }

    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self
            .send_command("Target.createBrowserContext", json!({}))
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("No browserContextId returned".into()))
    }

    pub async fn dispose_browser_context(&self, browser_context_id: &str) -> Result<()> {
        self.send_command(
            "Target.disposeBrowserContext",
            json!({ "browserContextId": browser_context_id }),
        )
        .await?;
        Ok(())
    }

    /// Set cookies in a browser context.
    pub async fn set_cookies(&self, cookies: Vec<Value>, browser_context_id: Option<&str>) -> Result<()> {
        let mut params = json!({ "cookies": cookies });
        if let Some(ctx) = browser_context_id {
            params["browserContextId"] = json!(ctx);
        }
        self.send_command("Storage.setCookies", params).await?;
        Ok(())
    }

    /// Ask the browser process to exit.
    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

async fn dispatch(val: Value, pending: &PendingMap, listeners: &Mutex<Vec<Listener>>) {
    if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
        let Some(tx) = pending.lock().await.remove(&id) else {
            return;
        };
        let outcome = match val.get("error") {
            Some(err) => Err(Error::Cdp(
                err.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            )),
            None => Ok(val.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
        let session_id = val.get("sessionId").and_then(|v| v.as_str());
        let mut listeners = listeners.lock().await;
        listeners.retain(|l| !l.tx.is_closed());
        for listener in listeners.iter().filter(|l| l.wants(method, session_id)) {
            let event = CdpEvent {
                method: method.to_string(),
                session_id: session_id.map(str::to_string),
                params: val.get("params").cloned().unwrap_or(Value::Null),
            };
            if listener.tx.try_send(event).is_err() {
                debug!(method, "Dropping CDP event for a full listener");
            }
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
