//! Browser session management.
//!
//! One host process owns one `BrowsingSession`: a CDP connection, the browser's
//! default context, and one cached page. The browser itself outlives the session;
//! `disconnect_rpc` only drops the connection while `close_browser` ends Chrome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pagehost_core::{Config, EndpointRegistry, Error, Paths, RecordingStore, Result};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cdp::CdpClient;
use super::launcher::{fetch_ws_endpoint, wait_for_cdp_ready};
use super::page::Page;
use crate::timeout::with_timeout;
use crate::LaunchHandle;

/// Marker in the URL of the page a recording captures.
pub const RECORDING_URL_MARKER: &str = "recording=true";

#[derive(Default)]
struct SessionState {
    caller_cwd: Option<PathBuf>,
    browser: Option<Arc<CdpClient>>,
    context_id: Option<String>,
    context_ready: bool,
    page: Option<Page>,
}

pub struct BrowsingSession {
    config: Config,
    registry: EndpointRegistry,
    recordings: RecordingStore,
    launcher: Option<Arc<dyn LaunchHandle>>,
    state: Mutex<SessionState>,
}

impl BrowsingSession {
    pub fn new(config: Config, paths: &Paths, launcher: Option<Arc<dyn LaunchHandle>>) -> Self {
        Self {
            config,
            registry: EndpointRegistry::from_paths(paths),
            recordings: RecordingStore::from_paths(paths),
            launcher,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Resolve file-relative state (saved cookies) against the caller's directory.
    pub async fn set_caller_cwd(&self, cwd: PathBuf) {
        let mut state = self.state.lock().await;
        if state.caller_cwd.as_ref() != Some(&cwd) {
            debug!(cwd = %cwd.display(), "Caller directory set");
            state.caller_cwd = Some(cwd);
        }
    }

    pub async fn caller_cwd(&self) -> PathBuf {
        let state = self.state.lock().await;
        state
            .caller_cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.browser.as_ref().map(|b| !b.is_closed()).unwrap_or(false)
    }

    /// Connect to the running browser, launching one if none answers.
    pub async fn ensure_browser(&self) -> Result<Arc<CdpClient>> {
        let mut state = self.state.lock().await;
        self.ensure_browser_locked(&mut state).await
    }

    async fn ensure_browser_locked(&self, state: &mut SessionState) -> Result<Arc<CdpClient>> {
        if let Some(browser) = &state.browser {
            if !browser.is_closed() {
                return Ok(browser.clone());
            }
            warn!("CDP connection lost, reconnecting");
            state.browser = None;
            state.page = None;
            state.context_id = None;
            state.context_ready = false;
        }

        let browser = match self.connect_existing().await {
            Ok(browser) => browser,
            Err(e) => {
                debug!(error = %e, "No browser answering, launching");
                self.launch_and_connect().await?
            }
        };
        self.record_host(&browser).await;
        state.browser = Some(browser.clone());
        Ok(browser)
    }

    async fn connect_existing(&self) -> Result<Arc<CdpClient>> {
        let ms = self.config.browser.connect_timeout_ms;
        let ws = fetch_ws_endpoint(&self.config.browser.discovery_url(), Duration::from_millis(ms)).await?;
        let client = with_timeout(ms, "CDP connect", CdpClient::connect(&ws)).await?;
        info!(endpoint = %ws, "Connected to running browser");
        Ok(Arc::new(client))
    }

    async fn launch_and_connect(&self) -> Result<Arc<CdpClient>> {
        let browser_cfg = &self.config.browser;
        let launcher = self.launcher.as_ref().ok_or_else(|| {
            Error::HostUnavailable(format!(
                "No browser running at {}. Run `pagehost launch` first",
                browser_cfg.discovery_url()
            ))
        })?;

        // Only one invocation spawns; the others wait for the same endpoint.
        let lock = self.registry.try_lock_launch()?;
        if lock.is_some() {
            let pid = launcher.spawn_detached(browser_cfg)?;
            info!(pid, "Spawned detached browser launcher");
        } else {
            info!("Another invocation is launching the browser, waiting");
        }

        let ws = wait_for_cdp_ready(
            &browser_cfg.discovery_url(),
            browser_cfg.launch_attempts,
            Duration::from_millis(browser_cfg.launch_poll_ms),
        )
        .await
        .map_err(|_| Error::HostUnavailable("Browser launch timeout".into()))?;
        drop(lock);

        let ms = browser_cfg.connect_timeout_ms;
        let client = with_timeout(ms, "CDP connect after launch", CdpClient::connect(&ws))
            .await
            .map_err(|e| Error::HostUnavailable(e.to_string()))?;
        Ok(Arc::new(client))
    }

    /// Write the discovery record if nobody has yet.
    async fn record_host(&self, browser: &CdpClient) {
        if self.registry.load().is_some() {
            return;
        }
        match browser_pid(browser).await {
            Some(pid) => {
                if let Err(e) = self.registry.save(browser.endpoint(), pid) {
                    warn!(error = %e, "Failed to save host record");
                }
            }
            None => debug!("Browser pid unknown, not recording host"),
        }
    }

    async fn ensure_context_locked(&self, state: &mut SessionState, cdp: &CdpClient) -> Result<Option<String>> {
        if state.context_ready {
            return Ok(state.context_id.clone());
        }

        let mut pages = page_targets(cdp).await?;
        if pages.is_empty() {
            cdp.create_target("about:blank", None).await?;
            pages = page_targets(cdp).await?;
        }
        let context_id = pages
            .iter()
            .filter(|t| !target_url(t).contains(RECORDING_URL_MARKER))
            .chain(pages.iter())
            .find_map(|t| t.get("browserContextId").and_then(|v| v.as_str()))
            .map(str::to_string);

        let cwd = state
            .caller_cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        self.inject_storage(cdp, context_id.as_deref(), &self.config.storage_file(&cwd))
            .await;

        state.context_id = context_id.clone();
        state.context_ready = true;
        Ok(context_id)
    }

    async fn inject_storage(&self, cdp: &CdpClient, context_id: Option<&str>, storage: &Path) {
        let content = match std::fs::read_to_string(storage) {
            Ok(c) => c,
            Err(_) => {
                debug!(path = %storage.display(), "No saved storage to inject");
                return;
            }
        };
        let cookies = match serde_json::from_str::<Value>(&content) {
            Ok(v) => cookie_params(&v),
            Err(e) => {
                warn!(path = %storage.display(), error = %e, "Ignoring unreadable storage file");
                return;
            }
        };
        if cookies.is_empty() {
            return;
        }
        let count = cookies.len();
        match cdp.set_cookies(cookies, context_id).await {
            Ok(()) => info!(count, path = %storage.display(), "Injected saved cookies"),
            Err(e) => warn!(error = %e, "Cookie injection failed"),
        }
    }

    /// The page tools act on, resolved once and re-resolved if it was closed.
    pub async fn page(&self) -> Result<Page> {
        let mut state = self.state.lock().await;

        if let Some(page) = &state.page {
            if page.is_open().await {
                return Ok(page.clone());
            }
            debug!(target = %page.target_id(), "Cached page closed, resolving again");
            state.page = None;
        }

        let cdp = self.ensure_browser_locked(&mut state).await?;
        let context_id = self.ensure_context_locked(&mut state, &cdp).await?;
        let targets = page_targets(&cdp).await?;

        let chosen = choose_page(&targets, context_id.as_deref(), self.recordings.is_active());
        let (target_id, page_context) = match chosen {
            Some(t) => (
                t.get("targetId").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                t.get("browserContextId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| context_id.clone()),
            ),
            None => {
                let id = cdp.create_target("about:blank", context_id.as_deref()).await?;
                info!(target = %id, "Opened new page");
                (id, context_id.clone())
            }
        };

        let page = Page::attach(cdp, &target_id, page_context).await?;
        state.page = Some(page.clone());
        Ok(page)
    }

    /// Like `page`, but fails until something has been navigated to.
    pub async fn require_page(&self) -> Result<Page> {
        let page = self.page().await?;
        if page.url().await? == "about:blank" {
            return Err(Error::Tool("No page loaded. Use navigate first.".into()));
        }
        Ok(page)
    }

    /// Drop the CDP connection and cached handles. The browser keeps running.
    pub async fn disconnect_rpc(&self) {
        let mut state = self.state.lock().await;
        if state.browser.is_some() {
            debug!("Disconnecting from browser");
        }
        state.page = None;
        state.context_id = None;
        state.context_ready = false;
        state.browser = None;
    }

    /// Ask the browser to exit. Never launches one just to close it.
    pub async fn close_browser(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let browser = match state.browser.take() {
            Some(b) if !b.is_closed() => b,
            _ => self.connect_existing().await?,
        };
        state.page = None;
        state.context_id = None;
        state.context_ready = false;
        browser.close_browser().await
    }
}

async fn page_targets(cdp: &CdpClient) -> Result<Vec<Value>> {
    Ok(cdp
        .get_targets()
        .await?
        .into_iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .collect())
}

fn target_url(target: &Value) -> &str {
    target.get("url").and_then(|v| v.as_str()).unwrap_or_default()
}

fn is_placeholder_url(url: &str) -> bool {
    url.is_empty() || url.starts_with("about:") || url.starts_with("chrome://")
}

/// Page preference: the recording page while recording, then a page with real
/// content, then any page of the context.
fn choose_page<'a>(targets: &'a [Value], context_id: Option<&str>, recording: bool) -> Option<&'a Value> {
    if recording {
        if let Some(t) = targets.iter().find(|t| target_url(t).contains(RECORDING_URL_MARKER)) {
            return Some(t);
        }
    }
    let in_context: Vec<&Value> = targets
        .iter()
        .filter(|t| {
            context_id.is_none() || t.get("browserContextId").and_then(|v| v.as_str()) == context_id
        })
        .collect();
    in_context
        .iter()
        .find(|t| !is_placeholder_url(target_url(t)))
        .or_else(|| in_context.first())
        .copied()
}

/// Translate a saved storage-state document into `Storage.setCookies` params.
pub fn cookie_params(storage: &Value) -> Vec<Value> {
    let Some(cookies) = storage.get("cookies").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    cookies
        .iter()
        .filter_map(|c| {
            let name = c.get("name")?.as_str()?;
            let value = c.get("value")?.as_str()?;
            let mut param = json!({ "name": name, "value": value });
            for key in ["domain", "path", "url"] {
                if let Some(v) = c.get(key).and_then(|v| v.as_str()) {
                    param[key] = json!(v);
                }
            }
            for key in ["secure", "httpOnly"] {
                if let Some(v) = c.get(key).and_then(|v| v.as_bool()) {
                    param[key] = json!(v);
                }
            }
            if let Some(expires) = c.get("expires").and_then(|v| v.as_f64()) {
                if expires > 0.0 {
                    param["expires"] = json!(expires);
                }
            }
            if let Some(same_site) = c.get("sameSite").and_then(|v| v.as_str()) {
                if matches!(same_site, "Strict" | "Lax" | "None") {
                    param["sameSite"] = json!(same_site);
                }
            }
            Some(param)
        })
        .collect()
}

async fn browser_pid(browser: &CdpClient) -> Option<u32> {
    let info = browser
        .send_command("SystemInfo.getProcessInfo", json!({}))
        .await
        .ok()?;
    info.get("processInfo")?
        .as_array()?
        .iter()
        .find(|p| p.get("type").and_then(|v| v.as_str()) == Some("browser"))
        .and_then(|p| p.get("id").and_then(|v| v.as_u64()))
        .map(|id| id as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagehost_core::config::BrowserConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn target(id: &str, url: &str, ctx: &str) -> Value {
        json!({"targetId": id, "type": "page", "url": url, "browserContextId": ctx})
    }

    #[test]
    fn test_prefers_meaningful_page() {
        let targets = vec![
            target("a", "about:blank", "C1"),
            target("b", "chrome://newtab/", "C1"),
            target("c", "https://example.com/", "C1"),
        ];
        let chosen = choose_page(&targets, Some("C1"), false).unwrap();
        assert_eq!(chosen["targetId"], "c");
    }

    #[test]
    fn test_falls_back_to_first_page_in_context() {
        let targets = vec![
            target("x", "https://other.test/", "C2"),
            target("a", "about:blank", "C1"),
            target("b", "about:blank", "C1"),
        ];
        let chosen = choose_page(&targets, Some("C1"), false).unwrap();
        assert_eq!(chosen["targetId"], "a");
        assert!(choose_page(&[], Some("C1"), false).is_none());
    }

    #[test]
    fn test_recording_page_wins_while_recording() {
        let targets = vec![
            target("c", "https://example.com/", "C1"),
            target("r", "about:blank?recording=true", "REC"),
        ];
        assert_eq!(choose_page(&targets, Some("C1"), true).unwrap()["targetId"], "r");
        assert_eq!(choose_page(&targets, Some("C1"), false).unwrap()["targetId"], "c");
    }

    #[test]
    fn test_cookie_params_mapping() {
        let storage = json!({
            "cookies": [
                {"name": "sid", "value": "abc", "domain": ".example.com", "path": "/",
                 "expires": -1, "httpOnly": true, "secure": false, "sameSite": "Lax"},
                {"name": "t", "value": "1", "domain": "example.com", "expires": 1900000000.5},
                {"value": "nameless"}
            ],
            "origins": []
        });
        let params = cookie_params(&storage);
        assert_eq!(params.len(), 2);
        assert_eq!(
            params[0],
            json!({"name": "sid", "value": "abc", "domain": ".example.com", "path": "/",
                   "httpOnly": true, "secure": false, "sameSite": "Lax"})
        );
        assert_eq!(params[1]["expires"], 1900000000.5);
        assert!(cookie_params(&json!({})).is_empty());
    }

    struct CountingLauncher(AtomicUsize);

    impl LaunchHandle for CountingLauncher {
        fn spawn_detached(&self, _config: &BrowserConfig) -> Result<u32> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    fn unreachable_config() -> Config {
        let mut config = Config::default();
        // Nothing listens on port 1.
        config.browser.cdp_port = 1;
        config.browser.connect_timeout_ms = 200;
        config.browser.launch_attempts = 2;
        config.browser.launch_poll_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_unreachable_browser_is_host_unavailable() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_dirs(dir.path().join("home"), dir.path().join("run"));
        let launcher = Arc::new(CountingLauncher(AtomicUsize::new(0)));
        let session = BrowsingSession::new(unreachable_config(), &paths, Some(launcher.clone()));

        let err = session.page().await.err().expect("no browser to attach to");
        assert!(matches!(err, Error::HostUnavailable(_)), "{err}");
        assert_eq!(launcher.0.load(Ordering::SeqCst), 1);
        // The launch lock is released afterwards.
        assert!(!paths.launch_lock_file().exists());
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn test_no_launcher_means_no_launch() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_dirs(dir.path().join("home"), dir.path().join("run"));
        let session = BrowsingSession::new(unreachable_config(), &paths, None);
        let err = session.ensure_browser().await.err().expect("no browser to connect to");
        assert!(matches!(err, Error::HostUnavailable(_)));
        assert!(session.close_browser().await.is_err());
        session.disconnect_rpc().await;
    }

    #[tokio::test]
    async fn test_caller_cwd_defaults_to_process_cwd() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_dirs(dir.path().join("home"), dir.path().join("run"));
        let session = BrowsingSession::new(Config::default(), &paths, None);
        assert_eq!(session.caller_cwd().await, std::env::current_dir().unwrap());
        session.set_caller_cwd(PathBuf::from("/work")).await;
        assert_eq!(session.caller_cwd().await, PathBuf::from("/work"));
    }
}
