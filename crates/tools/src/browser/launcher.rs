//! Locating, starting and probing a Chrome instance with remote debugging.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use pagehost_core::config::BrowserConfig;
use pagehost_core::{Error, Result};
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Find a Chrome/Chromium binary. An explicit path wins when it exists.
pub fn find_browser_binary(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        if Path::new(path).exists() || which::which(path).is_ok() {
            return Some(path.to_string());
        }
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Command line for a debuggable Chrome with a persistent profile.
pub fn build_browser_args(config: &BrowserConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", config.cdp_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if config.devtools {
        args.push("--auto-open-devtools-for-tabs".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.extend(config.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Ask `/json/version` for the browser-level WebSocket URL.
pub async fn fetch_ws_endpoint(discovery_url: &str, timeout: Duration) -> Result<String> {
    let url = format!("{}/json/version", discovery_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Transport(format!("HTTP client: {}", e)))?;
    let body: Value = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Transport(format!("{}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| Error::Transport(format!("{}: {}", url, e)))?;
    body.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Transport(format!("{} returned no webSocketDebuggerUrl", url)))
}

/// Poll the discovery endpoint until it answers or the attempts run out.
pub async fn wait_for_cdp_ready(discovery_url: &str, attempts: u32, poll: Duration) -> Result<String> {
    for attempt in 0..attempts {
        match fetch_ws_endpoint(discovery_url, poll.max(Duration::from_millis(250))).await {
            Ok(ws) => return Ok(ws),
            Err(e) => debug!(attempt, error = %e, "CDP not ready yet"),
        }
        tokio::time::sleep(poll).await;
    }
    Err(Error::HostUnavailable(format!(
        "CDP endpoint {} not ready after {} attempts",
        discovery_url, attempts
    )))
}

/// A Chrome process started by this process.
pub struct LaunchedBrowser {
    pub child: Child,
    pub ws_endpoint: String,
}

impl LaunchedBrowser {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Start Chrome and wait for its debugging endpoint.
pub async fn launch_browser(config: &BrowserConfig, user_data_dir: &Path) -> Result<LaunchedBrowser> {
    let binary = find_browser_binary(config.executable.as_deref())
        .ok_or_else(|| Error::NotFound("Chrome not found. Please install it or set browser.executable".into()))?;
    std::fs::create_dir_all(user_data_dir)?;

    let args = build_browser_args(config, user_data_dir);
    info!(
        binary = %binary,
        port = config.cdp_port,
        headless = config.headless,
        "Launching browser"
    );

    let mut child = Command::new(&binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::HostUnavailable(format!("Failed to launch {}: {}", binary, e)))?;

    let ready = wait_for_cdp_ready(
        &config.discovery_url(),
        config.launch_attempts,
        Duration::from_millis(config.launch_poll_ms),
    )
    .await;
    match ready {
        Ok(ws_endpoint) => Ok(LaunchedBrowser { child, ws_endpoint }),
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_follow_config() {
        let mut config = BrowserConfig::default();
        let args = build_browser_args(&config, Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));

        config.headless = true;
        config.devtools = true;
        config.cdp_port = 9333;
        config.extra_args = vec!["--lang=en".into()];
        let args = build_browser_args(&config, Path::new("/p"));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--auto-open-devtools-for-tabs".to_string()));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--lang=en".to_string()));
    }

    #[test]
    fn test_explicit_binary_must_exist() {
        assert_eq!(find_browser_binary(Some("/bin/sh")), Some("/bin/sh".to_string()));
        assert_ne!(
            find_browser_binary(Some("/definitely/not/here/chrome")),
            Some("/definitely/not/here/chrome".to_string())
        );
    }

    #[tokio::test]
    async fn test_wait_for_cdp_ready_gives_up() {
        // Nothing listens on port 1.
        let err = wait_for_cdp_ready("http://127.0.0.1:1", 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostUnavailable(_)));
    }
}
