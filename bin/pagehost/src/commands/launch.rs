use std::time::Duration;

use pagehost_core::config::BrowserConfig;
use pagehost_core::{process, Config, EndpointRegistry, Error, Paths, Result};
use pagehost_host::ExitWatchdog;
use pagehost_tools::browser::launcher::launch_browser;
use pagehost_tools::LaunchHandle;
use tracing::{info, warn};

/// How long the background launch waits before reporting.
const BACKGROUND_SETTLE: Duration = Duration::from_secs(3);

/// How long Chrome gets to exit after SIGTERM.
const BROWSER_EXIT_WAIT: Duration = Duration::from_secs(5);

/// Re-runs this binary as `pagehost launch --fg` in its own session.
pub struct SelfLauncher;

pub fn launcher_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = vec!["launch".to_string(), "--fg".to_string()];
    if config.headless {
        args.push("--headless".to_string());
    }
    if config.devtools {
        args.push("--devtools".to_string());
    }
    args
}

impl LaunchHandle for SelfLauncher {
    fn spawn_detached(&self, config: &BrowserConfig) -> Result<u32> {
        let exe = std::env::current_exe()?;
        process::spawn_detached(&exe, &launcher_args(config))
            .map_err(|e| Error::HostUnavailable(format!("Failed to start browser launcher: {}", e)))
    }
}

pub async fn run(paths: &Paths, mut config: Config, headless: bool, devtools: bool, fg: bool) -> anyhow::Result<i32> {
    config.browser.headless |= headless;
    config.browser.devtools |= devtools;
    let registry = EndpointRegistry::from_paths(paths);

    if !fg {
        let pid = SelfLauncher.spawn_detached(&config.browser)?;
        tokio::time::sleep(BACKGROUND_SETTLE).await;
        match registry.load() {
            Some(record) => {
                println!("Browser launched in background (PID: {})", record.pid);
                println!("CDP endpoint: {}", record.endpoint);
            }
            None => println!("Browser starting in background (PID: {})...", pid),
        }
        return Ok(0);
    }

    if let Some(existing) = registry.load() {
        if process::is_alive(existing.pid) {
            println!("Browser already running (PID: {})", existing.pid);
            println!("CDP endpoint: {}", existing.endpoint);
            return Ok(0);
        }
        info!(pid = existing.pid, "Removing stale endpoint record");
        registry.remove();
    }

    paths.ensure_dirs()?;
    let mut browser = launch_browser(&config.browser, &paths.profile_dir()).await?;
    let record = registry.save(&browser.ws_endpoint, std::process::id())?;
    println!("Browser launched (PID: {})", record.pid);
    println!("CDP endpoint: {}", record.endpoint);
    println!("Press Ctrl+C to close");

    let watchdog = ExitWatchdog::new(Duration::from_millis(config.host.exit_grace_ms));
    watchdog.install_signal_handlers()?;

    let signalled = tokio::select! {
        status = browser.child.wait() => {
            match status {
                Ok(status) => info!(%status, "Browser exited"),
                Err(e) => warn!(error = %e, "Waiting for browser failed"),
            }
            false
        }
        _ = watchdog.triggered() => true,
    };

    if signalled {
        println!("Closing browser...");
        if let Some(pid) = browser.pid() {
            process::terminate(pid);
        }
        if tokio::time::timeout(BROWSER_EXIT_WAIT, browser.child.wait()).await.is_err() {
            warn!("Browser ignored SIGTERM, killing it");
            let _ = browser.child.kill().await;
        }
    }

    // A newer launcher may own the record by now.
    if registry.load().map(|r| r.pid) == Some(record.pid) {
        registry.remove();
    }
    Ok(0)
}
