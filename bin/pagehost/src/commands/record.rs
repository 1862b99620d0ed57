use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pagehost_core::{Config, EndpointRegistry, Error, Paths, RecordingStore};
use pagehost_host::ExitWatchdog;
use pagehost_tools::browser::cdp::CdpClient;
use pagehost_tools::browser::recorder::{self, Recorder, RecordingOptions, STOP_WAIT_MS};
use pagehost_tools::timeout::with_timeout;

/// Record the browser until `record-stop` or a signal.
pub async fn start(
    paths: &Paths,
    config: &Config,
    output: Option<String>,
    width: u32,
    height: u32,
) -> anyhow::Result<i32> {
    let registry = EndpointRegistry::from_paths(paths);
    let record = registry
        .load()
        .ok_or_else(|| Error::HostUnavailable("Browser not running. Run `pagehost launch` first".into()))?;

    let cdp = with_timeout(
        config.browser.connect_timeout_ms,
        "connecting to browser",
        CdpClient::connect(&record.endpoint),
    )
    .await
    .map_err(|e| Error::HostUnavailable(format!("Cannot reach browser at {}: {}", record.endpoint, e)))?;

    let cwd = std::env::current_dir()?;
    let options = RecordingOptions {
        output: recorder::output_path(&cwd, output.as_deref()),
        width,
        height,
    };
    let frames_dir = paths
        .recordings_dir()
        .join(format!("frames-{}", Utc::now().timestamp_millis()));
    let store = RecordingStore::from_paths(paths);
    let recorder = Recorder::start(Arc::new(cdp), &store, &options, frames_dir).await?;

    println!("Recording started (PID: {})", recorder.info().pid);
    println!("Output: {}", options.output.display());
    println!("Size: {}x{}", width, height);
    println!("Stop with: pagehost record-stop");

    let watchdog = ExitWatchdog::new(Duration::from_millis(config.host.exit_grace_ms));
    watchdog.install_signal_handlers()?;

    let stopped = tokio::select! {
        _ = recorder.wait_for_stop(&store) => true,
        _ = watchdog.triggered() => false,
    };

    if !stopped {
        println!("Aborting recording...");
        recorder.abort(&store).await;
        return Ok(1);
    }

    println!("Saving video ({} frames)...", recorder.frame_count());
    match recorder.finish(&store).await? {
        Some(path) => println!("Video saved: {}", path.display()),
        None => println!("No frames captured, nothing saved"),
    }
    Ok(0)
}

/// Ask the recording process to stop and wait until it has saved.
pub async fn stop(paths: &Paths) -> anyhow::Result<i32> {
    let store = RecordingStore::from_paths(paths);
    if let Some(info) = store.load() {
        println!("Stopping recording (PID: {})...", info.pid);
    }
    recorder::stop_recording(&store, STOP_WAIT_MS).await?;
    println!("Recording stopped");
    Ok(0)
}
