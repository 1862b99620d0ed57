//! Screen recording of a dedicated page, encoded to MP4 on stop.
//!
//! Frames come from `Page.startScreencast` and are written as numbered JPEGs;
//! ffmpeg turns them into the final video. Another invocation stops a running
//! recording through the control file of a `RecordingStore`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use pagehost_core::{Error, RecordingInfo, RecordingStore, Result};
use serde_json::json;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cdp::CdpClient;
use super::page::Page;
use super::session::RECORDING_URL_MARKER;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const STOP_POLL: Duration = Duration::from_millis(500);
pub const STOP_WAIT_MS: u64 = 60_000;

const FRAME_PATTERN: &str = "frame-%06d.jpg";
const MAX_FPS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Resolve the requested output name: relative to `cwd`, always `.mp4`.
pub fn output_path(cwd: &Path, requested: Option<&str>) -> PathBuf {
    let name = match requested {
        Some(n) => n.to_string(),
        None => format!("recording-{}.mp4", Utc::now().timestamp_millis()),
    };
    let name = match name.strip_suffix(".webm") {
        Some(stem) => format!("{}.mp4", stem),
        None => name,
    };
    let path = Path::new(&name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Frame rate that makes `frames` span the recorded duration.
pub fn framerate(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if frames == 0 || secs <= 0.0 {
        return 1.0;
    }
    (frames as f64 / secs).clamp(1.0, MAX_FPS)
}

pub fn ffmpeg_args(frames_dir: &Path, fps: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-framerate".into(),
        format!("{:.2}", fps),
        "-i".into(),
        frames_dir.join(FRAME_PATTERN).display().to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        "23".into(),
        "-preset".into(),
        "medium".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output.display().to_string(),
    ]
}

/// An active recording owned by this process.
pub struct Recorder {
    cdp: Arc<CdpClient>,
    page: Page,
    context_id: String,
    info: RecordingInfo,
    frames: Arc<AtomicU64>,
    frame_task: JoinHandle<()>,
}

impl Recorder {
    /// Open the recording page in a fresh context and start capturing.
    pub async fn start(
        cdp: Arc<CdpClient>,
        store: &RecordingStore,
        options: &RecordingOptions,
        frames_dir: PathBuf,
    ) -> Result<Self> {
        if store.is_active() {
            return Err(Error::Tool("A recording is already in progress".into()));
        }
        std::fs::create_dir_all(&frames_dir)?;

        let context_id = cdp.create_browser_context().await?;
        let url = format!("about:blank?{}", RECORDING_URL_MARKER);
        let target_id = cdp.create_target(&url, Some(&context_id)).await?;
        let page = Page::attach(cdp.clone(), &target_id, Some(context_id.clone())).await?;

        page.send(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": options.width,
                "height": options.height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;

        let frames = Arc::new(AtomicU64::new(0));
        let events = page.subscribe(&["Page.screencastFrame"]).await;
        let frame_task = tokio::spawn(write_frames(page.clone(), events, frames_dir.clone(), frames.clone()));

        page.send(
            "Page.startScreencast",
            json!({
                "format": "jpeg",
                "quality": 80,
                "maxWidth": options.width,
                "maxHeight": options.height,
            }),
        )
        .await?;

        let info = RecordingInfo {
            output_path: options.output.clone(),
            video_dir: frames_dir,
            started_at: Utc::now(),
            width: options.width,
            height: options.height,
            pid: std::process::id(),
        };
        store.save(&info)?;
        info!(output = %info.output_path.display(), width = info.width, height = info.height, "Recording started");

        Ok(Self {
            cdp,
            page,
            context_id,
            info,
            frames,
            frame_task,
        })
    }

    pub fn info(&self) -> &RecordingInfo {
        &self.info
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Resolve once another invocation asks this recording to stop.
    pub async fn wait_for_stop(&self, store: &RecordingStore) {
        while !store.stop_requested() {
            tokio::time::sleep(STOP_POLL).await;
        }
        store.clear_control();
    }

    async fn stop_capture(&self) {
        if let Err(e) = self.page.send("Page.stopScreencast", json!({})).await {
            debug!(error = %e, "stopScreencast failed");
        }
        // Let in-flight frames land before the writer goes away.
        tokio::time::sleep(STOP_POLL).await;
        self.frame_task.abort();
        if let Err(e) = self.cdp.dispose_browser_context(&self.context_id).await {
            warn!(error = %e, "Failed to dispose recording context");
        }
    }

    /// Stop capturing and encode the video. Returns the output path when a
    /// video was written.
    pub async fn finish(self, store: &RecordingStore) -> Result<Option<PathBuf>> {
        self.stop_capture().await;

        let frames = self.frame_count();
        let elapsed = (Utc::now() - self.info.started_at)
            .to_std()
            .unwrap_or(Duration::from_secs(1));
        let result = if frames == 0 {
            warn!("No frames captured");
            Ok(None)
        } else {
            encode(&self.info.video_dir, framerate(frames, elapsed), &self.info.output_path)
                .await
                .map(|_| Some(self.info.output_path.clone()))
        };

        cleanup(&self.info, store);
        result
    }

    /// Drop the capture without producing a video.
    pub async fn abort(self, store: &RecordingStore) {
        self.stop_capture().await;
        cleanup(&self.info, store);
        info!("Recording aborted");
    }
}

async fn write_frames(
    page: Page,
    mut events: tokio::sync::mpsc::Receiver<super::cdp::CdpEvent>,
    dir: PathBuf,
    frames: Arc<AtomicU64>,
) {
    let engine = base64::engine::general_purpose::STANDARD;
    while let Some(event) = events.recv().await {
        let params = &event.params;
        if let Some(ack) = params.get("sessionId").cloned() {
            if let Err(e) = page.send("Page.screencastFrameAck", json!({ "sessionId": ack })).await {
                debug!(error = %e, "Frame ack failed");
                break;
            }
        }
        let Some(data) = params.get("data").and_then(|v| v.as_str()) else {
            continue;
        };
        let bytes = match engine.decode(data) {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable frame");
                continue;
            }
        };
        let index = frames.load(Ordering::Relaxed) + 1;
        let path = dir.join(format!("frame-{:06}.jpg", index));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                frames.store(index, Ordering::Relaxed);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write frame"),
        }
    }
}

async fn encode(frames_dir: &Path, fps: f64, output: &Path) -> Result<()> {
    let ffmpeg = which::which("ffmpeg")
        .map_err(|_| Error::NotFound("ffmpeg not found in PATH; cannot encode recording".into()))?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(fps, output = %output.display(), "Encoding video");
    let status = Command::new(ffmpeg)
        .args(ffmpeg_args(frames_dir, fps, output))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Tool(format!("ffmpeg exited with {}", status)))
    }
}

fn cleanup(info: &RecordingInfo, store: &RecordingStore) {
    if let Err(e) = std::fs::remove_dir_all(&info.video_dir) {
        debug!(dir = %info.video_dir.display(), error = %e, "Frame directory cleanup failed");
    }
    store.remove();
}

/// Ask the recording process to finalize and wait until it has.
pub async fn stop_recording(store: &RecordingStore, timeout_ms: u64) -> Result<()> {
    if !store.is_active() {
        return Err(Error::Tool("No recording in progress".into()));
    }
    store.signal_stop()?;
    info!("Stop signal sent, waiting for video to be saved");

    let wait = async {
        while store.is_active() {
            tokio::time::sleep(STOP_POLL).await;
        }
    };
    tokio::time::timeout(Duration::from_millis(timeout_ms), wait)
        .await
        .map_err(|_| Error::timeout(timeout_ms, "waiting for recording to finish"))
}
