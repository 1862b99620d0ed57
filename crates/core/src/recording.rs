//! Descriptor and stop handshake for an in-progress screen recording.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::{process, Result};

pub const STOP_SIGNAL: &str = "stop";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub output_path: PathBuf,
    #[serde(alias = "videoDirectory")]
    pub video_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    #[serde(alias = "processId")]
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct RecordingStore {
    info_path: PathBuf,
    control_path: PathBuf,
}

impl RecordingStore {
    pub fn new(info_path: PathBuf, control_path: PathBuf) -> Self {
        Self {
            info_path,
            control_path,
        }
    }

    pub fn from_paths(paths: &crate::Paths) -> Self {
        Self::new(paths.recording_file(), paths.recording_control_file())
    }

    pub fn info_path(&self) -> &Path {
        &self.info_path
    }

    pub fn save(&self, info: &RecordingInfo) -> Result<()> {
        if let Some(parent) = self.info_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.info_path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(info)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.info_path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn load(&self) -> Option<RecordingInfo> {
        let content = std::fs::read_to_string(&self.info_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// A recording is active while its descriptor names a live process. A
    /// descriptor left behind by a dead recorder is removed.
    pub fn is_active(&self) -> bool {
        if !self.info_path.exists() {
            return false;
        }
        match self.load() {
            Some(info) if process::is_alive(info.pid) => true,
            Some(info) => {
                warn!(pid = info.pid, "Removing recording descriptor of a dead process");
                self.remove();
                self.clear_control();
                false
            }
            None => {
                warn!(path = %self.info_path.display(), "Removing unreadable recording descriptor");
                self.remove();
                false
            }
        }
    }

    pub fn remove(&self) {
        remove_quietly(&self.info_path);
    }

    /// Ask the recording process to finalize.
    pub fn signal_stop(&self) -> Result<()> {
        std::fs::write(&self.control_path, STOP_SIGNAL)?;
        Ok(())
    }

    pub fn stop_requested(&self) -> bool {
        std::fs::read_to_string(&self.control_path)
            .map(|s| s.trim() == STOP_SIGNAL)
            .unwrap_or(false)
    }

    pub fn clear_control(&self) {
        remove_quietly(&self.control_path);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove recording file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> RecordingStore {
        RecordingStore::new(dir.path().join("rec.json"), dir.path().join("rec-control"))
    }

    #[test]
    fn test_info_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.is_active());

        let info = RecordingInfo {
            output_path: PathBuf::from("/out/demo.mp4"),
            video_dir: dir.path().join("frames"),
            started_at: Utc::now(),
            width: 1280,
            height: 720,
            pid: std::process::id(),
        };
        store.save(&info).unwrap();
        assert!(store.is_active());
        assert_eq!(store.load(), Some(info));

        store.remove();
        assert!(!store.is_active());
        assert!(store.load().is_none());
    }

    fn exited_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_dead_owner_is_not_active() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save(&RecordingInfo {
                output_path: PathBuf::from("/out/demo.mp4"),
                video_dir: dir.path().join("frames"),
                started_at: Utc::now(),
                width: 1280,
                height: 720,
                pid: exited_pid(),
            })
            .unwrap();
        store.signal_stop().unwrap();

        assert!(!store.is_active());
        assert!(!store.info_path().exists());
        assert!(!store.stop_requested());
    }

    #[test]
    fn test_unreadable_descriptor_is_not_active() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.info_path(), "{ not json").unwrap();
        assert!(!store.is_active());
        assert!(!store.info_path().exists());
    }

    #[test]
    fn test_stop_handshake() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.stop_requested());
        store.signal_stop().unwrap();
        assert!(store.stop_requested());
        store.clear_control();
        assert!(!store.stop_requested());
        store.clear_control();
    }
}
