//! Discovery file for the running browser host.
//!
//! The record is advisory: a crashed host leaves a stale file behind, and callers
//! detect that by failing to connect rather than by trusting the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// A launch lock older than this is assumed abandoned.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Browser-level CDP WebSocket URL.
    pub endpoint: String,
    #[serde(alias = "processId")]
    pub pid: u32,
    pub launched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl EndpointRegistry {
    pub fn new(path: PathBuf, lock_path: PathBuf) -> Self {
        Self { path, lock_path }
    }

    pub fn from_paths(paths: &crate::Paths) -> Self {
        Self::new(paths.endpoint_file(), paths.launch_lock_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a fresh record stamped with the current time.
    pub fn save(&self, endpoint: &str, pid: u32) -> Result<HostRecord> {
        let record = HostRecord {
            endpoint: endpoint.to_string(),
            pid,
            launched_at: Utc::now(),
        };
        self.save_record(&record)?;
        Ok(record)
    }

    /// Replace the file contents in one rename so readers never see a partial write.
    pub fn save_record(&self, record: &HostRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), pid = record.pid, "Host record saved");
        Ok(())
    }

    /// Absent or unparsable files both read as "no host".
    pub fn load(&self) -> Option<HostRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Ignoring unreadable host record");
                None
            }
        }
    }

    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Host record removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove host record"),
        }
    }

    /// Try to become the single process allowed to launch a browser.
    ///
    /// Returns `None` while another live lock exists. Locks older than 30s are
    /// taken over.
    pub fn try_lock_launch(&self) -> Result<Option<LaunchLock>> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&self.lock_path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Some(LaunchLock {
                        path: self.lock_path.clone(),
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !self.lock_is_stale() {
                        return Ok(None);
                    }
                    warn!(path = %self.lock_path.display(), "Taking over stale launch lock");
                    let _ = std::fs::remove_file(&self.lock_path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn lock_is_stale(&self) -> bool {
        std::fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|age| age > STALE_LOCK_AFTER)
            .unwrap_or(false)
    }
}

/// Held for the duration of a launch decision. Dropping releases it.
#[derive(Debug)]
pub struct LaunchLock {
    path: PathBuf,
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
