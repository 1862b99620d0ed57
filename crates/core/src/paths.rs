use std::path::PathBuf;

/// Overrides the per-user base directory (config, browser profile).
pub const HOME_ENV: &str = "PAGEHOST_HOME";
/// Overrides the directory holding the cross-process coordination files.
pub const RUNTIME_ENV: &str = "PAGEHOST_RUNTIME_DIR";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    /// Well-known location shared by every invocation on this machine.
    pub runtime: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".pagehost")))
            .unwrap_or_else(|| PathBuf::from(".pagehost"));
        let runtime = std::env::var_os(RUNTIME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self { base, runtime }
    }

    pub fn with_dirs(base: PathBuf, runtime: PathBuf) -> Self {
        Self { base, runtime }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Chrome `--user-data-dir`, kept between launches.
    pub fn profile_dir(&self) -> PathBuf {
        self.base.join("profile")
    }

    pub fn endpoint_file(&self) -> PathBuf {
        self.runtime.join("pagehost-cdp.json")
    }

    pub fn launch_lock_file(&self) -> PathBuf {
        self.runtime.join("pagehost-cdp.lock")
    }

    pub fn recording_file(&self) -> PathBuf {
        self.runtime.join("pagehost-recording.json")
    }

    pub fn recording_control_file(&self) -> PathBuf {
        self.runtime.join("pagehost-recording-control")
    }

    /// Parent of the per-recording frame directories.
    pub fn recordings_dir(&self) -> PathBuf {
        self.runtime.join("pagehost-recordings")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(&self.runtime)?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_files_share_directory() {
        let paths = Paths::with_dirs(PathBuf::from("/home/u/.pagehost"), PathBuf::from("/tmp"));
        assert_eq!(paths.endpoint_file(), PathBuf::from("/tmp/pagehost-cdp.json"));
        assert_eq!(paths.recording_file(), PathBuf::from("/tmp/pagehost-recording.json"));
        assert_eq!(
            paths.recording_control_file(),
            PathBuf::from("/tmp/pagehost-recording-control")
        );
        assert_eq!(paths.config_file(), PathBuf::from("/home/u/.pagehost/config.json"));
        assert_eq!(paths.profile_dir(), PathBuf::from("/home/u/.pagehost/profile"));
    }
}
