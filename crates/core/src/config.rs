use crate::{Error, Paths, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub devtools: bool,
    /// Explicit Chrome/Chromium binary. Auto-detected when unset.
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_launch_attempts")]
    pub launch_attempts: u32,
    #[serde(default = "default_launch_poll_ms")]
    pub launch_poll_ms: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_cdp_port() -> u16 {
    9222
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_launch_attempts() -> u32 {
    30
}

fn default_launch_poll_ms() -> u64 {
    500
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            devtools: false,
            executable: None,
            cdp_port: default_cdp_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            launch_attempts: default_launch_attempts(),
            launch_poll_ms: default_launch_poll_ms(),
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    pub fn discovery_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.cdp_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_exit_grace_ms() -> u64 {
    15_000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

/// Completion heuristic timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_network_cap_ms")]
    pub network_cap_ms: u64,
}

fn default_settle_ms() -> u64 {
    500
}

fn default_network_cap_ms() -> u64 {
    5_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            network_cap_ms: default_network_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Cookie storage file. Defaults to `<caller cwd>/.pagehost/storage.json`.
    #[serde(default)]
    pub storage_path: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Where saved cookies live for a caller running in `caller_cwd`.
    pub fn storage_file(&self, caller_cwd: &Path) -> PathBuf {
        match self.storage_path.as_deref() {
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => caller_cwd.join(p),
            None => caller_cwd.join(".pagehost").join("storage.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.browser.cdp_port, 9222);
        assert_eq!(cfg.browser.connect_timeout_ms, 10_000);
        assert_eq!(cfg.browser.launch_attempts, 30);
        assert_eq!(cfg.browser.launch_poll_ms, 500);
        assert_eq!(cfg.host.request_timeout_ms, 120_000);
        assert_eq!(cfg.host.exit_grace_ms, 15_000);
        assert_eq!(cfg.timing.settle_ms, 500);
        assert_eq!(cfg.timing.network_cap_ms, 5_000);
        assert!(!cfg.browser.headless);
    }

    #[test]
    fn test_partial_camel_case() {
        let raw = r#"{ "browser": { "headless": true, "cdpPort": 9333 }, "timing": { "networkCapMs": 8000 } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.cdp_port, 9333);
        assert_eq!(cfg.browser.discovery_url(), "http://127.0.0.1:9333");
        assert_eq!(cfg.timing.network_cap_ms, 8000);
        assert_eq!(cfg.timing.settle_ms, 500);
    }

    #[test]
    fn test_storage_file_resolution() {
        let cwd = Path::new("/work/project");
        let mut cfg = Config::default();
        assert_eq!(
            cfg.storage_file(cwd),
            PathBuf::from("/work/project/.pagehost/storage.json")
        );
        cfg.storage_path = Some("auth/state.json".into());
        assert_eq!(cfg.storage_file(cwd), PathBuf::from("/work/project/auth/state.json"));
        cfg.storage_path = Some("/etc/state.json".into());
        assert_eq!(cfg.storage_file(cwd), PathBuf::from("/etc/state.json"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "browser": { "devtools": true } }"#).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert!(loaded.browser.devtools);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ browser: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert!(err.to_string().starts_with("Config error: "));
    }
}
