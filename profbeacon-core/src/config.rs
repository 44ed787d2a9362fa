//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/profbeacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/profbeacon/` (~/.config/profbeacon/)
//! - Data: `$XDG_DATA_HOME/profbeacon/` (~/.local/share/profbeacon/)
//! - State/Logs: `$XDG_STATE_HOME/profbeacon/` (~/.local/state/profbeacon/)

use crate::error::{Error, Result};
use crate::types::ContentEncoding;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Sampling schedule and profiler settings
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Collection endpoint and upload loop
    #[serde(default)]
    pub upload: UploadConfig,

    /// URL scrubbing
    #[serde(default)]
    pub privacy: PrivacyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with the profiler once a capture has been read out
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AfterCapture {
    /// Resume the paused profiler so it keeps running between samples
    #[default]
    Resume,
    /// Stop the profiler until the next window opens
    Stop,
}

/// Sampling schedule configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    /// Enabled state used when nothing has been persisted yet
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum seconds between the end of one capture and the start of the next
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// Maximum length of a capture window in seconds
    #[serde(default = "default_max_capture")]
    pub max_capture_secs: u64,

    /// Seconds after which a stalled profile read-out reopens the record-gate
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_secs: u64,

    /// Profiler policy after a capture
    #[serde(default)]
    pub after_capture: AfterCapture,

    /// Settings handed to the profiler on start
    #[serde(default)]
    pub profiler: ProfilerSettings,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_interval_secs: default_min_interval(),
            max_capture_secs: default_max_capture(),
            retrieval_timeout_secs: default_retrieval_timeout(),
            after_capture: AfterCapture::default(),
            profiler: ProfilerSettings::default(),
        }
    }
}

impl SamplingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn max_capture(&self) -> Duration {
        Duration::from_secs(self.max_capture_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_min_interval() -> u64 {
    15 * 60
}

fn default_max_capture() -> u64 {
    60
}

fn default_retrieval_timeout() -> u64 {
    15
}

/// Settings passed to [`crate::profiler::Profiler::start`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProfilerSettings {
    /// Sample buffer size in entries
    #[serde(default = "default_entries")]
    pub entries: u64,

    /// Sampling interval in milliseconds
    #[serde(default = "default_profiler_interval")]
    pub interval_ms: f64,

    #[serde(default = "default_features")]
    pub features: Vec<String>,

    #[serde(default = "default_threads")]
    pub threads: Vec<String>,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            entries: default_entries(),
            interval_ms: default_profiler_interval(),
            features: default_features(),
            threads: default_threads(),
        }
    }
}

fn default_entries() -> u64 {
    10_000_000
}

fn default_profiler_interval() -> f64 {
    2.0
}

fn default_features() -> Vec<String> {
    ["stackwalk", "threads", "leaf", "js"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_threads() -> Vec<String> {
    vec!["GeckoMain".to_string(), "Compositor".to_string()]
}

/// Collection endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Collection server URL (e.g., `https://beacons.example.com`)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Seconds between drain cycles of the upload queue
    #[serde(default = "default_upload_delay")]
    pub delay_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,

    /// Body encoding for uploads
    #[serde(default)]
    pub encoding: ContentEncoding,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            delay_secs: default_upload_delay(),
            timeout_secs: default_upload_timeout(),
            encoding: ContentEncoding::default(),
        }
    }
}

impl UploadConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "upload.server_url must be an http(s) URL, got {:?}",
                self.server_url
            )));
        }
        if self.delay_secs == 0 {
            return Err(Error::Config(
                "upload.delay_secs must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "upload.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_server_url() -> String {
    "https://quantum-ppb.herokuapp.com".to_string()
}

fn default_upload_delay() -> u64 {
    5
}

fn default_upload_timeout() -> u64 {
    30
}

/// URL scrubbing configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PrivacyConfig {
    /// Hosts kept verbatim in addition to the built-in whitelist
    #[serde(default)]
    pub extra_whitelist: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.upload.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/profbeacon/config.toml` (~/.config/profbeacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("profbeacon").join("config.toml")
    }

    /// Returns the data directory path (for the state database)
    ///
    /// `$XDG_DATA_HOME/profbeacon/` (~/.local/share/profbeacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("profbeacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/profbeacon/` (~/.local/state/profbeacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("profbeacon")
    }

    /// Returns the key-value state database path
    ///
    /// `$XDG_DATA_HOME/profbeacon/state.db` (~/.local/share/profbeacon/state.db)
    pub fn state_db_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/profbeacon/profbeacon.log` (~/.local/state/profbeacon/profbeacon.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("profbeacon.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.sampling.enabled);
        assert_eq!(config.sampling.min_interval(), Duration::from_secs(900));
        assert_eq!(config.sampling.max_capture(), Duration::from_secs(60));
        assert_eq!(config.sampling.retrieval_timeout(), Duration::from_secs(15));
        assert_eq!(config.sampling.after_capture, AfterCapture::Resume);
        assert_eq!(config.upload.delay(), Duration::from_secs(5));
        assert_eq!(config.upload.encoding, ContentEncoding::Deflate);
        assert!(config.privacy.extra_whitelist.is_empty());
    }

    #[test]
    fn test_default_profiler_settings() {
        let settings = ProfilerSettings::default();
        assert_eq!(settings.entries, 10_000_000);
        assert_eq!(settings.interval_ms, 2.0);
        assert_eq!(settings.features, vec!["stackwalk", "threads", "leaf", "js"]);
        assert_eq!(settings.threads, vec!["GeckoMain", "Compositor"]);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[sampling]
min_interval_secs = 600
after_capture = "stop"

[sampling.profiler]
interval_ms = 4.0
threads = ["GeckoMain"]

[upload]
server_url = "https://beacons.example.com"
encoding = "gzip"

[privacy]
extra_whitelist = ["intranet.example"]

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.sampling.min_interval_secs, 600);
        assert_eq!(config.sampling.max_capture_secs, 60);
        assert_eq!(config.sampling.after_capture, AfterCapture::Stop);
        assert_eq!(config.sampling.profiler.interval_ms, 4.0);
        assert_eq!(config.sampling.profiler.threads, vec!["GeckoMain"]);
        assert_eq!(config.sampling.profiler.entries, 10_000_000);
        assert_eq!(config.upload.server_url, "https://beacons.example.com");
        assert_eq!(config.upload.encoding, ContentEncoding::Gzip);
        assert_eq!(config.privacy.extra_whitelist, vec!["intranet.example"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_upload_config_validation() {
        assert!(UploadConfig::default().validate().is_ok());

        let config = UploadConfig {
            server_url: "ftp://beacons.example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UploadConfig {
            delay_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_bad_upload_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upload]\nserver_url = \"nowhere\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
