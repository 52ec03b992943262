use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub auto_scan: AutoScanConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `NETWATCH_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("NETWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            executor: ExecutorConfig::from_env_profiled(p),
            auto_scan: AutoScanConfig::from_env_profiled(p),
        }
    }

    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the executor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.log_capacity == 0 {
            return Err(ConfigError::Invalid("executor.log_capacity must be > 0".into()));
        }
        if self.auto_scan.enabled && self.auto_scan.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "auto_scan.interval_secs must be > 0 when auto-scan is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  executor:    max_workers={}, log_capacity={}",
            self.executor.resolved_max_workers(),
            self.executor.log_capacity
        );
        tracing::info!(
            "  auto_scan:   enabled={}, interval={}s, priority={}, command={}",
            self.auto_scan.enabled,
            self.auto_scan.interval_secs,
            self.auto_scan.priority,
            self.auto_scan.command.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Executor ──────────────────────────────────────────────────

/// Worker pool and activity log sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrent queued-task bodies. 0 = available parallelism.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Entries kept in the activity log ring buffer.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_max_workers() -> usize { 0 }
fn default_log_capacity() -> usize { 1000 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl ExecutorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_workers: profiled_env_parse(p, "EXECUTOR_MAX_WORKERS", default_max_workers()),
            log_capacity: profiled_env_parse(p, "EXECUTOR_LOG_CAPACITY", default_log_capacity()),
        }
    }

    /// Build a config with an explicit worker count.
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Self::default()
        }
    }

    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_workers
        }
    }
}

// ── Auto-scan ─────────────────────────────────────────────────

/// Recurring background discovery scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScanConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_auto_scan_interval")]
    pub interval_secs: u64,
    /// Queue priority of the background scan. Manual scans default higher.
    #[serde(default = "default_auto_scan_priority")]
    pub priority: i32,
    /// External command run by each auto-scan cycle (e.g. an nmap sweep).
    #[serde(default)]
    pub command: Option<String>,
}

fn default_auto_scan_interval() -> u64 { 300 }
fn default_auto_scan_priority() -> i32 { 1 }

impl Default for AutoScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_auto_scan_interval(),
            priority: default_auto_scan_priority(),
            command: None,
        }
    }
}

impl AutoScanConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "AUTO_SCAN_ENABLED", false),
            interval_secs: profiled_env_parse(p, "AUTO_SCAN_INTERVAL_SECS", default_auto_scan_interval()),
            priority: profiled_env_parse(p, "AUTO_SCAN_PRIORITY", default_auto_scan_priority()),
            command: profiled_env_opt(p, "AUTO_SCAN_COMMAND"),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
