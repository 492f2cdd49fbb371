//! Configuration resolution for procrunner.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/procrunner/settings.json)
//! 3. Project config (.procrunner/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete procrunner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduling and process supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum number of simultaneously running commands.
    pub concurrent_processes: usize,
    /// Randomize the gap between two launches.
    pub auto_delay: bool,
    /// Lower bound (inclusive) of the random launch gap, in seconds.
    pub delay_min_secs: u64,
    /// Upper bound (exclusive) of the random launch gap, in seconds.
    pub delay_max_secs: u64,
    /// Shuffle the whole queue before the first launch.
    pub shuffle: bool,
    pub poll_interval_ms: u64,
    /// Output rows kept per process before the oldest are evicted.
    pub max_output_rows: usize,
    /// Directory holding the single-instance lock files.
    pub lock_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrent_processes: 4,
            auto_delay: false,
            delay_min_secs: 30,
            delay_max_secs: 90,
            shuffle: false,
            poll_interval_ms: 250,
            max_output_rows: 1000,
            lock_dir: None,
        }
    }
}

impl RunnerConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Range the auto-delay is drawn from, `None` when auto-delay is off.
    pub const fn delay_range(&self) -> Option<(Duration, Duration)> {
        if self.auto_delay {
            Some((
                Duration::from_secs(self.delay_min_secs),
                Duration::from_secs(self.delay_max_secs),
            ))
        } else {
            None
        }
    }

    /// Lock directory, falling back to the user runtime dir or the temp dir.
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Status display settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show the full accumulated output instead of the last rows.
    pub show_detailed_logs: bool,
    /// Rows shown per process when detailed logs are off.
    pub tail_rows: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_detailed_logs: false,
            tail_rows: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit level; unset picks one from [`LoggingConfig::effective_level`].
    pub level: Option<String>,
    pub json: bool,
}

impl LoggingConfig {
    /// The configured level, or `warn` while the live status display owns
    /// the terminal and `info` otherwise.
    ///
    /// Log lines written between two redraws would shift the redrawn frame.
    pub fn effective_level(&self, interactive: bool) -> &str {
        match &self.level {
            Some(level) => level,
            None if interactive => "warn",
            None => "info",
        }
    }
}

impl Config {
    /// Reject settings the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let runner = &self.runner;
        if runner.concurrent_processes == 0 {
            return Err(Error::Config(
                "concurrent_processes must be at least 1".to_string(),
            ));
        }
        if runner.max_output_rows == 0 {
            return Err(Error::Config(
                "max_output_rows must be at least 1".to_string(),
            ));
        }
        if runner.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if runner.auto_delay && runner.delay_min_secs >= runner.delay_max_secs {
            return Err(Error::Config(format!(
                "delay range [{}, {}) is empty",
                runner.delay_min_secs, runner.delay_max_secs
            )));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    load_config_from(
        global_config_path().as_deref(),
        project_dir,
        |key| std::env::var(key).ok(),
    )
}

/// Load configuration from explicit sources.
///
/// `env` looks up environment variables by name.
pub fn load_config_from(
    global_path: Option<&Path>,
    project_dir: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path
        && path.exists()
    {
        merge_json(&mut merged, load_config_file(path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".procrunner").join("settings.json");
        if project_path.exists() {
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("procrunner").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`; keys absent from the overlay keep their
/// base value.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(n) = env("PROCRUNNER_CONCURRENT_PROCESSES").and_then(|v| v.parse().ok()) {
        config.runner.concurrent_processes = n;
    }
    if let Some(flag) = env("PROCRUNNER_AUTO_DELAY").and_then(|v| parse_flag(&v)) {
        config.runner.auto_delay = flag;
    }
    if let Some(flag) = env("PROCRUNNER_SHOW_DETAILED_LOGS").and_then(|v| parse_flag(&v)) {
        config.display.show_detailed_logs = flag;
    }
    if let Some(n) = env("PROCRUNNER_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.runner.poll_interval_ms = n;
    }
    if let Some(dir) = env("PROCRUNNER_LOCK_DIR") {
        config.runner.lock_dir = Some(PathBuf::from(dir));
    }
    if let Some(flag) = env("PROCRUNNER_SHUFFLE").and_then(|v| parse_flag(&v)) {
        config.runner.shuffle = flag;
    }
    if let Some(n) = env("PROCRUNNER_MAX_OUTPUT_ROWS").and_then(|v| v.parse().ok()) {
        config.runner.max_output_rows = n;
    }
    if let Some(n) = env("PROCRUNNER_DELAY_MIN_SECS").and_then(|v| v.parse().ok()) {
        config.runner.delay_min_secs = n;
    }
    if let Some(n) = env("PROCRUNNER_DELAY_MAX_SECS").and_then(|v| v.parse().ok()) {
        config.runner.delay_max_secs = n;
    }
    if let Some(n) = env("PROCRUNNER_TAIL_ROWS").and_then(|v| v.parse().ok()) {
        config.display.tail_rows = n;
    }
    if let Some(level) = env("PROCRUNNER_LOG_LEVEL") {
        config.logging.level = Some(level);
    }
    if let Some(flag) = env("PROCRUNNER_LOG_JSON").and_then(|v| parse_flag(&v)) {
        config.logging.json = flag;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.runner.concurrent_processes, 4);
        assert_eq!(config.runner.max_output_rows, 1000);
        assert_eq!(config.runner.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.display.tail_rows, 5);
        assert!(config.runner.delay_range().is_none());
    }

    #[test]
    fn delay_range_when_enabled() {
        let mut config = Config::default();
        config.runner.auto_delay = true;
        assert_eq!(
            config.runner.delay_range(),
            Some((Duration::from_secs(30), Duration::from_secs(90)))
        );
    }

    #[test]
    fn project_file_overrides_only_given_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".procrunner")).unwrap();
        std::fs::write(
            dir.path().join(".procrunner").join("settings.json"),
            r#"{"runner": {"concurrent_processes": 8}}"#,
        )
        .unwrap();

        let config = load_config_from(None, Some(dir.path()), no_env).unwrap();
        assert_eq!(config.runner.concurrent_processes, 8);
        assert_eq!(config.runner.max_output_rows, 1000);
        assert_eq!(config.logging.level, None);
    }

    #[test]
    fn project_file_wins_over_global() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(
            &global,
            r#"{"runner": {"concurrent_processes": 2, "shuffle": true}}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join(".procrunner")).unwrap();
        std::fs::write(
            dir.path().join(".procrunner").join("settings.json"),
            r#"{"runner": {"concurrent_processes": 6}}"#,
        )
        .unwrap();

        let config = load_config_from(Some(&global), Some(dir.path()), no_env).unwrap();
        assert_eq!(config.runner.concurrent_processes, 6);
        assert!(config.runner.shuffle);
    }

    #[test]
    fn env_overrides_files() {
        let env = |key: &str| match key {
            "PROCRUNNER_CONCURRENT_PROCESSES" => Some("3".to_string()),
            "PROCRUNNER_AUTO_DELAY" => Some("yes".to_string()),
            "PROCRUNNER_LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        };
        let config = load_config_from(None, None, env).unwrap();
        assert_eq!(config.runner.concurrent_processes, 3);
        assert!(config.runner.auto_delay);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn env_covers_output_and_logging_fields() {
        let env = |key: &str| match key {
            "PROCRUNNER_SHUFFLE" => Some("on".to_string()),
            "PROCRUNNER_MAX_OUTPUT_ROWS" => Some("50".to_string()),
            "PROCRUNNER_DELAY_MIN_SECS" => Some("5".to_string()),
            "PROCRUNNER_DELAY_MAX_SECS" => Some("10".to_string()),
            "PROCRUNNER_TAIL_ROWS" => Some("3".to_string()),
            "PROCRUNNER_LOG_JSON" => Some("true".to_string()),
            _ => None,
        };
        let config = load_config_from(None, None, env).unwrap();
        assert!(config.runner.shuffle);
        assert_eq!(config.runner.max_output_rows, 50);
        assert_eq!(config.runner.delay_min_secs, 5);
        assert_eq!(config.runner.delay_max_secs, 10);
        assert_eq!(config.display.tail_rows, 3);
        assert!(config.logging.json);
    }

    #[test]
    fn unset_level_is_quiet_under_the_live_display() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.effective_level(true), "warn");
        assert_eq!(logging.effective_level(false), "info");

        logging.level = Some("debug".to_string());
        assert_eq!(logging.effective_level(true), "debug");
    }

    #[test]
    fn level_from_file_survives_merge() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(&global, r#"{"logging": {"level": "trace"}}"#).unwrap();
        let config = load_config_from(Some(&global), None, no_env).unwrap();
        assert_eq!(config.logging.effective_level(true), "trace");
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let env = |key: &str| match key {
            "PROCRUNNER_CONCURRENT_PROCESSES" => Some("many".to_string()),
            "PROCRUNNER_AUTO_DELAY" => Some("maybe".to_string()),
            _ => None,
        };
        let config = load_config_from(None, None, env).unwrap();
        assert_eq!(config.runner.concurrent_processes, 4);
        assert!(!config.runner.auto_delay);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(&global, "{not json").unwrap();
        let err = load_config_from(Some(&global), None, no_env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.runner.concurrent_processes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_delay_range() {
        let mut config = Config::default();
        config.runner.auto_delay = true;
        config.runner.delay_min_secs = 60;
        config.runner.delay_max_secs = 60;
        assert!(config.validate().is_err());

        config.runner.auto_delay = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn explicit_lock_dir_is_used() {
        let mut config = Config::default();
        config.runner.lock_dir = Some(PathBuf::from("/var/lock/procrunner"));
        assert_eq!(
            config.runner.lock_dir(),
            PathBuf::from("/var/lock/procrunner")
        );
    }
}
