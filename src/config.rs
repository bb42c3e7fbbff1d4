//! Process configuration
//!
//! Environment variables:
//! - DIFFWATCH_HOST: Bind address (default: 0.0.0.0)
//! - DIFFWATCH_PORT: Port number (default: 8080)
//! - DIFFWATCH_POLL_INTERVAL_MS: Scheduler tick period (default: 1000)
//! - DIFFWATCH_ERROR_BACKOFF_MS: Pause after a failed tick (default: 5000)
//! - DIFFWATCH_STOP_TIMEOUT_MS: Bounded wait when stopping (default: 5000)
//! - DIFFWATCH_HISTORY_LIMIT: Result and alert history capacity (default: 1000)
//! - DIFFWATCH_CONFIG: Optional JSON bootstrap file with rules and channels

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::{AlertDispatcher, ChannelConfig, NotifierError};
use crate::api::ServerConfig;
use crate::monitor::{Monitor, MonitorError, Rule, DEFAULT_HISTORY_LIMIT};
use crate::scheduler::SchedulerConfig;

pub const ENV_HOST: &str = "DIFFWATCH_HOST";
pub const ENV_PORT: &str = "DIFFWATCH_PORT";
pub const ENV_POLL_INTERVAL_MS: &str = "DIFFWATCH_POLL_INTERVAL_MS";
pub const ENV_ERROR_BACKOFF_MS: &str = "DIFFWATCH_ERROR_BACKOFF_MS";
pub const ENV_STOP_TIMEOUT_MS: &str = "DIFFWATCH_STOP_TIMEOUT_MS";
pub const ENV_HISTORY_LIMIT: &str = "DIFFWATCH_HISTORY_LIMIT";
pub const ENV_CONFIG: &str = "DIFFWATCH_CONFIG";

/// Everything the binary needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub history_limit: usize,
    pub bootstrap: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            bootstrap: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_HOST) {
            config.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, ENV_PORT)? {
            config.server.port = port;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_POLL_INTERVAL_MS)? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_POLL_INTERVAL_MS,
                    value: ms.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.scheduler.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_ERROR_BACKOFF_MS)? {
            config.scheduler.error_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_STOP_TIMEOUT_MS)? {
            config.scheduler.stop_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var(&lookup, ENV_HISTORY_LIMIT)? {
            config.history_limit = limit;
        }
        config.bootstrap = lookup(ENV_CONFIG)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<T>();
    parsed
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            message: e.to_string(),
            value: raw,
        })
}

/// Rules and channels loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Start the scheduler once everything is registered
    #[serde(default)]
    pub autostart: bool,
}

impl Bootstrap {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Register every rule and channel, stopping at the first rejection
    pub fn apply(&self, monitor: &Monitor, dispatcher: &AlertDispatcher) -> Result<(), ConfigError> {
        for rule in &self.rules {
            monitor.add_rule(rule.clone())?;
        }
        for channel in &self.channels {
            dispatcher.register(channel.clone())?;
        }

        tracing::info!(
            rules = self.rules.len(),
            channels = self.channels.len(),
            "Applied bootstrap configuration"
        );
        Ok(())
    }
}

/// Startup configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: &'static str,
        value: String,
        message: String,
    },

    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Rule(#[from] MonitorError),

    #[error(transparent)]
    Channel(#[from] NotifierError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ChannelKind;
    use crate::source::MemoryCatalog;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(config.scheduler.error_backoff, Duration::from_secs(5));
        assert_eq!(config.history_limit, 1000);
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_HOST, "127.0.0.1"),
            (ENV_PORT, "9090"),
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_HISTORY_LIMIT, "50"),
            (ENV_CONFIG, "/etc/diffwatch.json"),
        ]))
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(250));
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.bootstrap, Some(PathBuf::from("/etc/diffwatch.json")));
    }

    #[test]
    fn test_invalid_values() {
        let err = AppConfig::from_lookup(lookup(&[(ENV_PORT, "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: ENV_PORT, .. }));

        let err = AppConfig::from_lookup(lookup(&[(ENV_POLL_INTERVAL_MS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_and_apply_bootstrap() {
        let file = write_config(
            r#"{
                "rules": [{
                    "name": "orders_rows",
                    "check": "row_count",
                    "source_a": "db1",
                    "table_a": "orders",
                    "source_b": "db2",
                    "table_b": "orders",
                    "threshold_kind": "row_count_diff",
                    "threshold_operator": ">",
                    "threshold_value": 0,
                    "schedule": "*/5 * * * *"
                }],
                "channels": [{"kind": "log"}],
                "autostart": true
            }"#,
        );

        let bootstrap = Bootstrap::load(file.path()).unwrap();
        assert!(bootstrap.autostart);

        let catalog = MemoryCatalog::new();
        let monitor = Monitor::new(Arc::new(catalog.clone()), Arc::new(catalog));
        let dispatcher = AlertDispatcher::new();
        bootstrap.apply(&monitor, &dispatcher).unwrap();

        let rule = monitor.get_rule("orders_rows").unwrap();
        assert_eq!(rule.key_columns, vec!["id"]);
        assert!(rule.enabled);
        assert_eq!(dispatcher.channels()[0].kind, ChannelKind::Log);

        // Tables are not loaded, so the run records a failure
        let result = tokio_test::block_on(monitor.run_rule("orders_rows")).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_bootstrap_errors() {
        let missing = Bootstrap::load(Path::new("/nonexistent/diffwatch.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let file = write_config("{not json");
        assert!(matches!(
            Bootstrap::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let file = write_config(
            r#"{"rules": [{"name": "bad", "check": "row_count", "source_a": "db1",
                "table_a": "t", "schedule": "every day"}]}"#,
        );
        let bootstrap = Bootstrap::load(file.path()).unwrap();
        let catalog = MemoryCatalog::new();
        let monitor = Monitor::new(Arc::new(catalog.clone()), Arc::new(catalog));

        assert!(matches!(
            bootstrap.apply(&monitor, &AlertDispatcher::new()),
            Err(ConfigError::Rule(MonitorError::InvalidSchedule { .. }))
        ));
    }
}
