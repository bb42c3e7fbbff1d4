//! Alert channel configuration types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::notifier::NotifierError;
use crate::monitor::{CheckKind, MonitorResult, Rule};

/// Default timeout for network deliveries
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Alert delivery channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Log,
    Email,
    Webhook,
    Slack,
    Dingtalk,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Log => "log",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Slack => "slack",
            ChannelKind::Dingtalk => "dingtalk",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(ChannelKind::Log),
            "email" => Ok(ChannelKind::Email),
            "webhook" => Ok(ChannelKind::Webhook),
            "slack" => Ok(ChannelKind::Slack),
            "dingtalk" => Ok(ChannelKind::Dingtalk),
            other => Err(NotifierError::Config(format!("unknown channel kind '{}'", other))),
        }
    }
}

/// Registered channel: kind, enablement and a free-form settings blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            enabled: true,
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Parse the settings blob into a typed settings struct
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, NotifierError> {
        serde_json::from_value(serde_json::Value::Object(self.settings.clone())).map_err(|e| {
            NotifierError::Config(format!("invalid {} settings: {}", self.kind, e))
        })
    }
}

/// SMTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default)]
    pub to_emails: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl EmailSettings {
    /// Credentials, only when both user and password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.smtp_user, &self.smtp_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user.as_str(), password.as_str()))
            }
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_from_email() -> String {
    "data-monitor@example.com".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Generic webhook settings
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Slack and Dingtalk incoming-webhook settings
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Snapshot of a triggered result and its rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub rule_name: String,
    pub description: Option<String>,
    pub check: CheckKind,
    pub timestamp: DateTime<Utc>,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_a: u64,
    pub row_count_b: u64,
    pub duration_secs: f64,
    pub stats: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
}

impl AlertRecord {
    pub fn new(rule: &Rule, result: &MonitorResult) -> Self {
        Self {
            rule_name: rule.name.clone(),
            description: rule.description.clone(),
            check: rule.check,
            timestamp: result.timestamp,
            diff_count: result.diff_count,
            diff_percent: result.diff_percent,
            row_count_a: result.row_count_a,
            row_count_b: result.row_count_b,
            duration_secs: result.duration_secs,
            stats: result.stats.clone(),
            error: result.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_defaults() {
        let config = ChannelConfig::new(ChannelKind::Email);
        let settings: EmailSettings = config.parse().unwrap();

        assert_eq!(settings.smtp_host, "localhost");
        assert_eq!(settings.smtp_port, 25);
        assert_eq!(settings.from_email, "data-monitor@example.com");
        assert!(settings.to_emails.is_empty());
        assert!(settings.credentials().is_none());
    }

    #[test]
    fn test_email_credentials_need_both_parts() {
        let config = ChannelConfig::new(ChannelKind::Email).with_setting("smtp_user", "bot");
        let settings: EmailSettings = config.parse().unwrap();
        assert!(settings.credentials().is_none());

        let config = config.with_setting("smtp_password", "secret");
        let settings: EmailSettings = config.parse().unwrap();
        assert_eq!(settings.credentials(), Some(("bot", "secret")));
    }

    #[test]
    fn test_invalid_settings() {
        let config = ChannelConfig::new(ChannelKind::Webhook).with_setting("timeout", "soon");
        let result: Result<WebhookSettings, _> = config.parse();
        assert!(matches!(result, Err(NotifierError::Config(_))));
    }

    #[test]
    fn test_channel_kind_from_str() {
        assert_eq!("Slack".parse::<ChannelKind>().unwrap(), ChannelKind::Slack);
        assert!("pager".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_channel_config_deserialize() {
        let config: ChannelConfig = serde_json::from_value(serde_json::json!({
            "kind": "webhook",
            "settings": {"url": "http://localhost:9/hook"}
        }))
        .unwrap();

        assert!(config.enabled);
        let settings: WebhookSettings = config.parse().unwrap();
        assert_eq!(settings.url.as_deref(), Some("http://localhost:9/hook"));
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT_SECS);
    }
}
