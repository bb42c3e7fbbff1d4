//! Notification channels for triggered results

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::config::{AlertRecord, ChannelConfig, ChannelKind, ChatSettings, WebhookSettings};
use super::email::EmailChannel;
use crate::monitor::{MonitorResult, Rule};

/// What a channel did with an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Not attempted because the channel is missing configuration
    Skipped(String),
}

/// A destination for alerts
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError>;
}

/// Build the channel for a configuration
pub fn channel_for(
    config: &ChannelConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn AlertChannel>, NotifierError> {
    let channel: Arc<dyn AlertChannel> = match config.kind {
        ChannelKind::Log => Arc::new(LogChannel),
        ChannelKind::Email => Arc::new(EmailChannel::new(config.parse()?)),
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(config.parse()?, client)),
        ChannelKind::Slack => Arc::new(SlackChannel::new(config.parse()?, client)),
        ChannelKind::Dingtalk => Arc::new(DingtalkChannel::new(config.parse()?, client)),
    };
    Ok(channel)
}

/// Multi-line human-readable summary shared by the text channels
pub fn summary_lines(rule: &Rule, result: &MonitorResult) -> Vec<String> {
    vec![
        format!("Rule: {}", rule.name),
        format!("Diff count: {}", result.diff_count),
        format!("Diff percent: {:.2}%", result.diff_percent),
        format!("Rows (A): {}", result.row_count_a),
        format!("Rows (B): {}", result.row_count_b),
        format!("Time: {}", result.timestamp.to_rfc3339()),
    ]
}

/// Writes alerts to the tracing log at warn level
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError> {
        tracing::warn!(
            rule = %rule.name,
            diff_count = result.diff_count,
            diff_percent = result.diff_percent,
            rows_a = result.row_count_a,
            rows_b = result.row_count_b,
            "Monitor alert\n  {}",
            summary_lines(rule, result).join("\n  ")
        );
        Ok(Delivery::Sent)
    }
}

/// Posts the alert record as JSON
pub struct WebhookChannel {
    settings: WebhookSettings,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(settings: WebhookSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError> {
        let Some(url) = self.settings.url.as_deref() else {
            tracing::warn!(rule = %rule.name, "Webhook channel has no url configured, skipping");
            return Ok(Delivery::Skipped("no url configured".to_string()));
        };

        let payload = serde_json::to_value(AlertRecord::new(rule, result))
            .map_err(|e| NotifierError::Webhook(e.to_string()))?;

        post_json(
            &self.client,
            url,
            &payload,
            &self.settings.headers,
            Duration::from_secs(self.settings.timeout),
        )
        .await
        .map_err(NotifierError::Webhook)?;

        tracing::info!(rule = %rule.name, url = %url, "Webhook alert sent");
        Ok(Delivery::Sent)
    }
}

/// Slack incoming webhook
pub struct SlackChannel {
    settings: ChatSettings,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(settings: ChatSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    pub fn payload(rule: &Rule, result: &MonitorResult) -> serde_json::Value {
        let mut text = String::from(":rotating_light: *Data monitor alert*\n\n");
        text.push_str(&format!("*Rule:* {}\n", rule.name));
        text.push_str(&format!("*Diff count:* {}\n", result.diff_count));
        text.push_str(&format!("*Diff percent:* {:.2}%\n", result.diff_percent));
        text.push_str(&format!("*Rows (A):* {}\n", result.row_count_a));
        text.push_str(&format!("*Rows (B):* {}\n", result.row_count_b));
        text.push_str(&format!("*Time:* {}", result.timestamp.to_rfc3339()));

        serde_json::json!({ "text": text })
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError> {
        let Some(url) = self.settings.webhook_url.as_deref() else {
            tracing::warn!(rule = %rule.name, "Slack channel has no webhook_url configured, skipping");
            return Ok(Delivery::Skipped("no webhook_url configured".to_string()));
        };

        post_json(
            &self.client,
            url,
            &Self::payload(rule, result),
            &HashMap::new(),
            Duration::from_secs(self.settings.timeout),
        )
        .await
        .map_err(NotifierError::Slack)?;

        tracing::info!(rule = %rule.name, "Slack alert sent");
        Ok(Delivery::Sent)
    }
}

/// Dingtalk robot webhook
pub struct DingtalkChannel {
    settings: ChatSettings,
    client: reqwest::Client,
}

impl DingtalkChannel {
    pub fn new(settings: ChatSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    pub fn payload(rule: &Rule, result: &MonitorResult) -> serde_json::Value {
        let content = format!("Data monitor alert\n\n{}", summary_lines(rule, result).join("\n"));
        serde_json::json!({
            "msgtype": "text",
            "text": { "content": content }
        })
    }
}

#[async_trait]
impl AlertChannel for DingtalkChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Dingtalk
    }

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError> {
        let Some(url) = self.settings.webhook_url.as_deref() else {
            tracing::warn!(rule = %rule.name, "Dingtalk channel has no webhook_url configured, skipping");
            return Ok(Delivery::Skipped("no webhook_url configured".to_string()));
        };

        post_json(
            &self.client,
            url,
            &Self::payload(rule, result),
            &HashMap::new(),
            Duration::from_secs(self.settings.timeout),
        )
        .await
        .map_err(NotifierError::Dingtalk)?;

        tracing::info!(rule = %rule.name, "Dingtalk alert sent");
        Ok(Delivery::Sent)
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
    headers: &HashMap<String, String>,
    timeout: Duration,
) -> Result<(), String> {
    let mut request = client.post(url).json(payload).timeout(timeout);

    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("{} returned status {}", url, response.status()));
    }

    Ok(())
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Channel configuration error: {0}")]
    Config(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Slack error: {0}")]
    Slack(String),

    #[error("Dingtalk error: {0}")]
    Dingtalk(String),

    #[error("Email error: {0}")]
    Email(String),
}
