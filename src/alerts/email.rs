//! SMTP alert channel

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::config::{ChannelKind, EmailSettings};
use super::notifier::{AlertChannel, Delivery, NotifierError};
use crate::monitor::{MonitorResult, Rule};

pub struct EmailChannel {
    settings: EmailSettings,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }

    pub fn subject(rule: &Rule) -> String {
        format!("Data monitor alert: {}", rule.name)
    }

    pub fn body(rule: &Rule, result: &MonitorResult) -> String {
        let stats = serde_json::to_string_pretty(&result.stats).unwrap_or_else(|_| "{}".to_string());

        format!(
            "Rule: {}\nDescription: {}\n\nDetails:\n- Diff count: {}\n- Diff percent: {:.2}%\n- Rows (A): {}\n- Rows (B): {}\n- Time: {}\n- Duration: {:.2}s\n\nStatistics:\n{}\n",
            rule.name,
            rule.description.as_deref().unwrap_or("none"),
            result.diff_count,
            result.diff_percent,
            result.row_count_a,
            result.row_count_b,
            result.timestamp.to_rfc3339(),
            result.duration_secs,
            stats,
        )
    }

    fn message(&self, rule: &Rule, result: &MonitorResult) -> Result<Message, NotifierError> {
        let from: Mailbox = self
            .settings
            .from_email
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifierError::Email(e.to_string()))?;

        let mut builder = Message::builder().from(from).subject(Self::subject(rule));
        for recipient in &self.settings.to_emails {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e: lettre::address::AddressError| NotifierError::Email(e.to_string()))?;
            builder = builder.to(to);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(rule, result))
            .map_err(|e| NotifierError::Email(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifierError> {
        let settings = &self.settings;
        let transport = match settings.credentials() {
            Some((user, password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
                    .map_err(|e| NotifierError::Email(e.to_string()))?
                    .port(settings.smtp_port)
                    .credentials(Credentials::new(user.to_string(), password.to_string()))
                    .timeout(Some(settings.timeout()))
                    .build()
            }
            None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.smtp_host)
                .port(settings.smtp_port)
                .timeout(Some(settings.timeout()))
                .build(),
        };
        Ok(transport)
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn deliver(&self, rule: &Rule, result: &MonitorResult) -> Result<Delivery, NotifierError> {
        if self.settings.to_emails.is_empty() {
            tracing::warn!(rule = %rule.name, "Email channel has no recipients configured, skipping");
            return Ok(Delivery::Skipped("no recipients configured".to_string()));
        }

        let message = self.message(rule, result)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| NotifierError::Email(e.to_string()))?;

        tracing::info!(
            rule = %rule.name,
            recipients = ?self.settings.to_emails,
            "Email alert sent"
        );
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::ChannelConfig;
    use crate::monitor::CheckKind;

    fn settings(config: ChannelConfig) -> EmailSettings {
        config.parse().unwrap()
    }

    fn alert() -> (Rule, MonitorResult) {
        let rule = Rule::new("orders", CheckKind::DataDiff, "db1", "orders")
            .with_description("nightly replica check");
        let mut result = MonitorResult::empty("orders");
        result.diff_count = 7;
        result.diff_percent = 0.7;
        result.stats.insert("updated".to_string(), 7.into());
        (rule, result)
    }

    #[tokio::test]
    async fn test_no_recipients_is_skip() {
        let (rule, result) = alert();
        let channel = EmailChannel::new(settings(ChannelConfig::new(ChannelKind::Email)));

        let delivery = channel.deliver(&rule, &result).await.unwrap();
        assert!(matches!(delivery, Delivery::Skipped(_)));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_failure() {
        let (rule, result) = alert();
        let channel = EmailChannel::new(settings(
            ChannelConfig::new(ChannelKind::Email)
                .with_setting("to_emails", serde_json::json!(["not an address"])),
        ));

        let delivery = channel.deliver(&rule, &result).await;
        assert!(matches!(delivery, Err(NotifierError::Email(_))));
    }

    #[test]
    fn test_message_contents() {
        let (rule, result) = alert();
        assert_eq!(EmailChannel::subject(&rule), "Data monitor alert: orders");

        let body = EmailChannel::body(&rule, &result);
        assert!(body.contains("Description: nightly replica check"));
        assert!(body.contains("Diff percent: 0.70%"));
        assert!(body.contains("\"updated\": 7"));
    }

    #[test]
    fn test_message_has_all_recipients() {
        let (rule, result) = alert();
        let channel = EmailChannel::new(settings(
            ChannelConfig::new(ChannelKind::Email)
                .with_setting("to_emails", serde_json::json!(["a@example.com", "b@example.com"])),
        ));

        let message = channel.message(&rule, &result).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
        assert!(raw.contains("Subject: Data monitor alert: orders"));
    }
}
