//! Alert dispatch across registered channels

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};

use super::config::{AlertRecord, ChannelConfig, ChannelKind};
use super::notifier::{channel_for, AlertChannel, Delivery, NotifierError};
use crate::monitor::{BoundedHistory, MonitorResult, Rule, DEFAULT_HISTORY_LIMIT};

struct RegisteredChannel {
    config: ChannelConfig,
    channel: Arc<dyn AlertChannel>,
}

/// Outcome of one channel's delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    Skipped(String),
    Failed(String),
}

/// Per-channel outcomes of one dispatch, in channel order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(ChannelKind, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, kind: ChannelKind) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ChannelOutcome::Failed(_)))
            .count()
    }
}

/// Delivers triggered results to every enabled channel
///
/// At most one channel per kind is registered. A failing channel never
/// prevents delivery to the others and never fails the dispatch itself.
pub struct AlertDispatcher {
    channels: RwLock<BTreeMap<ChannelKind, RegisteredChannel>>,
    history: Mutex<BoundedHistory<AlertRecord>>,
    client: reqwest::Client,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
            history: Mutex::new(BoundedHistory::new(limit)),
            client: reqwest::Client::new(),
        }
    }

    /// Register a channel, replacing any channel of the same kind
    pub fn register(&self, config: ChannelConfig) -> Result<Option<ChannelConfig>, NotifierError> {
        let channel = channel_for(&config, self.client.clone())?;
        Ok(self.register_channel(config, channel))
    }

    /// Register a custom channel implementation under `config.kind`
    pub fn register_channel(
        &self,
        config: ChannelConfig,
        channel: Arc<dyn AlertChannel>,
    ) -> Option<ChannelConfig> {
        let kind = config.kind;
        let previous = self
            .channels
            .write()
            .insert(kind, RegisteredChannel { config, channel })
            .map(|r| r.config);

        tracing::info!(channel = %kind, replaced = previous.is_some(), "Registered alert channel");
        previous
    }

    /// Remove a channel, returning whether it existed
    pub fn unregister(&self, kind: ChannelKind) -> bool {
        let removed = self.channels.write().remove(&kind).is_some();
        if removed {
            tracing::info!(channel = %kind, "Removed alert channel");
        }
        removed
    }

    /// Registered channel configurations
    pub fn channels(&self) -> Vec<ChannelConfig> {
        self.channels
            .read()
            .values()
            .map(|r| r.config.clone())
            .collect()
    }

    /// Record and deliver a triggered result; untriggered results are ignored
    pub async fn dispatch(&self, rule: &Rule, result: &MonitorResult) -> DispatchReport {
        if !result.triggered {
            return DispatchReport::default();
        }

        self.history.lock().push(AlertRecord::new(rule, result));

        // Deliver outside the registry lock
        let targets: Vec<(ChannelKind, Arc<dyn AlertChannel>)> = self
            .channels
            .read()
            .iter()
            .filter(|(_, r)| r.config.enabled)
            .map(|(kind, r)| (*kind, Arc::clone(&r.channel)))
            .collect();

        let mut report = DispatchReport::default();
        for (kind, channel) in targets {
            let attempt = AssertUnwindSafe(channel.deliver(rule, result))
                .catch_unwind()
                .await;

            let outcome = match attempt {
                Ok(Ok(Delivery::Sent)) => ChannelOutcome::Delivered,
                Ok(Ok(Delivery::Skipped(reason))) => ChannelOutcome::Skipped(reason),
                Ok(Err(e)) => {
                    tracing::error!(rule = %rule.name, channel = %kind, error = %e, "Failed to send alert");
                    ChannelOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    tracing::error!(rule = %rule.name, channel = %kind, "Alert channel panicked");
                    ChannelOutcome::Failed("channel panicked".to_string())
                }
            };
            report.outcomes.push((kind, outcome));
        }

        report
    }

    /// The last `limit` alerts, oldest first
    pub fn history(&self, limit: usize) -> Vec<AlertRecord> {
        self.history.lock().recent(limit)
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::CheckKind;
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn alert(triggered: bool) -> (Rule, MonitorResult) {
        let rule = Rule::new("orders", CheckKind::DataDiff, "db1", "orders");
        let result = MonitorResult {
            diff_count: 50,
            diff_percent: 5.0,
            row_count_a: 1000,
            row_count_b: 1000,
            triggered,
            ..MonitorResult::empty("orders")
        };
        (rule, result)
    }

    /// Serve `status` for every POST on a local port, returning the base url
    async fn serve_status(status: StatusCode) -> String {
        let app = Router::new().route("/hook", post(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/hook", addr)
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl AlertChannel for Counting {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Log
        }

        async fn deliver(&self, _rule: &Rule, _result: &MonitorResult) -> Result<Delivery, NotifierError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Delivery::Sent)
        }
    }

    struct Panicking;

    #[async_trait]
    impl AlertChannel for Panicking {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Email
        }

        async fn deliver(&self, _rule: &Rule, _result: &MonitorResult) -> Result<Delivery, NotifierError> {
            panic!("smtp exploded");
        }
    }

    #[tokio::test]
    async fn test_untriggered_is_noop() {
        let dispatcher = AlertDispatcher::new();
        dispatcher.register(ChannelConfig::new(ChannelKind::Log)).unwrap();

        let (rule, result) = alert(false);
        let report = dispatcher.dispatch(&rule, &result).await;

        assert!(report.outcomes.is_empty());
        assert!(dispatcher.history(10).is_empty());
    }

    #[tokio::test]
    async fn test_failing_webhook_does_not_block_log() {
        let url = serve_status(StatusCode::INTERNAL_SERVER_ERROR).await;
        let dispatcher = AlertDispatcher::new();
        dispatcher
            .register(ChannelConfig::new(ChannelKind::Webhook).with_setting("url", url))
            .unwrap();
        dispatcher.register(ChannelConfig::new(ChannelKind::Log)).unwrap();

        let (rule, result) = alert(true);
        let report = dispatcher.dispatch(&rule, &result).await;

        assert_eq!(report.outcome(ChannelKind::Log), Some(&ChannelOutcome::Delivered));
        assert!(matches!(
            report.outcome(ChannelKind::Webhook),
            Some(ChannelOutcome::Failed(_))
        ));
        assert_eq!(report.failures(), 1);
        assert_eq!(dispatcher.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_successful_webhook() {
        let url = serve_status(StatusCode::OK).await;
        let dispatcher = AlertDispatcher::new();
        dispatcher
            .register(ChannelConfig::new(ChannelKind::Webhook).with_setting("url", url))
            .unwrap();

        let (rule, result) = alert(true);
        let report = dispatcher.dispatch(&rule, &result).await;
        assert_eq!(
            report.outcome(ChannelKind::Webhook),
            Some(&ChannelOutcome::Delivered)
        );
    }

    #[tokio::test]
    async fn test_panicking_channel_is_isolated() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = AlertDispatcher::new();
        dispatcher.register_channel(ChannelConfig::new(ChannelKind::Email), Arc::new(Panicking));
        dispatcher.register_channel(
            ChannelConfig::new(ChannelKind::Log),
            Arc::new(Counting(Arc::clone(&count))),
        );

        let (rule, result) = alert(true);
        let report = dispatcher.dispatch(&rule, &result).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_replaced_channels() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = AlertDispatcher::new();
        dispatcher.register_channel(
            ChannelConfig::new(ChannelKind::Log),
            Arc::new(Counting(Arc::clone(&count))),
        );
        let previous = dispatcher.register_channel(
            ChannelConfig::new(ChannelKind::Log).with_enabled(false),
            Arc::new(Counting(Arc::clone(&count))),
        );

        assert!(previous.is_some());
        assert_eq!(dispatcher.channels().len(), 1);

        let (rule, result) = alert(true);
        let report = dispatcher.dispatch(&rule, &result).await;

        assert!(report.outcomes.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // Recorded even though no channel received it
        assert_eq!(dispatcher.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let dispatcher = AlertDispatcher::new();
        dispatcher.register(ChannelConfig::new(ChannelKind::Log)).unwrap();

        assert!(dispatcher.unregister(ChannelKind::Log));
        assert!(!dispatcher.unregister(ChannelKind::Log));
        assert!(dispatcher.channels().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dispatcher = AlertDispatcher::with_history_limit(1000);
        let (rule, mut result) = alert(true);

        for i in 0..1001 {
            result.diff_count = i;
            dispatcher.dispatch(&rule, &result).await;
        }

        let history = dispatcher.history(5000);
        assert_eq!(history.len(), 1000);
        assert_eq!(history[0].diff_count, 1);
        assert_eq!(dispatcher.history(1)[0].diff_count, 1000);
    }
}
