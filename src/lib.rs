//! diffwatch: scheduled data-consistency monitoring
//!
//! Rules compare a table against a replica (or against itself) on a cron
//! schedule, record each outcome in a bounded history, and raise alerts
//! through pluggable channels when a threshold is breached.
//!
//! # Features
//!
//! - **Checks**: row-level data diff, row count comparison, schema drift
//! - **Thresholds**: diff count, diff percent or row count difference against
//!   `>`, `>=`, `<`, `<=`, `==`, `!=`
//! - **Alerts**: log, email (SMTP), generic webhook, Slack, Dingtalk
//! - **Scheduling**: five-field cron with single catch-up after an outage
//!
//! # Example
//!
//! ```no_run
//! use diffwatch::monitor::{CheckKind, Monitor, Rule, ThresholdKind, ThresholdOperator};
//! use diffwatch::source::MemoryCatalog;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = MemoryCatalog::new();
//! let monitor = Monitor::new(Arc::new(catalog.clone()), Arc::new(catalog));
//!
//! monitor.add_rule(
//!     Rule::new("orders_sync", CheckKind::DataDiff, "primary", "orders")
//!         .with_target("replica", "orders")
//!         .with_threshold(ThresholdKind::DiffPercent, ThresholdOperator::Gt, 1.0)
//!         .with_schedule("0 */6 * * *"),
//! )?;
//!
//! let result = monitor.run_rule("orders_sync").await?;
//! println!("diff: {} ({:.2}%)", result.diff_count, result.diff_percent);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod monitor;
pub mod scheduler;
pub mod source;

// Re-export commonly used types
pub use alerts::{AlertDispatcher, ChannelConfig, ChannelKind};
pub use monitor::{CheckKind, Monitor, MonitorError, MonitorResult, Rule};
pub use scheduler::{MonitorScheduler, SchedulerConfig};
