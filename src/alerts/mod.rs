//! Alert dispatch for triggered results
//!
//! Channels (log, email, generic webhook, Slack, Dingtalk) are registered
//! with the [`AlertDispatcher`], which records every triggered result and
//! delivers it to each enabled channel independently.

pub mod config;
pub mod dispatcher;
pub mod email;
pub mod notifier;

pub use config::{AlertRecord, ChannelConfig, ChannelKind};
pub use dispatcher::{AlertDispatcher, ChannelOutcome, DispatchReport};
pub use notifier::{AlertChannel, Delivery, NotifierError};
