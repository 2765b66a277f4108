//! EdgeX event subscriber
//!
//! Connects to an MQTT message bus, subscribes to EdgeX event topics, and
//! runs every delivery through a small dispatch pipeline: content-type
//! check, JSON decode, minimal validation, then a handler callback. An
//! optional publisher emits a synthetic test event on a fixed interval.
//!
//! # Overview
//!
//! - [`protocol`] - event and reading types, the message envelope codec, topic helpers
//! - [`transport`] - the [`MessageBus`](transport::MessageBus) trait and its MQTT implementation
//! - [`dispatch`] - the event dispatch loop
//! - [`handler`] - handler callbacks
//! - [`publisher`] - the periodic test-event publisher
//! - [`service`] - wiring of the above into a runnable service
//!
//! # Quick Start
//!
//! ```rust
//! use edgex_subscriber::dispatch::{DispatchOutcome, Dispatcher};
//! use edgex_subscriber::observability::DispatchMetrics;
//! use edgex_subscriber::protocol::{Event, MessageEnvelope, PayloadFormat};
//! use std::sync::Arc;
//!
//! let handler = |topic: &str, event: &Event| {
//!     println!("{topic}: {} from {}", event.id, event.device_name);
//! };
//! let dispatcher = Dispatcher::new(
//!     Arc::new(handler),
//!     PayloadFormat::Request,
//!     Arc::new(DispatchMetrics::new()),
//! );
//!
//! let payload = br#"{"apiVersion":"v3","requestId":"r1","event":{"id":"e1","deviceName":"d1"}}"#;
//! let envelope = MessageEnvelope::new_json(payload.to_vec());
//! assert_eq!(dispatcher.process_envelope(&envelope), DispatchOutcome::Handled);
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::SubscriberConfig;
pub use dispatch::{DispatchOutcome, DispatchSummary, Dispatcher};
pub use error::{SubscriberError, SubscriberResult};
pub use handler::{EventHandler, LoggingHandler};
pub use protocol::{Event, MessageEnvelope, PayloadFormat, Reading};
pub use service::SubscriberService;
