//! Structured logging and dispatch counters

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_default_logging, init_logging, parse_level};
pub use metrics::{DispatchMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span};
