//! Pure connection state management for the MQTT bus
//!
//! Connection states, reconnection pacing, the bus error type, and the
//! translation of [`MessageBusSection`] into `rumqttc` options.

use crate::config::{ConfigError, MessageBusSection};
use crate::protocol::EnvelopeError;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Connection state for the MQTT bus
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Waiting to poll again after a failure (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

impl ConnectionState {
    /// Publishing and subscribing need a live session
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Result of waiting for the first ConnAck; `None` while still undecided
    pub fn setup_outcome(&self) -> Option<Result<(), String>> {
        match self {
            ConnectionState::Connected => Some(Ok(())),
            ConnectionState::Disconnected(reason) => Some(Err(reason.clone())),
            ConnectionState::PermanentlyDisconnected(reason) => {
                Some(Err(format!("Permanently disconnected: {reason}")))
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting(_) => None,
        }
    }
}

/// How long `connect` waits for the broker's first ConnAck
pub const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnection pacing for a session that was already established
///
/// The first connection attempt is never retried.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay per attempt in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![100, 250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Attempt number and delay (ms) for the retry that follows
    /// `failed_attempts` consecutive failures; `None` once the budget is spent
    pub fn next_attempt(&self, failed_attempts: u32) -> Option<(u32, u64)> {
        if self
            .max_attempts
            .is_some_and(|max_attempts| failed_attempts >= max_attempts)
        {
            return None;
        }
        let attempt = failed_attempts + 1;
        Some((attempt, self.calculate_backoff_delay(attempt)))
    }

    /// Calculate backoff delay for given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Message bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Message delivery error: {0}")]
    Delivery(String),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("Invalid bus configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Map a numeric QoS level onto `rumqttc`'s enum
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MessageBusSection) -> Result<MqttOptions, BusError> {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if config.use_tls()? {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}
