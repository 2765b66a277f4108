//! MQTT message bus for EdgeX event traffic
//!
//! Pure decision logic lives apart from the I/O so most of it can be tested
//! without a broker:
//!
//! - [`connection`] - connection states, reconnect pacing, option building
//! - [`message_handler`] - routing of `rumqttc` events and channel forwarding
//! - [`client`] - the event loop task and the [`MessageBus`](crate::transport::MessageBus) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use edgex_subscriber::config::MessageBusSection;
//! use edgex_subscriber::transport::mqtt::MqttBus;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let mut bus = MqttBus::new(MessageBusSection::default())?;
//! bus.connect().await?;
//!
//! let (messages_tx, _messages_rx) = mpsc::channel(100);
//! let (errors_tx, _errors_rx) = mpsc::channel(100);
//! bus.subscribe(&["edgex/events/#".to_string()], messages_tx, errors_tx)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttBus;
pub use connection::{
    configure_mqtt_options, qos_from_level, BusError, ConnectionState, ReconnectConfig,
    CONNACK_TIMEOUT,
};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
