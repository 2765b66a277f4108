//! Message bus abstraction
//!
//! The dispatch loop and the publisher only see [`MessageBus`]; the MQTT
//! adapter in [`mqtt`] is the production implementation and
//! [`crate::testing::MockBus`] stands in for it in tests.

use crate::protocol::MessageEnvelope;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{BusError, ConnectionState, MqttBus};

/// Message bus client: connect, subscribe, publish, disconnect
///
/// `subscribe` hands the bus the sending halves of the message and error
/// channels; the bus forwards decoded envelopes and delivery errors into
/// them for as long as it is connected.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Connect to the broker
    async fn connect(&mut self) -> Result<(), BusError>;

    /// Subscribe to topic filters, delivering into the given channels
    async fn subscribe(
        &mut self,
        topics: &[String],
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError>;

    /// Publish an envelope to a topic
    async fn publish(&self, envelope: &MessageEnvelope, topic: &str) -> Result<(), BusError>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), BusError>;

    /// Check if the bus is currently connected
    fn is_connected(&self) -> bool;
}
