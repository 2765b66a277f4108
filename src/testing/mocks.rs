//! Mock implementations for testing

use crate::handler::EventHandler;
use crate::protocol::{Event, MessageEnvelope};
use crate::transport::{BusError, ConnectionState, MessageBus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub type PublishedEnvelope = (String, MessageEnvelope);

type Channels = (mpsc::Sender<MessageEnvelope>, mpsc::Sender<BusError>);

/// In-memory [`MessageBus`]
///
/// Clones share all recorded state, so a test can keep one handle while the
/// code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    pub published: Arc<Mutex<Vec<PublishedEnvelope>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub connect_calls: Arc<AtomicUsize>,
    pub disconnect_calls: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    channels: Arc<Mutex<Option<Channels>>>,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    pub fail_publish: bool,
    pub fail_disconnect: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose every operation fails
    pub fn with_failure() -> Self {
        Self {
            fail_connect: true,
            fail_subscribe: true,
            fail_publish: true,
            fail_disconnect: true,
            ..Default::default()
        }
    }

    /// A bus that is already connected
    pub fn connected() -> Self {
        let bus = Self::default();
        bus.connected.store(true, Ordering::SeqCst);
        bus
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    pub async fn get_published(&self) -> Vec<PublishedEnvelope> {
        self.published.lock().await.clone()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Push an envelope into the message channel registered by `subscribe`
    pub async fn deliver(&self, envelope: MessageEnvelope) -> bool {
        let sender = self.channels.lock().await.as_ref().map(|(tx, _)| tx.clone());
        match sender {
            Some(sender) => sender.send(envelope).await.is_ok(),
            None => false,
        }
    }

    /// Push a transport error into the error channel registered by `subscribe`
    pub async fn deliver_error(&self, error: BusError) -> bool {
        let sender = self.channels.lock().await.as_ref().map(|(_, tx)| tx.clone());
        match sender {
            Some(sender) => sender.send(error).await.is_ok(),
            None => false,
        }
    }

    /// Drop the registered senders so both channels close
    pub async fn close_channels(&self) {
        self.channels.lock().await.take();
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(BusError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topics: &[String],
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError> {
        if self.fail_subscribe {
            return Err(BusError::SubscriptionFailed(
                "Mock subscription failure".to_string(),
            ));
        }
        if !self.is_connected() {
            return Err(BusError::NotConnected {
                state: ConnectionState::Disconnected("mock not connected".to_string()),
            });
        }
        self.subscriptions.lock().await.extend_from_slice(topics);
        *self.channels.lock().await = Some((messages, errors));
        Ok(())
    }

    async fn publish(&self, envelope: &MessageEnvelope, topic: &str) -> Result<(), BusError> {
        if self.fail_publish {
            return Err(BusError::PublishFailed(
                "Mock publish failure".to_string().into(),
            ));
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), envelope.clone()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(BusError::ConnectionFailedStr(
                "Mock disconnect failure".to_string(),
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Handler that remembers every `(topic, event)` it was given
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<std::sync::Mutex<Vec<(String, Event)>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Event)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, topic: &str, event: &Event) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((topic.to_string(), event.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_bus_records_publishes() {
        let bus = MockBus::connected();
        let envelope = MessageEnvelope::new_json(b"{}".to_vec());
        bus.publish(&envelope, "edgex/events/test").await.unwrap();

        let published = bus.get_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "edgex/events/test");
        assert_eq!(published[0].1, envelope);
    }

    #[tokio::test]
    async fn test_mock_bus_delivers_after_subscribe() {
        let mut bus = MockBus::new();
        let (messages_tx, mut messages_rx) = mpsc::channel(4);
        let (errors_tx, _errors_rx) = mpsc::channel(4);

        assert!(!bus.deliver(MessageEnvelope::default()).await);
        bus.connect().await.unwrap();
        bus.subscribe(&["edgex/events/#".to_string()], messages_tx, errors_tx)
            .await
            .unwrap();

        assert!(bus.deliver(MessageEnvelope::default()).await);
        assert!(messages_rx.recv().await.is_some());
        assert_eq!(bus.get_subscriptions().await, vec!["edgex/events/#"]);

        bus.close_channels().await;
        assert!(messages_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_bus_failures() {
        let mut bus = MockBus::with_failure();
        assert!(bus.connect().await.is_err());
        assert!(bus.disconnect().await.is_err());
        assert_eq!(bus.connect_count(), 1);
        assert_eq!(bus.disconnect_count(), 1);
    }

    #[test]
    fn test_recording_handler() {
        let handler = RecordingHandler::new();
        handler.handle("a", &Event::default());
        assert_eq!(handler.call_count(), 1);
        assert_eq!(handler.calls()[0].0, "a");
    }
}
