//! Impure I/O operations for the MQTT bus
//!
//! This module drives the `rumqttc` event loop on a background task,
//! decodes inbound publishes into envelopes, and implements [`MessageBus`].

use super::connection::{
    configure_mqtt_options, qos_from_level, BusError, ConnectionState, ReconnectConfig,
    CONNACK_TIMEOUT,
};
use super::message_handler::{
    forward_error, forward_message, EventRoute, MessageForwarder, MessageHandler,
};
use crate::config::MessageBusSection;
use crate::protocol::{EnvelopeCodec, EnvelopeMode, MessageEnvelope};
use crate::transport::MessageBus;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Shared pieces the event loop task needs
#[derive(Clone)]
struct EventLoopContext {
    client: AsyncClient,
    client_id: String,
    qos: QoS,
    envelope_mode: EnvelopeMode,
    reconnect_config: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<String>>>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    stopping: Arc<AtomicBool>,
}

/// Where the event loop stands between polls
#[derive(Debug, Default)]
struct LoopProgress {
    /// A ConnAck has been seen at least once
    established: bool,
    /// Consecutive failed polls since the last ConnAck
    failed_attempts: u32,
}

/// MQTT implementation of [`MessageBus`]
pub struct MqttBus {
    config: MessageBusSection,
    client: AsyncClient,
    // EventLoop is Send but not Sync; the lock keeps MqttBus shareable
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<String>>>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    stopping: Arc<AtomicBool>,
    qos: QoS,
}

impl MqttBus {
    pub fn new(config: MessageBusSection) -> Result<Self, BusError> {
        let mqtt_options = configure_mqtt_options(&config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let qos = qos_from_level(config.qos);

        Ok(Self {
            config,
            client,
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            stopping: Arc::new(AtomicBool::new(false)),
            qos,
        })
    }

    /// Replace the reconnection pacing (before `connect`)
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(BusError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                let outcome = state_rx.borrow().setup_outcome();
                match outcome {
                    Some(result) => return result.map_err(BusError::ConnectionFailedStr),
                    None => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(BusError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    async fn resubscribe(context: &EventLoopContext) {
        let topics = context.subscriptions.lock().await.clone();
        for topic in topics {
            if let Err(e) = context.client.subscribe(&topic, context.qos).await {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }

    async fn handle_message_received(
        context: &EventLoopContext,
        topic: &str,
        payload: &[u8],
        metadata: crate::protocol::RawMetadata,
    ) {
        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);

        let (messages, errors) = {
            let forwarder = context.forwarder.lock().await;
            (forwarder.message_sender(), forwarder.error_sender())
        };

        match EnvelopeCodec::decode(context.envelope_mode, topic, payload, metadata) {
            Ok(envelope) => forward_message(messages, envelope).await,
            Err(e) => forward_error(errors, e.into()).await,
        }
    }

    /// Process one routed event; returns false when the loop should stop
    async fn process_event_route(
        route: EventRoute,
        context: &EventLoopContext,
        state_tx: &watch::Sender<ConnectionState>,
        progress: &mut LoopProgress,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                info!(client_id = %context.client_id, "MQTT session established");
                let _ = state_tx.send(ConnectionState::Connected);
                let resumed = progress.established;
                progress.established = true;
                progress.failed_attempts = 0;
                if resumed {
                    Self::resubscribe(context).await;
                }
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                metadata,
            } => {
                Self::handle_message_received(context, &topic, &payload, metadata).await;
                true
            }
            EventRoute::Disconnected => {
                warn!("MQTT broker disconnected client");
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "Broker disconnected".to_string(),
                ));
                true
            }
            EventRoute::DisconnectSent => {
                info!("Disconnect sent to broker");
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id, rejected } => {
                if rejected > 0 {
                    let errors = context.forwarder.lock().await.error_sender();
                    forward_error(
                        errors,
                        BusError::SubscriptionFailed(format!(
                            "broker refused {rejected} filter(s) in SubAck {packet_id}"
                        )),
                    )
                    .await;
                } else {
                    debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Handle a failed poll; returns false when the loop should stop
    ///
    /// Before the first ConnAck a failure is final so `connect` can report
    /// it; afterwards the loop keeps polling on the reconnect schedule.
    async fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        context: &EventLoopContext,
        state_tx: &watch::Sender<ConnectionState>,
        shutdown_rx: &mut watch::Receiver<bool>,
        progress: &mut LoopProgress,
    ) -> bool {
        if context.stopping.load(Ordering::SeqCst) {
            debug!("Event loop error while stopping: {}", error);
            return false;
        }

        let reason = error.to_string();
        if !progress.established {
            error!(client_id = %context.client_id, "Could not reach MQTT broker: {}", reason);
            let _ = state_tx.send(ConnectionState::Disconnected(reason));
            return false;
        }

        error!("MQTT event loop error: {}", reason);
        let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
        let errors = context.forwarder.lock().await.error_sender();
        forward_error(errors, BusError::Delivery(reason)).await;

        if *shutdown_rx.borrow() {
            return false;
        }

        match context.reconnect_config.next_attempt(progress.failed_attempts) {
            Some((attempt, delay_ms)) => {
                progress.failed_attempts = attempt;
                let _ = state_tx.send(ConnectionState::Reconnecting(attempt));
                info!(
                    "Reconnecting {} (attempt {}) after {}ms",
                    context.client_id, attempt, delay_ms
                );
                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            None => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    progress.failed_attempts
                );
                error!("Permanent connection failure: {}", reason);
                let _ = state_tx.send(ConnectionState::PermanentlyDisconnected(reason));
                false
            }
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        context: EventLoopContext,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Starting MQTT event loop for client: {}", context.client_id);
        let mut progress = LoopProgress::default();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }
                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(
                                route,
                                &context,
                                &state_tx,
                                &mut progress,
                            )
                            .await
                        }
                        Err(e) => {
                            Self::handle_event_loop_error(
                                e,
                                &context,
                                &state_tx,
                                &mut shutdown_rx,
                                &mut progress,
                            )
                            .await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("MQTT event loop stopped for client: {}", context.client_id);
    }

    /// Connect and wait for the broker's ConnAck
    pub async fn connect(&mut self) -> Result<(), BusError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                BusError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        info!("Connecting to MQTT broker at {}", self.config.broker_url());

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let context = EventLoopContext {
            client: self.client.clone(),
            client_id: self.config.client_id.clone(),
            qos: self.qos,
            envelope_mode: self.config.envelope,
            reconnect_config: self.reconnect_config.clone(),
            subscriptions: self.subscriptions.clone(),
            forwarder: self.forwarder.clone(),
            stopping: self.stopping.clone(),
        };

        let span = crate::mqtt_span!(client_id = %self.config.client_id);
        let handle = tokio::spawn(
            Self::run_event_loop(event_loop, context, state_tx, shutdown_rx).instrument(span),
        );
        *self.event_loop_handle.lock().await = Some(handle);

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, CONNACK_TIMEOUT).await {
            // Setup failures are fatal; do not leave the loop retrying behind us
            self.stop_event_loop().await;
            return Err(e);
        }

        info!("Connected to MQTT broker at {}", self.config.broker_url());
        Ok(())
    }

    /// Subscribe to filters and route deliveries into the given channels
    pub async fn subscribe(
        &mut self,
        topics: &[String],
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError> {
        let state = self.connection_state().ok_or_else(|| BusError::NotConnected {
            state: ConnectionState::Disconnected("never connected".to_string()),
        })?;
        if !state.accepts_traffic() {
            return Err(BusError::NotConnected { state });
        }

        self.forwarder.lock().await.set_channels(messages, errors);

        for topic in topics {
            info!("Subscribing to topic: {}", topic);
            self.client
                .subscribe(topic.as_str(), self.qos)
                .await
                .map_err(|e| BusError::SubscriptionFailed(format!("{topic}: {e}")))?;

            let mut subscriptions = self.subscriptions.lock().await;
            if !subscriptions.contains(topic) {
                subscriptions.push(topic.clone());
            }
        }

        Ok(())
    }

    /// Publish an envelope using the configured envelope mode
    pub async fn publish(&self, envelope: &MessageEnvelope, topic: &str) -> Result<(), BusError> {
        self.check_connection_state()?;

        let (payload, metadata) = EnvelopeCodec::encode(self.config.envelope, envelope)?;
        let properties = PublishProperties {
            content_type: metadata.content_type,
            correlation_data: metadata.correlation_data.map(Bytes::from),
            ..Default::default()
        };

        self.client
            .publish_with_properties(topic, self.qos, false, payload, properties)
            .await
            .map_err(|e| BusError::PublishFailed(Box::new(e)))?;

        debug!(
            topic = %topic,
            correlation_id = %envelope.correlation_id,
            "Published envelope"
        );
        Ok(())
    }

    /// Send DISCONNECT and wait (bounded) for the event loop to wind down
    pub async fn disconnect(&self) -> Result<(), BusError> {
        let Some(state_tx) = &self.state_tx else {
            debug!("Disconnect requested before connect; nothing to do");
            return Ok(());
        };

        self.stopping.store(true, Ordering::SeqCst);

        let result = if self.is_connected() {
            self.client
                .disconnect()
                .await
                .map_err(|e| BusError::ConnectionFailed(Box::new(e)))
        } else {
            Ok(())
        };

        // Without a live connection nothing will flush the DISCONNECT; stop now
        if result.is_err() || !self.is_connected() {
            if let Some(shutdown_tx) = &self.shutdown_tx {
                let _ = shutdown_tx.send(true);
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down in time, stopping it");
                    if let Some(shutdown_tx) = &self.shutdown_tx {
                        let _ = shutdown_tx.send(true);
                    }
                }
            }
        }

        info!("MQTT client disconnected");
        result
    }

    async fn stop_event_loop(&self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn check_connection_state(&self) -> Result<(), BusError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            BusError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !current_state.accepts_traffic() {
            return Err(BusError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        MqttBus::connect(self).await
    }

    async fn subscribe(
        &mut self,
        topics: &[String],
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError> {
        MqttBus::subscribe(self, topics, messages, errors).await
    }

    async fn publish(&self, envelope: &MessageEnvelope, topic: &str) -> Result<(), BusError> {
        MqttBus::publish(self, envelope, topic).await
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        MqttBus::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        MqttBus::is_connected(self)
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}
