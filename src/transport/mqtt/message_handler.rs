//! Pure MQTT event routing and channel forwarding
//!
//! [`MessageHandler`] turns `rumqttc` events into routing decisions without
//! touching I/O; [`MessageForwarder`] owns the channel senders handed over by
//! `subscribe` and pushes envelopes and errors into them.

use super::connection::BusError;
use crate::protocol::{MessageEnvelope, RawMetadata};
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => {
                    let metadata = publish
                        .properties
                        .as_ref()
                        .map(|properties| RawMetadata {
                            content_type: properties.content_type.clone(),
                            correlation_data: properties
                                .correlation_data
                                .as_ref()
                                .map(|data| data.to_vec()),
                        })
                        .unwrap_or_default();
                    EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        metadata,
                    }
                }
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: Self::count_rejected_subscriptions(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(rumqttc::Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Count filters the broker refused in a SubAck (pure function)
    pub fn count_rejected_subscriptions(return_codes: &[SubscribeReasonCode]) -> usize {
        return_codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .count()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        metadata: RawMetadata,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Our DISCONNECT packet went out
    DisconnectSent,
    /// SubAck with the number of refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Channel forwarding for received envelopes and delivery errors
#[derive(Default)]
pub struct MessageForwarder {
    messages: Option<mpsc::Sender<MessageEnvelope>>,
    errors: Option<mpsc::Sender<BusError>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_channels(
        &mut self,
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) {
        self.messages = Some(messages);
        self.errors = Some(errors);
    }

    pub fn message_sender(&self) -> Option<mpsc::Sender<MessageEnvelope>> {
        self.messages.clone()
    }

    pub fn error_sender(&self) -> Option<mpsc::Sender<BusError>> {
        self.errors.clone()
    }
}

/// Forward an envelope; waits while the channel is full
pub async fn forward_message(
    sender: Option<mpsc::Sender<MessageEnvelope>>,
    envelope: MessageEnvelope,
) {
    match sender {
        Some(sender) => {
            debug!(
                topic = %envelope.received_topic,
                correlation_id = %envelope.correlation_id,
                "Forwarding message to dispatcher"
            );
            if sender.send(envelope).await.is_err() {
                warn!("Message channel closed - message dropped");
            }
        }
        None => {
            warn!("Received MQTT message but no subscriber channel configured - message dropped")
        }
    }
}

/// Forward a delivery error; logged locally when nobody is listening
pub async fn forward_error(sender: Option<mpsc::Sender<BusError>>, error: BusError) {
    match sender {
        Some(sender) => {
            if let Err(mpsc::error::SendError(error)) = sender.send(error).await {
                warn!("Error channel closed, dropping error: {}", error);
            }
        }
        None => debug!("No error channel configured: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, PublishProperties,
        SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack_and_disconnect() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        let sent = Event::Outgoing(rumqttc::Outgoing::Disconnect);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::DisconnectSent
        ));
    }

    #[test]
    fn test_route_publish_without_properties() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("edgex/events/test"),
            pkid: 0,
            payload: Bytes::from("{}"),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived {
                topic,
                payload,
                metadata,
            } => {
                assert_eq!(topic, "edgex/events/test");
                assert_eq!(payload, b"{}");
                assert_eq!(metadata, RawMetadata::default());
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_publish_with_properties() {
        let properties = PublishProperties {
            content_type: Some("application/json".to_string()),
            correlation_data: Some(Bytes::from("corr-1")),
            ..Default::default()
        };
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("t"),
            pkid: 1,
            payload: Bytes::from("{}"),
            properties: Some(properties),
        }));

        if let EventRoute::MessageReceived { metadata, .. } =
            MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(metadata.content_type.as_deref(), Some("application/json"));
            assert_eq!(metadata.correlation_data, Some(b"corr-1".to_vec()));
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_route_suback_counts_rejections() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::NotAuthorized,
            ],
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                assert_eq!(packet_id, 7);
                assert_eq!(rejected, 1);
            }
            other => panic!("Expected SubscriptionConfirmed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forwarder_delivers_into_channels() {
        let mut forwarder = MessageForwarder::new();
        assert!(forwarder.message_sender().is_none());

        let (messages_tx, mut messages_rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        forwarder.set_channels(messages_tx, errors_tx);

        let envelope = MessageEnvelope::new_json(b"{}".to_vec());
        forward_message(forwarder.message_sender(), envelope.clone()).await;
        assert_eq!(messages_rx.recv().await, Some(envelope));

        forward_error(
            forwarder.error_sender(),
            BusError::Delivery("lost".to_string()),
        )
        .await;
        assert!(matches!(errors_rx.recv().await, Some(BusError::Delivery(_))));
    }

    #[tokio::test]
    async fn test_forwarding_without_channels_is_harmless() {
        forward_message(None, MessageEnvelope::default()).await;
        forward_error(None, BusError::Delivery("nobody listening".to_string())).await;
    }
}
