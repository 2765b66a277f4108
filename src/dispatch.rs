//! Event dispatch loop
//!
//! [`Dispatcher::run`] multiplexes three sources: the termination signal, the
//! error channel and the message channel. Every envelope goes through
//! [`Dispatcher::process_envelope`]: content-type check, JSON decode,
//! validation, then the handler. Nothing an envelope contains can stop the
//! loop; only termination (or both channels closing) does, and either way
//! the bus is disconnected exactly once.

use crate::handler::EventHandler;
use crate::observability::{DispatchMetrics, MetricsSnapshot};
use crate::protocol::{MessageEnvelope, PayloadFormat};
use crate::transport::{BusError, MessageBus};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Result of pushing one envelope through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    UnsupportedContentType,
    DecodeFailed,
    InvalidEvent,
}

/// One wake-up of the dispatch loop
#[derive(Debug)]
pub enum LoopEvent {
    Terminate,
    Message(MessageEnvelope),
    Error(BusError),
    MessagesClosed,
    ErrorsClosed,
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Termination signal (or its sender went away)
    Terminated,
    /// Both the message and the error channel closed
    ChannelsClosed,
}

/// What `run` hands back once it has disconnected
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub reason: StopReason,
    /// Set when the final disconnect failed
    pub disconnect_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    payload_format: PayloadFormat,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        payload_format: PayloadFormat,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            handler,
            payload_format,
            metrics,
        }
    }

    /// Content-type check, decode, validate, handle
    pub fn process_envelope(&self, envelope: &MessageEnvelope) -> DispatchOutcome {
        let _span = crate::dispatch_span!(
            topic = %envelope.received_topic,
            correlation_id = %envelope.correlation_id
        )
        .entered();
        self.metrics.message_received();
        info!(
            topic = %envelope.received_topic,
            correlation_id = %envelope.correlation_id,
            "Message received"
        );

        if !envelope.is_json() {
            error!(
                content_type = %envelope.content_type,
                "Incorrect content type for event message, expected application/json"
            );
            self.metrics.unsupported_content_type();
            return DispatchOutcome::UnsupportedContentType;
        }

        let event = match self.payload_format.decode(&envelope.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Failed to decode event payload");
                self.metrics.decode_failed();
                return DispatchOutcome::DecodeFailed;
            }
        };

        if let Err(e) = event.validate() {
            warn!(
                event_id = %event.id,
                device = %event.device_name,
                "Skipping invalid event: {}", e
            );
            self.metrics.invalid_event();
            return DispatchOutcome::InvalidEvent;
        }

        let started = Instant::now();
        self.handler.handle(&envelope.received_topic, &event);
        self.metrics.event_handled(started.elapsed());

        debug!(event_id = %event.id, device = %event.device_name, "Event handled");
        DispatchOutcome::Handled
    }

    /// Wait for the next loop event; termination wins over pending messages
    async fn next_event(
        messages_rx: &mut mpsc::Receiver<MessageEnvelope>,
        errors_rx: &mut mpsc::Receiver<BusError>,
        shutdown_rx: &mut watch::Receiver<bool>,
        messages_open: bool,
        errors_open: bool,
    ) -> LoopEvent {
        loop {
            if *shutdown_rx.borrow_and_update() {
                return LoopEvent::Terminate;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again; treat it as termination
                    if changed.is_err() {
                        return LoopEvent::Terminate;
                    }
                }
                error = errors_rx.recv(), if errors_open => {
                    return match error {
                        Some(error) => LoopEvent::Error(error),
                        None => LoopEvent::ErrorsClosed,
                    };
                }
                message = messages_rx.recv(), if messages_open => {
                    return match message {
                        Some(envelope) => LoopEvent::Message(envelope),
                        None => LoopEvent::MessagesClosed,
                    };
                }
            }
        }
    }

    /// Run until terminated, then disconnect the bus once
    pub async fn run<B>(
        &self,
        bus: &B,
        mut messages_rx: mpsc::Receiver<MessageEnvelope>,
        mut errors_rx: mpsc::Receiver<BusError>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> DispatchSummary
    where
        B: MessageBus + ?Sized,
    {
        info!(payload_format = ?self.payload_format, "Dispatch loop started");

        let mut messages_open = true;
        let mut errors_open = true;

        let reason = loop {
            if !messages_open && !errors_open {
                warn!("Message and error channels closed, stopping dispatch loop");
                break StopReason::ChannelsClosed;
            }

            let event = Self::next_event(
                &mut messages_rx,
                &mut errors_rx,
                &mut shutdown_rx,
                messages_open,
                errors_open,
            )
            .await;

            match event {
                LoopEvent::Terminate => {
                    info!("Termination requested, stopping dispatch loop");
                    break StopReason::Terminated;
                }
                LoopEvent::Message(envelope) => {
                    self.process_envelope(&envelope);
                }
                LoopEvent::Error(e) => {
                    self.metrics.bus_error();
                    error!(error = %e, "Message bus error");
                }
                LoopEvent::MessagesClosed => {
                    debug!("Message channel closed");
                    messages_open = false;
                }
                LoopEvent::ErrorsClosed => {
                    debug!("Error channel closed");
                    errors_open = false;
                }
            }
        };

        let disconnect_error = match bus.disconnect().await {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "Failed to disconnect from message bus");
                Some(e.to_string())
            }
        };

        let metrics = self.metrics.snapshot();
        info!(
            messages_received = metrics.messages_received,
            events_handled = metrics.events_handled,
            rejected = metrics.rejected(),
            bus_errors = metrics.bus_errors,
            "Dispatch loop stopped"
        );

        DispatchSummary {
            reason,
            disconnect_error,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;
    use crate::testing::RecordingHandler;

    fn dispatcher(handler: &RecordingHandler, format: PayloadFormat) -> Dispatcher {
        Dispatcher::new(
            Arc::new(handler.clone()),
            format,
            Arc::new(DispatchMetrics::new()),
        )
    }

    fn envelope(topic: &str, payload: &str) -> MessageEnvelope {
        MessageEnvelope {
            received_topic: topic.to_string(),
            ..MessageEnvelope::new_json(payload.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_request_payload_is_handled() {
        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Request);

        let payload = r#"{"apiVersion":"v3","requestId":"r1","event":{"id":"e1","deviceName":"d1","profileName":"p1","sourceName":"s1","origin":1700000000000000000,"readings":[]}}"#;
        let outcome = dispatcher.process_envelope(&envelope("edgex/events/a", payload));

        assert_eq!(outcome, DispatchOutcome::Handled);
        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "edgex/events/a");
        assert_eq!(calls[0].1.device_name, "d1");
        assert_eq!(calls[0].1.id, "e1");
    }

    #[test]
    fn test_flat_event_payload_is_handled_in_auto_mode() {
        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Auto);
        let payload = serde_json::to_string(&Event {
            id: "e2".to_string(),
            device_name: "d2".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            dispatcher.process_envelope(&envelope("t", &payload)),
            DispatchOutcome::Handled
        );
        assert_eq!(handler.calls()[0].1.id, "e2");
    }

    #[test]
    fn test_non_json_content_type_is_rejected_before_decoding() {
        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Auto);
        let envelope = MessageEnvelope {
            content_type: "application/cbor".to_string(),
            ..envelope("t", r#"{"id":"e1","deviceName":"d1"}"#)
        };

        assert_eq!(
            dispatcher.process_envelope(&envelope),
            DispatchOutcome::UnsupportedContentType
        );
        assert!(handler.calls().is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_receipt_logged_even_when_content_type_rejected() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Auto);
        let envelope = MessageEnvelope {
            content_type: "text/plain".to_string(),
            ..envelope("edgex/events/received", "hello")
        };

        let outcome = tracing::subscriber::with_default(subscriber, || {
            dispatcher.process_envelope(&envelope)
        });
        assert_eq!(outcome, DispatchOutcome::UnsupportedContentType);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let received = output
            .lines()
            .find(|line| line.contains("Message received"))
            .expect("receipt line at INFO");
        assert!(received.contains("edgex/events/received"));
        assert!(received.contains(&envelope.correlation_id));
        assert!(output.find("Message received") < output.find("Incorrect content type"));
    }

    #[test]
    fn test_malformed_json_is_dropped() {
        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Request);

        assert_eq!(
            dispatcher.process_envelope(&envelope("t", "{not json")),
            DispatchOutcome::DecodeFailed
        );
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn test_missing_identity_is_invalid() {
        let handler = RecordingHandler::new();
        let dispatcher = dispatcher(&handler, PayloadFormat::Event);

        for payload in [
            r#"{"id":"","deviceName":"d1"}"#,
            r#"{"id":"e1","deviceName":""}"#,
            r#"{"profileName":"p1"}"#,
        ] {
            assert_eq!(
                dispatcher.process_envelope(&envelope("t", payload)),
                DispatchOutcome::InvalidEvent,
                "payload: {payload}"
            );
        }
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn test_metrics_track_outcomes() {
        let handler = RecordingHandler::new();
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Dispatcher::new(
            Arc::new(handler.clone()),
            PayloadFormat::Event,
            metrics.clone(),
        );

        dispatcher.process_envelope(&envelope("t", r#"{"id":"e1","deviceName":"d1"}"#));
        dispatcher.process_envelope(&envelope("t", "42"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.events_handled, 1);
        assert_eq!(snapshot.decode_failures, 1);
    }
}
