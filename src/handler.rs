//! Callbacks invoked with each accepted event

use crate::protocol::Event;
use tracing::info;

/// Receives every event that passed content-type, decode and validation
///
/// Called synchronously from the dispatch loop; a slow handler stalls
/// consumption of further messages.
pub trait EventHandler: Send + Sync {
    fn handle(&self, topic: &str, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&str, &Event) + Send + Sync,
{
    fn handle(&self, topic: &str, event: &Event) {
        self(topic, event)
    }
}

/// Logs a one-line summary of each event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, topic: &str, event: &Event) {
        info!(
            topic = %topic,
            event_id = %event.id,
            device = %event.device_name,
            profile = %event.profile_name,
            source = %event.source_name,
            origin = event.origin,
            readings = event.readings.len(),
            "Received event"
        );
        for reading in &event.readings {
            info!(
                event_id = %event.id,
                resource = %reading.resource_name,
                value_type = %reading.value_type,
                value = %reading.value,
                "Reading"
            );
        }
    }
}
