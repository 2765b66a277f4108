//! Periodic synthetic event publisher
//!
//! Builds a fresh EdgeX event with a single string reading every interval
//! and publishes it through the same [`MessageBus`] the subscriber uses,
//! which makes a standalone loopback check possible.

use crate::config::PublisherSection;
use crate::observability::DispatchMetrics;
use crate::protocol::{Event, MessageEnvelope, Reading, API_VERSION};
use crate::transport::{BusError, MessageBus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to publish event: {0}")]
    Bus(#[from] BusError),
}

/// Builds synthetic events for one configured device/resource
#[derive(Debug, Clone)]
pub struct TestEventFactory {
    device_name: String,
    profile_name: String,
    source_name: String,
    resource_name: String,
}

impl TestEventFactory {
    pub fn new(config: &PublisherSection) -> Self {
        Self {
            device_name: config.device_name.clone(),
            profile_name: config.profile_name.clone(),
            source_name: config.source_name.clone(),
            resource_name: config.resource_name.clone(),
        }
    }

    /// Event stamped with the current time
    pub fn build_event(&self) -> Event {
        self.build_event_at(Utc::now())
    }

    pub fn build_event_at(&self, now: DateTime<Utc>) -> Event {
        let origin = now.timestamp_nanos_opt().unwrap_or_default();
        let value = format!(
            "Test value at {}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        Event {
            api_version: API_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            device_name: self.device_name.clone(),
            profile_name: self.profile_name.clone(),
            source_name: self.source_name.clone(),
            origin,
            readings: vec![Reading::simple(
                Uuid::new_v4().to_string(),
                origin,
                &self.profile_name,
                &self.device_name,
                &self.resource_name,
                "String",
                value,
            )],
            ..Default::default()
        }
    }
}

/// Publishes a test event on a fixed interval until shut down
pub struct TestEventPublisher<B: MessageBus + ?Sized> {
    bus: Arc<B>,
    factory: TestEventFactory,
    topic: String,
    interval: Duration,
    metrics: Arc<DispatchMetrics>,
}

impl<B: MessageBus + ?Sized> TestEventPublisher<B> {
    pub fn new(bus: Arc<B>, config: &PublisherSection, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            bus,
            factory: TestEventFactory::new(config),
            topic: config.topic.clone(),
            interval: Duration::from_secs(config.interval_secs),
            metrics,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build, serialize and publish one event; returns its id
    pub async fn publish_once(&self) -> Result<String, PublishError> {
        let event = self.factory.build_event();
        self.publish_event(&event).await?;
        Ok(event.id)
    }

    /// Serialize and publish a caller-supplied event
    pub async fn publish_event(&self, event: &Event) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        let envelope = MessageEnvelope::new_json(payload);

        if let Err(e) = self.bus.publish(&envelope, &self.topic).await {
            self.metrics.publish_failed();
            return Err(e.into());
        }

        self.metrics.event_published();
        info!(
            topic = %self.topic,
            event_id = %event.id,
            correlation_id = %envelope.correlation_id,
            "Published test event"
        );
        Ok(())
    }

    /// Publish every interval until `shutdown_rx` turns true or its sender drops
    ///
    /// The first event goes out one full interval after start. Publish
    /// failures are logged and the next tick tries again. Returns the number
    /// of events published.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            topic = %self.topic,
            interval_secs = self.interval.as_secs(),
            "Test event publisher started"
        );

        let mut published = 0u64;
        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.publish_once().await {
                        Ok(_) => published += 1,
                        Err(e) => {
                            error!(error = %e, topic = %self.topic, "Failed to publish test event")
                        }
                    }
                }
            }
        }

        debug!(published, "Test event publisher stopped");
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBus;
    use chrono::TimeZone;

    fn publisher(bus: &MockBus) -> TestEventPublisher<MockBus> {
        TestEventPublisher::new(
            Arc::new(bus.clone()),
            &PublisherSection::default(),
            Arc::new(DispatchMetrics::new()),
        )
    }

    #[test]
    fn test_build_event_shape() {
        let factory = TestEventFactory::new(&PublisherSection::default());
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let event = factory.build_event_at(now);

        assert_eq!(event.api_version, "v3");
        assert!(Uuid::parse_str(&event.id).is_ok());
        assert_eq!(event.device_name, "TestDevice");
        assert_eq!(event.profile_name, "TestProfile");
        assert_eq!(event.source_name, "TestSource");
        assert_eq!(event.origin, now.timestamp_nanos_opt().unwrap());
        assert!(event.validate().is_ok());

        assert_eq!(event.readings.len(), 1);
        let reading = &event.readings[0];
        assert_eq!(reading.resource_name, "TestResource");
        assert_eq!(reading.value_type, "String");
        assert_eq!(reading.value, "Test value at 2024-01-02T03:04:05Z");
        assert_eq!(reading.origin, event.origin);
        assert_ne!(reading.id, event.id);
    }

    #[test]
    fn test_build_event_ids_are_fresh() {
        let factory = TestEventFactory::new(&PublisherSection::default());
        assert_ne!(factory.build_event().id, factory.build_event().id);
    }

    #[tokio::test]
    async fn test_publish_once_sends_json_envelope() {
        let bus = MockBus::connected();
        let publisher = publisher(&bus);

        let id = publisher.publish_once().await.unwrap();

        let published = bus.get_published().await;
        assert_eq!(published.len(), 1);
        let (topic, envelope) = &published[0];
        assert_eq!(topic, "edgex/events/test");
        assert!(envelope.is_json());
        assert!(Uuid::parse_str(&envelope.correlation_id).is_ok());

        let event: Event = serde_json::from_slice(&envelope.payload).unwrap();
        assert_eq!(event.id, id);
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted() {
        let bus = MockBus::with_failure();
        let metrics = Arc::new(DispatchMetrics::new());
        let publisher = TestEventPublisher::new(
            Arc::new(bus),
            &PublisherSection::default(),
            metrics.clone(),
        );

        assert!(matches!(
            publisher.publish_once().await,
            Err(PublishError::Bus(_))
        ));
        assert_eq!(metrics.snapshot().publish_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_each_interval_until_shutdown() {
        let bus = MockBus::connected();
        let publisher = publisher(&bus).with_interval(Duration::from_secs(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { publisher.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(bus.get_published().await.len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_already_set() {
        let bus = MockBus::connected();
        let publisher = publisher(&bus).with_interval(Duration::from_millis(1));
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        assert_eq!(publisher.run(shutdown_rx).await, 0);
    }
}
