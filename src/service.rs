//! Service wiring: bus setup, dispatch loop, optional publisher
//!
//! [`SubscriberService::start`] performs the fatal setup steps (connect,
//! subscribe). [`SubscriberService::run_until`] runs the dispatch loop and,
//! when enabled, the test-event publisher until the given shutdown future
//! resolves.

use crate::config::SubscriberConfig;
use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::error::{SubscriberError, SubscriberResult};
use crate::handler::EventHandler;
use crate::observability::DispatchMetrics;
use crate::protocol::MessageEnvelope;
use crate::publisher::TestEventPublisher;
use crate::transport::{BusError, MessageBus};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

pub struct SubscriberService<B: MessageBus + 'static> {
    config: SubscriberConfig,
    bus: Arc<B>,
    dispatcher: Dispatcher,
    metrics: Arc<DispatchMetrics>,
    messages_rx: mpsc::Receiver<MessageEnvelope>,
    errors_rx: mpsc::Receiver<BusError>,
}

impl<B: MessageBus + 'static> SubscriberService<B> {
    /// Connect and subscribe; any failure here is fatal
    pub async fn start(
        config: SubscriberConfig,
        mut bus: B,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriberResult<Self> {
        config.validate()?;

        info!(
            service = %config.service.name,
            broker = %config.message_bus.broker_url(),
            "Starting subscriber service"
        );
        bus.connect().await.map_err(SubscriberError::Connect)?;

        let capacity = config.subscription.channel_capacity;
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);

        let topics = config.subscription.topics.clone();
        if let Err(source) = bus.subscribe(&topics, messages_tx, errors_tx).await {
            if let Err(e) = bus.disconnect().await {
                warn!(error = %e, "Disconnect after failed subscribe also failed");
            }
            return Err(SubscriberError::Subscribe { topics, source });
        }
        info!(topics = ?topics, "Subscribed");

        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Dispatcher::new(
            handler,
            config.subscription.payload_format,
            metrics.clone(),
        );

        Ok(Self {
            config,
            bus: Arc::new(bus),
            dispatcher,
            metrics,
            messages_rx,
            errors_rx,
        })
    }

    /// Run until `shutdown` resolves (or the bus channels close)
    pub async fn run_until<F>(self, shutdown: F) -> DispatchSummary
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            bus,
            dispatcher,
            metrics,
            messages_rx,
            errors_rx,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publisher_handle = config.publisher.enabled.then(|| {
            let publisher = TestEventPublisher::new(bus.clone(), &config.publisher, metrics);
            let publisher_shutdown = shutdown_rx.clone();
            tokio::spawn(async move { publisher.run(publisher_shutdown).await })
        });

        let dispatch = dispatcher.run(bus.as_ref(), messages_rx, errors_rx, shutdown_rx);
        tokio::pin!(dispatch);
        tokio::pin!(shutdown);

        let summary = tokio::select! {
            summary = &mut dispatch => summary,
            _ = &mut shutdown => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
                dispatch.await
            }
        };

        // The loop may also have ended on its own; the publisher still needs telling
        let _ = shutdown_tx.send(true);
        if let Some(handle) = publisher_handle {
            match handle.await {
                Ok(published) => info!(published, "Test event publisher joined"),
                Err(e) => error!(error = %e, "Test event publisher task failed"),
            }
        }

        info!(reason = ?summary.reason, "Subscriber service stopped");
        summary
    }
}

/// Resolves on SIGINT or SIGTERM
#[cfg(unix)]
pub async fn wait_for_termination_signal() -> SubscriberResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

/// Resolves on Ctrl-C
#[cfg(not(unix))]
pub async fn wait_for_termination_signal() -> SubscriberResult<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}
