//! EdgeX test event injector
//!
//! Publishes synthetic events (or an event read from a JSON file) to the
//! broker and exits. Handy for checking a running subscriber end to end.
//!
//! ## Usage
//!
//! ```bash
//! # One synthetic event to the default topic
//! inject-event
//!
//! # Five events for a specific device, half a second apart
//! inject-event --device-name Thermostat01 --count 5 --delay-ms 500
//!
//! # Build the EdgeX device topic from its parts
//! inject-event --service device-virtual --profile Thermostat \
//!   --device-name Thermostat01 --source temperature
//!
//! # Publish an event from a file to a TLS broker
//! inject-event --broker-url mqtts://broker:8883 --file event.json \
//!   --topic edgex/events/device/svc/profile/Thermostat01/temp
//! ```

use clap::Parser;
use edgex_subscriber::config::SubscriberConfig;
use edgex_subscriber::observability::{init_default_logging, DispatchMetrics};
use edgex_subscriber::protocol::{
    validate_publish_topic, Event, PayloadFormat, TopicBuilder, EVENTS_TOPIC_ROOT,
};
use edgex_subscriber::publisher::TestEventPublisher;
use edgex_subscriber::transport::MqttBus;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "inject-event",
    about = "Publish EdgeX test events to an MQTT broker",
    version
)]
struct Args {
    /// Configuration file (message_bus and publisher sections are used)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL such as mqtt://localhost:1883
    #[arg(long, env = "EDGEX_BROKER_URL")]
    broker_url: Option<String>,

    /// Topic to publish to (wins over --service)
    #[arg(long)]
    topic: Option<String>,

    /// Device service name; publish to the EdgeX device event topic
    #[arg(long)]
    service: Option<String>,

    /// Profile name for synthetic events and the device topic
    #[arg(long)]
    profile: Option<String>,

    /// Device name for synthetic events
    #[arg(long)]
    device_name: Option<String>,

    /// Source name for synthetic events and the device topic
    #[arg(long)]
    source: Option<String>,

    /// JSON file holding an event (flat or wrapped in a request)
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Number of events to publish
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Delay between events in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_default_logging("INFO");

    if let Err(e) = run(args).await {
        error!("Injection failed: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SubscriberConfig::load_from_file(path)?,
        None => SubscriberConfig::default(),
    };
    if let Some(url) = &args.broker_url {
        config.message_bus.apply_broker_url(url)?;
    }
    if let Some(device_name) = args.device_name {
        config.publisher.device_name = device_name;
    }
    if let Some(profile) = args.profile {
        config.publisher.profile_name = profile;
    }
    if let Some(source) = args.source {
        config.publisher.source_name = source;
    }
    match (args.topic, &args.service) {
        (Some(topic), _) => config.publisher.topic = topic,
        (None, Some(service)) => {
            config.publisher.topic = TopicBuilder::device_event_topic(
                EVENTS_TOPIC_ROOT,
                service,
                &config.publisher.profile_name,
                &config.publisher.device_name,
                &config.publisher.source_name,
            );
        }
        (None, None) => {}
    }
    validate_publish_topic(&config.publisher.topic)?;
    // Distinct from a subscriber that may be running with the same config
    config.message_bus.client_id = format!("{}-inject", config.message_bus.client_id);

    let file_event = match &args.file {
        Some(path) => Some(read_event_file(path)?),
        None => None,
    };

    let mut bus = MqttBus::new(config.message_bus.clone())?;
    bus.connect().await?;
    let bus = Arc::new(bus);

    let publisher = TestEventPublisher::new(
        bus.clone(),
        &config.publisher,
        Arc::new(DispatchMetrics::new()),
    );

    let mut outcome = Ok(());
    for i in 0..args.count {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
        let result = match &file_event {
            Some(event) => publisher.publish_event(event).await.map(|_| event.id.clone()),
            None => publisher.publish_once().await,
        };
        match result {
            Ok(id) => info!(
                event_id = %id,
                topic = %publisher.topic(),
                "Injected event {}/{}",
                i + 1,
                args.count
            ),
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }

    if let Err(e) = bus.disconnect().await {
        error!("Failed to disconnect cleanly: {}", e);
    }
    outcome
}

fn read_event_file(path: &Path) -> Result<Event, Box<dyn std::error::Error>> {
    let content = std::fs::read(path)?;
    let event = PayloadFormat::Auto.decode(&content)?;
    event.validate()?;
    Ok(event)
}
