//! EdgeX event subscriber - main entry point

use clap::{Parser, Subcommand};
use edgex_subscriber::config::SubscriberConfig;
use edgex_subscriber::error::{SubscriberError, SubscriberResult};
use edgex_subscriber::handler::LoggingHandler;
use edgex_subscriber::observability::init_default_logging;
use edgex_subscriber::protocol::PayloadFormat;
use edgex_subscriber::service::{wait_for_termination_signal, SubscriberService};
use edgex_subscriber::transport::MqttBus;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: &[&str] = &["edgex-subscriber.toml", "config/edgex-subscriber.toml"];

/// Subscribe to EdgeX events over MQTT and log them
#[derive(Parser)]
#[command(name = "edgex-subscriber")]
#[command(about = "MQTT subscriber for EdgeX sensor events")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and log events until SIGINT/SIGTERM
    Run {
        /// Also publish a synthetic test event every interval
        #[arg(long)]
        publish: bool,

        /// Topic filter to subscribe to (repeatable; replaces configured topics)
        #[arg(long = "topic", value_name = "FILTER")]
        topics: Vec<String>,

        /// Broker URL such as mqtt://localhost:1883 or mqtts://broker:8883
        #[arg(long, env = "EDGEX_BROKER_URL")]
        broker_url: Option<String>,

        /// Payload shape: request, event or auto
        #[arg(long)]
        payload_format: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = load_configuration(cli.config.as_deref());

    let default_level = match (cli.verbose, &loaded) {
        (0, Ok((config, _))) => config.service.log_level.clone(),
        (0, Err(_)) => "INFO".to_string(),
        (1, _) => "DEBUG".to_string(),
        _ => "TRACE".to_string(),
    };
    init_default_logging(&default_level);

    info!(
        "Starting EdgeX event subscriber v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match loaded {
        Ok((config, Some(path))) => {
            info!("Loaded configuration from: {}", path.display());
            config
        }
        Ok((config, None)) => {
            warn!("No configuration file found, using built-in defaults");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            publish,
            topics,
            broker_url,
            payload_format,
        } => match apply_run_overrides(config, publish, topics, broker_url, payload_format) {
            Ok(config) => run_subscriber(config).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        if e.is_setup_failure() {
            error!("Setup failed, subscriber not started: {}", e);
        } else {
            error!("Command failed: {}", e);
        }
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Load from an explicit path, else the first default path that exists,
/// else the built-in default
fn load_configuration(
    config_path: Option<&Path>,
) -> SubscriberResult<(SubscriberConfig, Option<PathBuf>)> {
    if let Some(path) = config_path {
        let config = SubscriberConfig::load_from_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            let config = SubscriberConfig::load_from_file(&path)?;
            return Ok((config, Some(path)));
        }
    }

    Ok((SubscriberConfig::default(), None))
}

fn apply_run_overrides(
    mut config: SubscriberConfig,
    publish: bool,
    topics: Vec<String>,
    broker_url: Option<String>,
    payload_format: Option<String>,
) -> SubscriberResult<SubscriberConfig> {
    if publish {
        config.publisher.enabled = true;
    }
    if !topics.is_empty() {
        config.subscription.topics = topics;
    }
    if let Some(url) = broker_url {
        config.message_bus.apply_broker_url(&url)?;
    }
    if let Some(format) = payload_format {
        config.subscription.payload_format =
            PayloadFormat::parse(&format).ok_or_else(|| SubscriberError::InvalidInput {
                message: format!(
                    "unknown payload format '{format}' (expected request, event or auto)"
                ),
            })?;
    }

    config.validate()?;
    Ok(config)
}

async fn run_subscriber(config: SubscriberConfig) -> SubscriberResult<()> {
    let bus = MqttBus::new(config.message_bus.clone()).map_err(SubscriberError::Connect)?;
    let service = SubscriberService::start(config, bus, Arc::new(LoggingHandler)).await?;

    let summary = service
        .run_until(async {
            if let Err(e) = wait_for_termination_signal().await {
                error!("Signal handling failed, shutting down: {}", e);
            }
        })
        .await;

    info!(
        events_handled = summary.metrics.events_handled,
        rejected = summary.metrics.rejected(),
        bus_errors = summary.metrics.bus_errors,
        events_published = summary.metrics.events_published,
        "Final counters"
    );
    Ok(())
}

fn handle_config_command(config: &SubscriberConfig, show: bool) -> SubscriberResult<()> {
    config.validate()?;

    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| SubscriberError::InvalidInput {
            message: format!("failed to render configuration: {e}"),
        })?;
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
