//! Configuration loading and validation tests
//!
//! Exercise loading from real files on disk: defaults, overrides, and the
//! errors a bad file produces.

use edgex_subscriber::config::{ConfigError, SubscriberConfig};
use edgex_subscriber::protocol::{EnvelopeMode, PayloadFormat};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[service]
name = "edgex_subscriber"
log_level = "DEBUG"

[message_bus]
host = "edgex-mqtt-broker"
port = 1884
protocol = "tcp"
type = "mqtt"
client_id = "SubscriberUnderTest"
qos = 1
envelope = "raw"

[subscription]
topics = ["edgex/events/device/#", "edgex/events/core/+/+/Thermostat01/#"]
payload_format = "request"
channel_capacity = 16

[publisher]
enabled = true
topic = "edgex/events/device/test-svc/TestProfile/TestDevice/TestSource"
interval_secs = 2
"#,
    );

    let config = SubscriberConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.service.log_level, "DEBUG");
    assert_eq!(config.message_bus.host, "edgex-mqtt-broker");
    assert_eq!(config.message_bus.port, 1884);
    assert_eq!(config.message_bus.client_id, "SubscriberUnderTest");
    assert_eq!(config.message_bus.qos, 1);
    assert_eq!(config.message_bus.envelope, EnvelopeMode::Raw);
    assert_eq!(config.subscription.topics.len(), 2);
    assert_eq!(config.subscription.payload_format, PayloadFormat::Request);
    assert_eq!(config.subscription.channel_capacity, 16);
    assert!(config.publisher.enabled);
    assert_eq!(config.publisher.interval_secs, 2);
    assert_eq!(config.publisher.device_name, "TestDevice");
    assert_eq!(config.message_bus.broker_url(), "tcp://edgex-mqtt-broker:1884");
}

#[test]
fn test_partial_config_falls_back_to_defaults() {
    let temp_file = write_config(
        r#"
[message_bus]
host = "broker.local"
"#,
    );

    let config = SubscriberConfig::load_from_file(temp_file.path()).unwrap();
    let defaults = SubscriberConfig::default();

    assert_eq!(config.message_bus.host, "broker.local");
    assert_eq!(config.message_bus.port, 1883);
    assert_eq!(config.subscription, defaults.subscription);
    assert_eq!(config.publisher, defaults.publisher);
    assert_eq!(config.service, defaults.service);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SubscriberConfig::load_from_file(&dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[message_bus\nhost = ");
    let result = SubscriberConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let cases = [
        ("[message_bus]\ntype = \"redis\"", "bus type"),
        ("[message_bus]\nprotocol = \"ws\"", "protocol"),
        ("[message_bus]\nclient_id = \"\"", "client id"),
        ("[subscription]\ntopics = []", "no topics"),
        ("[subscription]\ntopics = [\"edgex/#/events\"]", "misplaced wildcard"),
        ("[subscription]\nchannel_capacity = 0", "zero capacity"),
        ("[publisher]\nenabled = true\ntopic = \"edgex/events/+\"", "wildcard publish topic"),
        ("[publisher]\nenabled = true\ninterval_secs = 0", "zero interval"),
    ];

    for (content, label) in cases {
        let temp_file = write_config(content);
        assert!(
            SubscriberConfig::load_from_file(temp_file.path()).is_err(),
            "expected rejection for {label}"
        );
    }
}

#[test]
fn test_shown_config_round_trips() {
    let config = SubscriberConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();

    let temp_file = write_config(&rendered);
    let reloaded = SubscriberConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_sample_config_in_repo_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("edgex-subscriber.toml");
    let config = SubscriberConfig::load_from_file(&path).unwrap();
    assert_eq!(config.subscription.topics, vec!["edgex/events/#"]);
}
