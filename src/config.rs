//! Configuration for the EdgeX event subscriber
//!
//! Configuration is read from a TOML file. Every section has defaults, so an
//! empty file (or no file at all) yields the stock setup: a plain TCP
//! connection to `localhost:1883` subscribed to `edgex/events/#`.

use crate::protocol::{
    validate_publish_topic, validate_subscription_filter, EnvelopeMode, PayloadFormat,
    TopicBuilder, EVENTS_TOPIC_ROOT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriberConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub message_bus: MessageBusSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub publisher: PublisherSection,
}

/// Service identity and logging defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level used when `LOG_LEVEL` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

/// Message bus connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageBusSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// "tcp" for plain connections; "ssl", "tls" or "mqtts" for TLS
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Bus implementation; only "mqtt" is supported
    #[serde(rename = "type", default = "default_bus_type")]
    pub bus_type: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// MQTT QoS for subscriptions and publishes (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub envelope: EnvelopeMode,
}

impl Default for MessageBusSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: default_protocol(),
            bus_type: default_bus_type(),
            client_id: default_client_id(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            qos: 0,
            envelope: EnvelopeMode::default(),
        }
    }
}

/// What to subscribe to and how to read it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSection {
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub payload_format: PayloadFormat,
    /// Capacity of the message and error channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            topics: default_topics(),
            payload_format: PayloadFormat::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Periodic test-event publisher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_publish_topic")]
    pub topic: String,
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_profile_name")]
    pub profile_name: String,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_publish_topic(),
            interval_secs: default_publish_interval(),
            device_name: default_device_name(),
            profile_name: default_profile_name(),
            source_name: default_source_name(),
            resource_name: default_resource_name(),
        }
    }
}

fn default_service_name() -> String {
    "edgex_subscriber".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_bus_type() -> String {
    "mqtt".to_string()
}

fn default_client_id() -> String {
    "EdgeXSubscriber".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_topics() -> Vec<String> {
    vec![TopicBuilder::all_events_filter(EVENTS_TOPIC_ROOT)]
}

fn default_channel_capacity() -> usize {
    100
}

fn default_publish_topic() -> String {
    "edgex/events/test".to_string()
}

fn default_publish_interval() -> u64 {
    10
}

fn default_device_name() -> String {
    "TestDevice".to_string()
}

fn default_profile_name() -> String {
    "TestProfile".to_string()
}

fn default_source_name() -> String {
    "TestSource".to_string()
}

fn default_resource_name() -> String {
    "TestResource".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Unsupported message bus type: {0}")]
    UnsupportedBusType(String),
    #[error("Unsupported broker protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] crate::protocol::TopicError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SubscriberConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SubscriberConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.message_bus.validate()?;

        if self.subscription.topics.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[subscription] must list at least one topic".to_string(),
            ));
        }
        for topic in &self.subscription.topics {
            validate_subscription_filter(topic)?;
        }
        if self.subscription.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.publisher.enabled {
            validate_publish_topic(&self.publisher.topic)?;
            if self.publisher.interval_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "publisher interval_secs must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl MessageBusSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.bus_type.eq_ignore_ascii_case("mqtt") {
            return Err(ConfigError::UnsupportedBusType(self.bus_type.clone()));
        }
        // Surfaces unknown protocols at load time rather than at connect
        self.use_tls()?;
        if self.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "message_bus host cannot be empty".to_string(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "message_bus client_id cannot be empty".to_string(),
            ));
        }
        if self.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the configured protocol requires TLS
    pub fn use_tls(&self) -> Result<bool, ConfigError> {
        match self.protocol.to_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(false),
            "ssl" | "tls" | "mqtts" => Ok(true),
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }

    /// Broker address rendered as a URL, for logging
    pub fn broker_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Override host, port and protocol from a URL such as `mqtts://broker:8883`
    pub fn apply_broker_url(&mut self, broker_url: &str) -> Result<(), ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        let protocol = url.scheme().to_string();
        let tls = match protocol.as_str() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            _ => return Err(ConfigError::UnsupportedProtocol(protocol)),
        };

        self.host = host.to_string();
        self.port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
        self.protocol = protocol;
        Ok(())
    }

    /// Get username from environment variable
    pub fn username(&self) -> Option<String> {
        Self::get_env_var_optional(self.username_env.as_ref())
    }

    /// Get password from environment variable
    pub fn password(&self) -> Option<String> {
        Self::get_env_var_optional(self.password_env.as_ref())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[service]
name = "edgex_subscriber"
log_level = "DEBUG"

[message_bus]
host = "broker.local"
port = 1884
protocol = "tcp"
type = "mqtt"
client_id = "EdgeXSubscriber"
username_env = "EDGEX_MQTT_USERNAME"
password_env = "EDGEX_MQTT_PASSWORD"
qos = 1
envelope = "raw"

[subscription]
topics = ["edgex/events/device/device-virtual/Random-Integer-Device/Random-Integer-Device/#"]
payload_format = "request"

[publisher]
enabled = true
topic = "edgex/events/test"
interval_secs = 5
"#;

        let config = SubscriberConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.service.log_level, "DEBUG");
        assert_eq!(config.message_bus.host, "broker.local");
        assert_eq!(config.message_bus.port, 1884);
        assert_eq!(config.message_bus.qos, 1);
        assert_eq!(config.message_bus.envelope, EnvelopeMode::Raw);
        assert_eq!(config.subscription.payload_format, PayloadFormat::Request);
        assert!(config.publisher.enabled);
        assert_eq!(config.publisher.interval_secs, 5);
        assert_eq!(config.publisher.device_name, "TestDevice");
    }

    #[test]
    fn test_empty_config_matches_default() {
        let config = SubscriberConfig::from_toml_str("").unwrap();
        assert_eq!(config, SubscriberConfig::default());
        assert_eq!(config.message_bus.broker_url(), "tcp://localhost:1883");
        assert_eq!(config.message_bus.client_id, "EdgeXSubscriber");
        assert_eq!(config.subscription.topics, vec!["edgex/events/#"]);
        assert_eq!(config.subscription.payload_format, PayloadFormat::Auto);
        assert!(!config.publisher.enabled);
    }

    #[test]
    fn test_rejects_unsupported_bus_type() {
        let result = SubscriberConfig::from_toml_str("[message_bus]\ntype = \"redis\"\n");
        assert!(matches!(result, Err(ConfigError::UnsupportedBusType(_))));
    }

    #[test]
    fn test_rejects_unsupported_protocol() {
        let result = SubscriberConfig::from_toml_str("[message_bus]\nprotocol = \"ws\"\n");
        assert!(matches!(result, Err(ConfigError::UnsupportedProtocol(_))));
    }

    #[test]
    fn test_rejects_bad_topics() {
        let result = SubscriberConfig::from_toml_str("[subscription]\ntopics = []\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

        let result = SubscriberConfig::from_toml_str("[subscription]\ntopics = [\"a/#/b\"]\n");
        assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
    }

    #[test]
    fn test_publisher_topic_checked_only_when_enabled() {
        let disabled = "[publisher]\ntopic = \"edgex/events/#\"\n";
        assert!(SubscriberConfig::from_toml_str(disabled).is_ok());

        let enabled = "[publisher]\nenabled = true\ntopic = \"edgex/events/#\"\n";
        assert!(matches!(
            SubscriberConfig::from_toml_str(enabled),
            Err(ConfigError::InvalidTopic(_))
        ));

        let zero_interval = "[publisher]\nenabled = true\ninterval_secs = 0\n";
        assert!(matches!(
            SubscriberConfig::from_toml_str(zero_interval),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_qos() {
        let result = SubscriberConfig::from_toml_str("[message_bus]\nqos = 3\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_apply_broker_url() {
        let mut section = MessageBusSection::default();
        section.apply_broker_url("mqtts://secure.example.com").unwrap();
        assert_eq!(section.host, "secure.example.com");
        assert_eq!(section.port, 8883);
        assert!(section.use_tls().unwrap());

        section.apply_broker_url("tcp://10.0.0.5:1999").unwrap();
        assert_eq!(section.host, "10.0.0.5");
        assert_eq!(section.port, 1999);
        assert!(!section.use_tls().unwrap());

        assert!(matches!(
            section.apply_broker_url("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            section.apply_broker_url("http://example.com"),
            Err(ConfigError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_credentials_from_env() {
        std::env::set_var("EDGEX_CONFIG_TEST_USER", "alice");
        let section = MessageBusSection {
            username_env: Some("EDGEX_CONFIG_TEST_USER".to_string()),
            password_env: Some("EDGEX_CONFIG_TEST_PASS_UNSET".to_string()),
            ..Default::default()
        };
        assert_eq!(section.username(), Some("alice".to_string()));
        assert_eq!(section.password(), None);
        std::env::remove_var("EDGEX_CONFIG_TEST_USER");
    }
}
