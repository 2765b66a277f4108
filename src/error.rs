//! Top-level error type for the subscriber service

use crate::config::ConfigError;
use crate::transport::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect to message bus: {0}")]
    Connect(#[source] BusError),

    #[error("Failed to subscribe to {topics:?}: {source}")]
    Subscribe {
        topics: Vec<String>,
        #[source]
        source: BusError,
    },

    #[error("Signal handling error: {0}")]
    Signal(#[from] std::io::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

pub type SubscriberResult<T> = Result<T, SubscriberError>;

impl SubscriberError {
    /// Setup failures that must stop the process before the loop starts
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            SubscriberError::Config(_)
                | SubscriberError::Connect(_)
                | SubscriberError::Subscribe { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SubscriberError::Subscribe {
            topics: vec!["edgex/events/#".to_string()],
            source: BusError::SubscriptionFailed("refused".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("edgex/events/#"));
        assert!(message.contains("refused"));
        assert!(err.is_setup_failure());
    }

    #[test]
    fn test_config_error_converts() {
        let err: SubscriberError = ConfigError::InvalidConfig("bad".to_string()).into();
        assert!(matches!(err, SubscriberError::Config(_)));
        assert!(err.is_setup_failure());

        let io: SubscriberError = std::io::Error::other("sig").into();
        assert!(!io.is_setup_failure());
    }
}
