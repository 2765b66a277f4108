//! Topic filter validation and EdgeX topic construction
//!
//! Matching topics against filters is left to the broker; these helpers only
//! reject filters and publish topics that a broker would refuse anyway.

use thiserror::Error;

/// Root of the EdgeX event topic tree
pub const EVENTS_TOPIC_ROOT: &str = "edgex/events";

/// Validate an MQTT subscription filter
///
/// `#` must be the last level and stand alone; `+` must occupy a whole level.
pub fn validate_subscription_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NullCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a topic name used for publishing (no wildcards allowed)
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    if topic.contains('#') || topic.contains('+') {
        return Err(TopicError::WildcardInPublishTopic(topic.to_string()));
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic cannot contain a null character")]
    NullCharacter,
    #[error("'#' must be the whole last level of the filter: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level of the filter: {0}")]
    MisplacedSingleLevelWildcard(String),
    #[error("Publish topic cannot contain wildcards: {0}")]
    WildcardInPublishTopic(String),
}

/// EdgeX topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build a device event topic:
    /// `{base}/device/{service}/{profile}/{device}/{source}`
    pub fn device_event_topic(
        base: &str,
        service: &str,
        profile: &str,
        device: &str,
        source: &str,
    ) -> String {
        format!(
            "{}/device/{service}/{profile}/{device}/{source}",
            base.trim_end_matches('/')
        )
    }

    /// Filter matching every event topic under `base`
    pub fn all_events_filter(base: &str) -> String {
        format!("{}/#", base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_filters() {
        for filter in [
            "edgex/events/#",
            "#",
            "+",
            "edgex/+/device/#",
            "edgex/events/device/device-virtual/Random-Integer-Device/Random-Integer-Device/#",
            "edgex/events/test",
        ] {
            assert!(
                validate_subscription_filter(filter).is_ok(),
                "{filter} should be valid"
            );
        }
    }

    #[test]
    fn test_invalid_filters() {
        assert_eq!(validate_subscription_filter(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_subscription_filter("edgex/#/events"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_subscription_filter("edgex/events#"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_subscription_filter("edgex/ev+nts"),
            Err(TopicError::MisplacedSingleLevelWildcard(_))
        ));
    }

    #[test]
    fn test_publish_topic() {
        assert!(validate_publish_topic("edgex/events/test").is_ok());
        assert!(matches!(
            validate_publish_topic("edgex/events/#"),
            Err(TopicError::WildcardInPublishTopic(_))
        ));
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
    }

    #[test]
    fn test_topic_builder() {
        assert_eq!(
            TopicBuilder::device_event_topic(
                EVENTS_TOPIC_ROOT,
                "device-virtual",
                "Random-Integer-Device",
                "Random-Integer-Device",
                "Int8"
            ),
            "edgex/events/device/device-virtual/Random-Integer-Device/Random-Integer-Device/Int8"
        );
        assert_eq!(
            TopicBuilder::device_event_topic("edgex/events/", "svc", "prof", "dev", "src"),
            "edgex/events/device/svc/prof/dev/src"
        );
        assert_eq!(
            TopicBuilder::all_events_filter(EVENTS_TOPIC_ROOT),
            "edgex/events/#"
        );
    }

    proptest! {
        #[test]
        fn wildcard_free_topics_are_valid_filters(topic in "[a-zA-Z0-9_-]{1,12}(/[a-zA-Z0-9_-]{1,12}){0,5}") {
            prop_assert!(validate_subscription_filter(&topic).is_ok());
            prop_assert!(validate_publish_topic(&topic).is_ok());
        }

        #[test]
        fn built_event_topics_are_publishable(
            service in "[a-z-]{1,10}",
            profile in "[A-Za-z-]{1,10}",
            device in "[A-Za-z0-9-]{1,10}",
            source in "[A-Za-z0-9]{1,10}",
        ) {
            let topic = TopicBuilder::device_event_topic(
                EVENTS_TOPIC_ROOT, &service, &profile, &device, &source,
            );
            prop_assert!(validate_publish_topic(&topic).is_ok());
            prop_assert!(validate_subscription_filter(&topic).is_ok());
        }
    }
}
