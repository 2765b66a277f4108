//! EdgeX event and reading types
//!
//! This module defines the JSON shapes carried on the event topics: the
//! `Event` with its `Reading`s, and the `EventRequest` wrapper that adds
//! `apiVersion` and `requestId` around a nested event.
//!
//! Decoding is lenient the same way the EdgeX services are: unknown fields
//! are ignored and missing fields take their zero value. Whether an event is
//! usable is decided afterwards by [`Event::validate`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// API version stamped on events built by this crate
pub const API_VERSION: &str = "v3";

/// A device occurrence carrying zero or more readings
///
/// # Examples
/// ```
/// use edgex_subscriber::protocol::Event;
///
/// let json = r#"{"id":"e1","deviceName":"d1","origin":1700000000000000000,"readings":[]}"#;
/// let event: Event = serde_json::from_str(json).unwrap();
/// assert_eq!(event.device_name, "d1");
/// assert!(event.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub id: String,
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    /// Nanoseconds since the Unix epoch
    pub origin: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub readings: Vec<Reading>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Value>,
}

/// A single value sample from a device resource
///
/// The value is always carried as a string; `value_type` names the logical
/// type but nothing here interprets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Reading {
    pub id: String,
    pub origin: i64,
    pub device_name: String,
    pub resource_name: String,
    pub profile_name: String,
    pub value_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Value>,
}

/// Request wrapper published by EdgeX core services
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventRequest {
    pub api_version: String,
    pub request_id: String,
    pub event: Event,
}

/// Why a decoded event was not accepted
#[derive(Debug, Error, PartialEq)]
pub enum EventValidationError {
    #[error("event is missing id")]
    MissingId,
    #[error("event is missing deviceName")]
    MissingDeviceName,
}

impl Event {
    /// Check the minimal invariants: non-empty `id` and `deviceName`
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.id.is_empty() {
            return Err(EventValidationError::MissingId);
        }
        if self.device_name.is_empty() {
            return Err(EventValidationError::MissingDeviceName);
        }
        Ok(())
    }
}

impl Reading {
    /// Build a string-valued reading, mirroring EdgeX's simple reading
    pub fn simple(
        id: impl Into<String>,
        origin: i64,
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            origin,
            device_name: device_name.into(),
            resource_name: resource_name.into(),
            profile_name: profile_name.into(),
            value_type: value_type.into(),
            value: value.into(),
            units: None,
            tags: HashMap::new(),
        }
    }
}

/// Which JSON shape to expect inside an envelope's payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `{"apiVersion", "requestId", "event": {...}}`
    Request,
    /// The event object itself
    Event,
    /// Request when the top-level object has an `event` key, otherwise Event
    #[default]
    Auto,
}

impl PayloadFormat {
    /// Parse from a CLI/config string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "request" | "payload" => Some(Self::Request),
            "event" => Some(Self::Event),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Decode `payload` into an event according to this format
    pub fn decode(&self, payload: &[u8]) -> Result<Event, serde_json::Error> {
        match self {
            PayloadFormat::Request => {
                serde_json::from_slice::<EventRequest>(payload).map(|request| request.event)
            }
            PayloadFormat::Event => serde_json::from_slice::<Event>(payload),
            PayloadFormat::Auto => {
                let value: Value = serde_json::from_slice(payload)?;
                let is_request = value
                    .as_object()
                    .is_some_and(|object| object.contains_key("event"));
                if is_request {
                    serde_json::from_value::<EventRequest>(value).map(|request| request.event)
                } else {
                    serde_json::from_value::<Event>(value)
                }
            }
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
