//! Message envelope and its two wire encodings
//!
//! EdgeX services wrap every payload in a JSON message envelope before it is
//! handed to MQTT; the raw payload travels base64-encoded in the `payload`
//! field. Some publishers skip the wrapper and send the event JSON as the
//! MQTT payload directly, relying on MQTT v5 properties for the content type
//! and correlation id. [`EnvelopeCodec`] handles both.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The only content type the dispatcher accepts
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Transport wrapper around a raw payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEnvelope {
    pub correlation_id: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    /// Topic the message arrived on; empty for outbound envelopes
    pub received_topic: String,
    pub api_version: String,
    pub request_id: String,
    pub error_code: i32,
    pub query_params: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Envelope for a JSON payload with a fresh correlation id
    pub fn new_json(payload: Vec<u8>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            payload,
            content_type: CONTENT_TYPE_JSON.to_string(),
            api_version: crate::protocol::API_VERSION.to_string(),
            ..Default::default()
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type == CONTENT_TYPE_JSON
    }
}

/// How envelopes map onto MQTT payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeMode {
    /// JSON message envelope with a base64 payload
    #[default]
    Edgex,
    /// MQTT payload is the event itself; metadata from MQTT v5 properties
    Raw,
}

/// Envelope decoding errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed message envelope on {topic}: {source}")]
    MalformedEnvelope {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Envelope payload on {topic} is not valid base64: {source}")]
    InvalidPayloadEncoding {
        topic: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Envelope payload on {topic} has unsupported JSON type")]
    UnsupportedPayloadType { topic: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Wire form of the EdgeX message envelope
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireEnvelope {
    #[serde(rename = "apiVersion", skip_serializing_if = "String::is_empty")]
    api_version: String,
    #[serde(rename = "receivedTopic", skip_serializing_if = "String::is_empty")]
    received_topic: String,
    #[serde(rename = "correlationID")]
    correlation_id: String,
    #[serde(rename = "requestID", skip_serializing_if = "String::is_empty")]
    request_id: String,
    #[serde(rename = "errorCode")]
    error_code: i32,
    payload: Value,
    #[serde(rename = "contentType")]
    content_type: String,
    #[serde(rename = "queryParams", skip_serializing_if = "HashMap::is_empty")]
    query_params: HashMap<String, String>,
}

/// MQTT-level metadata that accompanies a raw payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMetadata {
    pub content_type: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
}

/// Stateless conversion between envelopes and MQTT payloads
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode an inbound MQTT message into an envelope (pure function)
    pub fn decode(
        mode: EnvelopeMode,
        topic: &str,
        payload: &[u8],
        metadata: RawMetadata,
    ) -> Result<MessageEnvelope, EnvelopeError> {
        match mode {
            EnvelopeMode::Edgex => Self::decode_edgex(topic, payload),
            EnvelopeMode::Raw => Ok(Self::decode_raw(topic, payload, metadata)),
        }
    }

    /// Encode an outbound envelope into MQTT payload bytes plus raw metadata
    pub fn encode(
        mode: EnvelopeMode,
        envelope: &MessageEnvelope,
    ) -> Result<(Vec<u8>, RawMetadata), EnvelopeError> {
        match mode {
            EnvelopeMode::Edgex => {
                let wire = WireEnvelope {
                    api_version: envelope.api_version.clone(),
                    received_topic: String::new(),
                    correlation_id: envelope.correlation_id.clone(),
                    request_id: envelope.request_id.clone(),
                    error_code: envelope.error_code,
                    payload: Value::String(STANDARD.encode(&envelope.payload)),
                    content_type: envelope.content_type.clone(),
                    query_params: envelope.query_params.clone(),
                };
                Ok((serde_json::to_vec(&wire)?, RawMetadata::default()))
            }
            EnvelopeMode::Raw => Ok((
                envelope.payload.clone(),
                RawMetadata {
                    content_type: Some(envelope.content_type.clone()),
                    correlation_data: Some(envelope.correlation_id.clone().into_bytes()),
                },
            )),
        }
    }

    fn decode_edgex(topic: &str, payload: &[u8]) -> Result<MessageEnvelope, EnvelopeError> {
        let wire: WireEnvelope =
            serde_json::from_slice(payload).map_err(|source| EnvelopeError::MalformedEnvelope {
                topic: topic.to_string(),
                source,
            })?;

        let raw_payload = match wire.payload {
            Value::String(encoded) => {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|source| EnvelopeError::InvalidPayloadEncoding {
                        topic: topic.to_string(),
                        source,
                    })?
            }
            // Some publishers embed the JSON document instead of base64 bytes
            embedded @ (Value::Object(_) | Value::Array(_)) => serde_json::to_vec(&embedded)?,
            Value::Null => Vec::new(),
            _ => {
                return Err(EnvelopeError::UnsupportedPayloadType {
                    topic: topic.to_string(),
                })
            }
        };

        Ok(MessageEnvelope {
            correlation_id: wire.correlation_id,
            payload: raw_payload,
            content_type: wire.content_type,
            received_topic: topic.to_string(),
            api_version: wire.api_version,
            request_id: wire.request_id,
            error_code: wire.error_code,
            query_params: wire.query_params,
        })
    }

    fn decode_raw(topic: &str, payload: &[u8], metadata: RawMetadata) -> MessageEnvelope {
        MessageEnvelope {
            correlation_id: metadata
                .correlation_data
                .map(|data| String::from_utf8_lossy(&data).into_owned())
                .unwrap_or_default(),
            payload: payload.to_vec(),
            content_type: metadata
                .content_type
                .unwrap_or_else(|| CONTENT_TYPE_JSON.to_string()),
            received_topic: topic.to_string(),
            ..Default::default()
        }
    }
}
