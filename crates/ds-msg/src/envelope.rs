//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Typed envelope carried on the message bus."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use ds_models::AddEventRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MessagingError, Result};

/// Content type of JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type of CBOR payloads, used for events carrying binary readings.
pub const CONTENT_TYPE_CBOR: &str = "application/cbor";

const API_VERSION: &str = "v2";

/// Envelope wrapping every payload published or received on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Correlation id of the originating request.
    pub correlation_id: String,
    /// Contract version.
    pub api_version: String,
    /// Request id; responses echo the id of their request.
    pub request_id: String,
    /// Encoding of `payload`.
    pub content_type: String,
    /// 0 on success, 1 when the payload carries an error response.
    #[serde(default)]
    pub error_code: u8,
    /// Query parameters of a command request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, String>,
    /// Encoded payload, base64 in the JSON form of the envelope.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    /// Envelope around raw bytes.
    pub fn new(
        correlation_id: impl Into<String>,
        content_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            api_version: API_VERSION.to_owned(),
            request_id: Uuid::new_v4().to_string(),
            content_type: content_type.into(),
            error_code: 0,
            query_params: BTreeMap::new(),
            payload,
        }
    }

    /// Encode an event request: CBOR when it carries binary readings, JSON otherwise.
    pub fn for_event(request: &AddEventRequest, correlation_id: &str) -> Result<Self> {
        let (content_type, payload) = if request.event.has_binary() {
            (CONTENT_TYPE_CBOR, serde_cbor::to_vec(request)?)
        } else {
            (CONTENT_TYPE_JSON, serde_json::to_vec(request)?)
        };
        let mut envelope = Self::new(correlation_id, content_type, payload);
        envelope.request_id = request.request_id.clone();
        Ok(envelope)
    }

    /// JSON envelope around any serializable payload.
    pub fn json<T: Serialize>(correlation_id: &str, payload: &T) -> Result<Self> {
        Ok(Self::new(
            correlation_id,
            CONTENT_TYPE_JSON,
            serde_json::to_vec(payload)?,
        ))
    }

    /// Response to `request`: same request and correlation ids, `error_code` 0 or 1.
    pub fn response_to<T: Serialize>(
        request: &MessageEnvelope,
        payload: &T,
        is_error: bool,
    ) -> Result<Self> {
        let mut envelope = Self::json(&request.correlation_id, payload)?;
        envelope.request_id = request.request_id.clone();
        envelope.error_code = u8::from(is_error);
        Ok(envelope)
    }

    /// Decode the payload according to `content_type`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.content_type.as_str() {
            CONTENT_TYPE_JSON => Ok(serde_json::from_slice(&self.payload)?),
            CONTENT_TYPE_CBOR => Ok(serde_cbor::from_slice(&self.payload)?),
            other => Err(MessagingError::UnsupportedContentType(other.to_owned())),
        }
    }

    /// Fail when the payload exceeds `limit` bytes; `None` disables the check.
    pub fn check_size(&self, limit: Option<usize>) -> Result<()> {
        match limit {
            Some(limit) if self.payload.len() > limit => Err(MessagingError::PayloadTooLarge {
                size: self.payload.len(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Builder-style query parameter setter.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
