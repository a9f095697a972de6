//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Event and reading egress contracts."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use ds_common::API_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_with::{serde_as, Bytes};
use uuid::Uuid;

use crate::value::{CommandValue, Value, ValueType};

/// One typed sample from a single resource.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Unique reading id.
    pub id: Uuid,
    /// Origin timestamp in nanoseconds, strictly increasing per process.
    pub origin: i64,
    /// Device the reading belongs to.
    pub device_name: String,
    /// Resource that produced the value.
    pub resource_name: String,
    /// Profile of the device.
    pub profile_name: String,
    /// Type of the carried value.
    pub value_type: ValueType,
    /// Engineering units.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    /// Reading tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, JsonValue>,
    /// Canonical text of scalar and array values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Raw bytes of binary values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Bytes>")]
    pub binary_value: Option<Vec<u8>>,
    /// Media type accompanying binary values.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    /// Structured payload of object values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_value: Option<JsonValue>,
}

impl Reading {
    fn base(
        profile_name: &str,
        device_name: &str,
        resource_name: &str,
        value_type: ValueType,
        origin: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            device_name: device_name.to_owned(),
            resource_name: resource_name.to_owned(),
            profile_name: profile_name.to_owned(),
            value_type,
            units: String::new(),
            tags: BTreeMap::new(),
            value: None,
            binary_value: None,
            media_type: String::new(),
            object_value: None,
        }
    }

    /// Reading carrying canonical text.
    pub fn simple(
        profile_name: &str,
        device_name: &str,
        resource_name: &str,
        value_type: ValueType,
        value: impl Into<String>,
        origin: i64,
    ) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::base(profile_name, device_name, resource_name, value_type, origin)
        }
    }

    /// Binary reading; always carries a media type.
    pub fn binary(
        profile_name: &str,
        device_name: &str,
        resource_name: &str,
        bytes: Vec<u8>,
        media_type: impl Into<String>,
        origin: i64,
    ) -> Self {
        Self {
            binary_value: Some(bytes),
            media_type: media_type.into(),
            ..Self::base(profile_name, device_name, resource_name, ValueType::Binary, origin)
        }
    }

    /// Object or object-array reading.
    pub fn object(
        profile_name: &str,
        device_name: &str,
        resource_name: &str,
        value_type: ValueType,
        object: JsonValue,
        origin: i64,
    ) -> Self {
        Self {
            object_value: Some(object),
            ..Self::base(profile_name, device_name, resource_name, value_type, origin)
        }
    }

    /// Reading that only records the type of an unavailable value.
    pub fn null(
        profile_name: &str,
        device_name: &str,
        resource_name: &str,
        value_type: ValueType,
        origin: i64,
    ) -> Self {
        Self::base(profile_name, device_name, resource_name, value_type, origin)
    }

    /// Build the reading matching the shape of `value`.
    ///
    /// `media_type` is only consulted for binary values and falls back to
    /// `application/octet-stream`.
    pub fn from_command_value(
        profile_name: &str,
        device_name: &str,
        value: &CommandValue,
        media_type: &str,
        origin: i64,
    ) -> Self {
        let resource = value.device_resource_name.as_str();
        match value.value() {
            Value::Null => Self::null(profile_name, device_name, resource, value.value_type(), origin),
            Value::Binary(bytes) => {
                let media_type = if media_type.is_empty() {
                    "application/octet-stream"
                } else {
                    media_type
                };
                Self::binary(profile_name, device_name, resource, bytes.clone(), media_type, origin)
            }
            Value::Object(object) => Self::object(
                profile_name,
                device_name,
                resource,
                ValueType::Object,
                object.clone(),
                origin,
            ),
            Value::ObjectArray(items) => Self::object(
                profile_name,
                device_name,
                resource,
                ValueType::ObjectArray,
                JsonValue::Array(items.clone()),
                origin,
            ),
            other => Self::simple(
                profile_name,
                device_name,
                resource,
                value.value_type(),
                other.to_string(),
                origin,
            ),
        }
    }

    /// True for binary readings.
    pub fn is_binary(&self) -> bool {
        self.binary_value.is_some()
    }
}

/// Readings from a single source on a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id.
    pub id: Uuid,
    /// Device the readings belong to.
    pub device_name: String,
    /// Profile of the device.
    pub profile_name: String,
    /// Command or resource name that was requested.
    pub source_name: String,
    /// Origin of the event, equal to the origin of its last reading.
    pub origin: i64,
    /// Event tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, JsonValue>,
    /// Readings in driver order.
    #[serde(default)]
    pub readings: Vec<Reading>,
}

impl Event {
    /// Empty event.
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        source_name: impl Into<String>,
        origin: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_name: device_name.into(),
            profile_name: profile_name.into(),
            source_name: source_name.into(),
            origin,
            tags: BTreeMap::new(),
            readings: Vec::new(),
        }
    }

    /// True when any reading carries binary data; such events are CBOR encoded.
    pub fn has_binary(&self) -> bool {
        self.readings.iter().any(Reading::is_binary)
    }
}

/// Request body for posting an event to core data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEventRequest {
    /// Contract version.
    pub api_version: String,
    /// Request id, echoed by the receiver.
    pub request_id: String,
    /// The event.
    pub event: Event,
}

impl AddEventRequest {
    /// Wrap `event` with a fresh request id.
    pub fn new(event: Event) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            request_id: Uuid::new_v4().to_string(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_shape_follows_value() {
        let float = CommandValue::new("t", ValueType::Float32, Value::Float32(23.0)).unwrap();
        let reading = Reading::from_command_value("P", "D", &float, "", 7);
        assert_eq!(reading.value.as_deref(), Some("2.3e+01"));
        assert_eq!(reading.origin, 7);

        let blob = CommandValue::new("img", ValueType::Binary, Value::Binary(vec![1, 2])).unwrap();
        let reading = Reading::from_command_value("P", "D", &blob, "", 8);
        assert!(reading.is_binary());
        assert_eq!(reading.media_type, "application/octet-stream");
        assert!(reading.value.is_none());

        let absent = CommandValue::null("t", ValueType::Int16);
        let reading = Reading::from_command_value("P", "D", &absent, "", 9);
        assert_eq!(reading.value_type, ValueType::Int16);
        assert!(reading.value.is_none() && reading.binary_value.is_none());
    }

    #[test]
    fn binary_event_survives_cbor() {
        let mut event = Event::new("P", "D", "img", 10);
        event
            .readings
            .push(Reading::binary("P", "D", "img", vec![0xde, 0xad], "image/png", 10));
        assert!(event.has_binary());
        let encoded = serde_cbor::to_vec(&event).unwrap();
        let decoded: Event = serde_cbor::from_slice(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn event_json_uses_camel_case() {
        let event = Event::new("P", "D", "src", 1);
        let json = serde_json::to_value(AddEventRequest::new(event)).unwrap();
        assert_eq!(json["apiVersion"], "v2");
        assert_eq!(json["event"]["deviceName"], "D");
        assert!(json["event"].get("tags").is_none());
    }
}
