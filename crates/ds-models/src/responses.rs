//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Response bodies of the v2 API."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use ds_common::API_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::event::Event;

/// Common response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    /// Contract version.
    pub api_version: String,
    /// Request id when the caller supplied one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Human readable detail, mostly for errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// HTTP status mirrored into the body.
    pub status_code: u16,
}

impl BaseResponse {
    /// Header with `status_code` and no message.
    pub fn new(status_code: u16) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            request_id: String::new(),
            message: None,
            status_code,
        }
    }

    /// Header carrying an error message.
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(status_code)
        }
    }
}

/// Single command result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Header.
    #[serde(flatten)]
    pub base: BaseResponse,
    /// Event, omitted when the caller asked not to return it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

/// Command-all result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiEventResponse {
    /// Header.
    #[serde(flatten)]
    pub base: BaseResponse,
    /// One event per device that answered.
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Liveness probe answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Contract version.
    pub api_version: String,
    /// RFC 3339 timestamp of the answer.
    pub timestamp: String,
    /// Service name.
    pub service_name: String,
}

/// Version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    /// Contract version.
    pub api_version: String,
    /// Service version.
    pub version: String,
    /// Runtime library version.
    pub sdk_version: String,
    /// Service name.
    pub service_name: String,
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    /// Contract version.
    pub api_version: String,
    /// Service name.
    pub service_name: String,
    /// Configuration rendered as JSON.
    pub config: JsonValue,
}

/// Runtime metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    /// Contract version.
    pub api_version: String,
    /// Service name.
    pub service_name: String,
    /// Counter values.
    pub metrics: JsonValue,
}

/// Accepted discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    /// Header; `status_code` is 202.
    #[serde(flatten)]
    pub base: BaseResponse,
    /// Id of the running discovery, shared by deduplicated triggers.
    pub discovery_id: String,
}
