//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Protocol driver contract."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use async_trait::async_trait;
use ds_common::{DsError, DsResult};
use ds_models::{AdminState, CommandValue, Device, Protocols, ValueType};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

pub mod simulated;

/// Attribute key carrying the raw query string of the originating request.
pub const URL_RAW_QUERY: &str = "urlRawQuery";

/// One resource to read or write, in operation order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Target resource.
    pub device_resource_name: String,
    /// Resource attributes plus `urlRawQuery` when the request had a query.
    pub attributes: BTreeMap<String, JsonValue>,
    /// Declared value type of the resource.
    pub value_type: ValueType,
}

/// Values a driver pushes without being asked.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncValues {
    /// Device the values belong to.
    pub device_name: String,
    /// Source name recorded on the resulting event.
    pub source_name: String,
    /// Values in the order they were sampled.
    pub command_values: Vec<CommandValue>,
}

/// Handed to [`ProtocolDriver::initialize`].
#[derive(Debug, Clone)]
pub struct DriverContext {
    /// Name of the hosting service, for the driver's own logging.
    pub service_name: String,
    /// Sender for asynchronous readings; `None` when async readings are disabled.
    pub async_values: Option<mpsc::Sender<AsyncValues>>,
}

/// Interface every protocol driver implements.
///
/// `initialize` must not block: long-running work belongs in tasks the driver
/// spawns itself, reporting through [`DriverContext::async_values`].
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    async fn initialize(&self, ctx: DriverContext) -> DsResult<()>;

    async fn add_device(
        &self,
        name: &str,
        protocols: &Protocols,
        admin_state: AdminState,
    ) -> DsResult<()>;

    async fn update_device(
        &self,
        name: &str,
        protocols: &Protocols,
        admin_state: AdminState,
    ) -> DsResult<()>;

    async fn remove_device(&self, name: &str, protocols: &Protocols) -> DsResult<()>;

    /// May return fewer, equal or more values than requested.
    async fn handle_read_commands(
        &self,
        device_name: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> DsResult<Vec<CommandValue>>;

    /// `values[i]` belongs to `requests[i]`.
    async fn handle_write_commands(
        &self,
        device_name: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
        values: &[CommandValue],
    ) -> DsResult<()>;

    async fn stop(&self, force: bool) -> DsResult<()>;

    /// Whether [`ProtocolDriver::discover`] is implemented. Discovery
    /// requests against a driver that returns `false` are rejected up front.
    fn supports_discovery(&self) -> bool {
        false
    }

    /// Start a discovery pass.
    async fn discover(&self) -> DsResult<()> {
        Err(DsError::not_implemented("driver does not support discovery"))
    }

    /// Validate a device before it is accepted. Accepts everything by default.
    async fn validate_device(&self, _device: &Device) -> DsResult<()> {
        Ok(())
    }
}
