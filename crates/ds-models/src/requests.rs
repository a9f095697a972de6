//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Callback and update request bodies."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use ds_common::API_VERSION;
use serde::{Deserialize, Serialize};

use crate::device::AdminState;
use crate::profile::DeviceProfile;
use crate::watcher::ProvisionWatcher;

fn default_api_version() -> String {
    API_VERSION.to_owned()
}

/// Reference to an entity by name. Extra fields of a full DTO are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityName {
    /// Entity name.
    pub name: String,
}

/// Body of device add/update callbacks. The full device is re-fetched from
/// metadata, so only its name is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCallback {
    /// Contract version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Device reference.
    pub device: EntityName,
}

/// Body of the profile update callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCallback {
    /// Contract version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Updated profile.
    pub profile: DeviceProfile,
}

/// Body of provision watcher add/update callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherCallback {
    /// Contract version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Watcher.
    pub provision_watcher: ProvisionWatcher,
}

/// Partial update of the service registration. Only `admin_state`,
/// `labels` and `base_address` are applied; `name` selects the record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceService {
    /// Service name.
    pub name: String,
    /// New administrative state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state: Option<AdminState>,
    /// Replacement labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// New callback base address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_address: Option<String>,
}

/// Body of the service update callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCallback {
    /// Contract version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Fields to update.
    pub service: UpdateDeviceService,
}
