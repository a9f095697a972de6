//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device service registration record."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::device::AdminState;

/// Registration of this service with the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceServiceRecord {
    /// Service name, unique across the deployment.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Base URL upstream services use to reach the callback API.
    pub base_address: String,
    /// Administrative state; LOCKED rejects every command.
    #[serde(default)]
    pub admin_state: AdminState,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl DeviceServiceRecord {
    /// Unlocked record pointing at `base_address`.
    pub fn new(name: impl Into<String>, base_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            base_address: base_address.into(),
            admin_state: AdminState::Unlocked,
            labels: Vec::new(),
        }
    }
}
