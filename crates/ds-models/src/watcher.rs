//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Provision watcher contract."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device::{AdminState, AutoEvent};

/// Rule matching discovered devices for automatic provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionWatcher {
    /// Unique watcher name.
    pub name: String,
    /// Profile assigned to matched devices.
    pub profile_name: String,
    /// Owning device service.
    #[serde(default)]
    pub service_name: String,
    /// Protocol property patterns a discovered device must match.
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    /// Protocol property values that exclude a discovered device.
    #[serde(default)]
    pub blocking_identifiers: BTreeMap<String, Vec<String>>,
    /// Administrative state.
    #[serde(default)]
    pub admin_state: AdminState,
    /// Schedules applied to devices created by this watcher.
    #[serde(default)]
    pub auto_events: Vec<AutoEvent>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl ProvisionWatcher {
    /// Watcher with no identifiers bound to `profile_name`.
    pub fn new(name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile_name: profile_name.into(),
            service_name: String::new(),
            identifiers: BTreeMap::new(),
            blocking_identifiers: BTreeMap::new(),
            admin_state: AdminState::Unlocked,
            auto_events: Vec::new(),
            labels: Vec::new(),
        }
    }
}
