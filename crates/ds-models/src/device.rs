//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device metadata contract."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ds_common::DsError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Key/value connection settings for one protocol.
pub type ProtocolProperties = BTreeMap<String, String>;

/// Protocol name to connection settings.
pub type Protocols = BTreeMap<String, ProtocolProperties>;

/// Administrative state. A locked device or service rejects commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminState {
    /// Commands are rejected.
    Locked,
    /// Normal operation.
    #[default]
    Unlocked,
}

impl AdminState {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminState::Locked => "LOCKED",
            AdminState::Unlocked => "UNLOCKED",
        }
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminState {
    type Err = DsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(AdminState::Locked),
            "UNLOCKED" => Ok(AdminState::Unlocked),
            other => Err(DsError::contract_invalid(format!(
                "invalid admin state '{other}', expected LOCKED or UNLOCKED"
            ))),
        }
    }
}

/// Operating state reported by the service. A DOWN device rejects commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingState {
    /// Reachable and healthy.
    #[default]
    Up,
    /// Failed an assertion or otherwise unusable.
    Down,
}

impl OperatingState {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingState::Up => "UP",
            OperatingState::Down => "DOWN",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingState {
    type Err = DsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(OperatingState::Up),
            "DOWN" => Ok(OperatingState::Down),
            other => Err(DsError::contract_invalid(format!(
                "invalid operating state '{other}', expected UP or DOWN"
            ))),
        }
    }
}

/// Periodic read schedule attached to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoEvent {
    /// Resource or command read on every tick.
    pub source_name: String,
    /// Interval text such as `10s` or `PT1M`.
    pub interval: String,
    /// Only publish when the readings differ from the previous tick.
    #[serde(default)]
    pub on_change: bool,
}

/// Device metadata as stored upstream and cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique device name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Name of the profile describing the device's resources.
    pub profile_name: String,
    /// Owning device service.
    #[serde(default)]
    pub service_name: String,
    /// Protocol connection settings handed to the driver.
    #[serde(default)]
    pub protocols: Protocols,
    /// Administrative state.
    #[serde(default)]
    pub admin_state: AdminState,
    /// Operating state.
    #[serde(default)]
    pub operating_state: OperatingState,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Tags copied onto every event produced for the device.
    #[serde(default)]
    pub tags: BTreeMap<String, JsonValue>,
    /// Periodic read schedules.
    #[serde(default)]
    pub auto_events: Vec<AutoEvent>,
}

impl Device {
    /// Minimal unlocked, up device bound to `profile_name`.
    pub fn new(name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            profile_name: profile_name.into(),
            service_name: String::new(),
            protocols: Protocols::new(),
            admin_state: AdminState::Unlocked,
            operating_state: OperatingState::Up,
            labels: Vec::new(),
            tags: BTreeMap::new(),
            auto_events: Vec::new(),
        }
    }

    /// UNLOCKED and UP.
    pub fn is_operational(&self) -> bool {
        self.admin_state == AdminState::Unlocked && self.operating_state == OperatingState::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_decodes_with_defaults() {
        let device: Device = serde_json::from_str(
            r#"{"name":"Thermo-1","profileName":"Thermostat","autoEvents":[{"sourceName":"Temperature","interval":"10s"}]}"#,
        )
        .unwrap();
        assert_eq!(device.admin_state, AdminState::Unlocked);
        assert_eq!(device.operating_state, OperatingState::Up);
        assert!(device.is_operational());
        assert!(!device.auto_events[0].on_change);
    }

    #[test]
    fn admin_state_parsing_is_strict() {
        assert_eq!("LOCKED".parse::<AdminState>().unwrap(), AdminState::Locked);
        let err = "locked".parse::<AdminState>().unwrap_err();
        assert!(err.is(ds_common::ErrorKind::ContractInvalid));
    }
}
