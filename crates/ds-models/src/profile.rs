//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device profile contract: resources, commands and operations."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashSet};

use ds_common::{DsError, DsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_with::{serde_as, NoneAsEmptyString, PickFirst};

use crate::value::ValueType;

/// Access mode of a resource or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadWrite {
    /// Read only.
    #[serde(rename = "R")]
    Read,
    /// Write only, legacy spelling.
    #[serde(rename = "W")]
    Write,
    /// Read and write.
    #[default]
    #[serde(rename = "RW", alias = "WR")]
    ReadWrite,
    /// Write only.
    #[serde(rename = "WO")]
    WriteOnly,
}

impl ReadWrite {
    /// R or RW.
    pub fn readable(self) -> bool {
        matches!(self, ReadWrite::Read | ReadWrite::ReadWrite)
    }

    /// W, RW or WO.
    pub fn writable(self) -> bool {
        !matches!(self, ReadWrite::Read)
    }
}

/// Typing and transformation properties of a resource.
///
/// Numeric transformation fields accept either JSON numbers or strings, and
/// treat an empty string as absent, so profiles authored with quoted values
/// decode the same way as numeric ones.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    /// Declared value type.
    pub value_type: ValueType,
    /// Access mode.
    #[serde(default)]
    pub read_write: ReadWrite,
    /// Engineering units copied onto readings.
    #[serde(default)]
    pub units: String,
    /// Fallback value for writes when neither the request nor the operation supplies one.
    #[serde(default)]
    pub default_value: String,
    /// Media type of binary readings.
    #[serde(default)]
    pub media_type: String,
    /// Expected canonical text of every read; mismatch marks the device DOWN.
    #[serde(default)]
    pub assertion: String,
    /// Bitwise AND applied on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub mask: Option<u64>,
    /// Logical shift; positive shifts left on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub shift: Option<i64>,
    /// Exponent base applied on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub base: Option<f64>,
    /// Multiplier applied on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub scale: Option<f64>,
    /// Addend applied on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub offset: Option<f64>,
    /// Lowest value accepted on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub minimum: Option<f64>,
    /// Highest value accepted on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    pub maximum: Option<f64>,
}

impl ResourceProperties {
    /// Read-write properties of `value_type` with no transformation.
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            read_write: ReadWrite::ReadWrite,
            units: String::new(),
            default_value: String::new(),
            media_type: String::new(),
            assertion: String::new(),
            mask: None,
            shift: None,
            base: None,
            scale: None,
            offset: None,
            minimum: None,
            maximum: None,
        }
    }
}

/// Smallest addressable I/O unit of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResource {
    /// Name, unique within the profile.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Hidden resources are not exposed as commands.
    #[serde(default)]
    pub is_hidden: bool,
    /// Driver-specific addressing attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    /// Typing and transformation properties.
    pub properties: ResourceProperties,
    /// Tags copied onto readings of this resource.
    #[serde(default)]
    pub tags: BTreeMap<String, JsonValue>,
}

impl DeviceResource {
    /// Resource with no attributes or tags.
    pub fn new(name: impl Into<String>, properties: ResourceProperties) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_hidden: false,
            attributes: BTreeMap::new(),
            properties,
            tags: BTreeMap::new(),
        }
    }
}

/// One step of a [`DeviceCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOperation {
    /// Target resource; must exist in the same profile.
    pub device_resource: String,
    /// Value written when the request does not supply one.
    #[serde(default, alias = "parameter")]
    pub default_value: String,
    /// Raw value text to replacement text.
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

impl ResourceOperation {
    /// Operation on `device_resource` without defaults or mappings.
    pub fn new(device_resource: impl Into<String>) -> Self {
        Self {
            device_resource: device_resource.into(),
            default_value: String::new(),
            mappings: BTreeMap::new(),
        }
    }
}

/// Named, ordered composition of resource operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    /// Command name, unique within the profile.
    pub name: String,
    /// Hidden commands are not exposed on the command API.
    #[serde(default)]
    pub is_hidden: bool,
    /// Access mode of the command as a whole.
    #[serde(default)]
    pub read_write: ReadWrite,
    /// Ordered operations.
    #[serde(default)]
    pub resource_operations: Vec<ResourceOperation>,
    /// Tags copied onto events produced by this command.
    #[serde(default)]
    pub tags: BTreeMap<String, JsonValue>,
}

/// Schema describing the resources and commands of a kind of device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Unique profile name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Manufacturer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Resources.
    #[serde(default)]
    pub device_resources: Vec<DeviceResource>,
    /// Commands.
    #[serde(default)]
    pub device_commands: Vec<DeviceCommand>,
}

impl DeviceProfile {
    /// Empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            manufacturer: None,
            model: None,
            labels: Vec::new(),
            device_resources: Vec::new(),
            device_commands: Vec::new(),
        }
    }

    /// Check structural integrity: non-empty unique names and every operation
    /// pointing at a resource of this profile.
    pub fn validate(&self) -> DsResult<()> {
        if self.name.trim().is_empty() {
            return Err(DsError::contract_invalid("profile name must not be empty"));
        }
        let mut resources = HashSet::new();
        for resource in &self.device_resources {
            if resource.name.is_empty() {
                return Err(DsError::contract_invalid(format!(
                    "profile {} has a resource without a name",
                    self.name
                )));
            }
            if !resources.insert(resource.name.as_str()) {
                return Err(DsError::contract_invalid(format!(
                    "profile {} declares resource {} twice",
                    self.name, resource.name
                )));
            }
        }
        let mut commands = HashSet::new();
        for command in &self.device_commands {
            if !commands.insert(command.name.as_str()) {
                return Err(DsError::contract_invalid(format!(
                    "profile {} declares command {} twice",
                    self.name, command.name
                )));
            }
            for op in &command.resource_operations {
                if !resources.contains(op.device_resource.as_str()) {
                    return Err(DsError::contract_invalid(format!(
                        "command {} of profile {} references unknown resource {}",
                        command.name, self.name, op.device_resource
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resource by name.
    pub fn resource(&self, name: &str) -> Option<&DeviceResource> {
        self.device_resources.iter().find(|r| r.name == name)
    }
}
