//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Profile cache with precomputed resource and operation indices."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ds_common::{DsError, DsResult};
use ds_models::{DeviceCommand, DeviceProfile, DeviceResource, ResourceOperation};
use parking_lot::RwLock;
use tracing::debug;

use crate::device::DeviceCache;

/// Direction of a command: `get` reads, `set` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandMethod {
    Get,
    Set,
}

impl CommandMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandMethod::Get => "get",
            CommandMethod::Set => "set",
        }
    }
}

impl fmt::Display for CommandMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandMethod {
    type Err = DsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(CommandMethod::Get),
            "set" => Ok(CommandMethod::Set),
            other => Err(DsError::contract_invalid(format!(
                "unknown command method '{other}', expected get or set"
            ))),
        }
    }
}

/// A profile plus the lookups derived from it. Rebuilt as a whole on every
/// write so readers never observe a partially indexed profile.
#[derive(Debug)]
struct ProfileEntry {
    profile: DeviceProfile,
    resources: HashMap<String, DeviceResource>,
    commands: HashMap<String, DeviceCommand>,
    read_ops: HashMap<String, Vec<ResourceOperation>>,
    write_ops: HashMap<String, Vec<ResourceOperation>>,
}

impl ProfileEntry {
    fn build(profile: DeviceProfile) -> DsResult<Self> {
        profile.validate()?;
        let resources = profile
            .device_resources
            .iter()
            .map(|resource| (resource.name.clone(), resource.clone()))
            .collect();
        let mut commands = HashMap::new();
        let mut read_ops = HashMap::new();
        let mut write_ops = HashMap::new();
        for command in &profile.device_commands {
            if command.read_write.readable() {
                read_ops.insert(command.name.clone(), command.resource_operations.clone());
            }
            if command.read_write.writable() {
                write_ops.insert(command.name.clone(), command.resource_operations.clone());
            }
            commands.insert(command.name.clone(), command.clone());
        }
        Ok(Self {
            profile,
            resources,
            commands,
            read_ops,
            write_ops,
        })
    }

    fn ops(&self, method: CommandMethod) -> &HashMap<String, Vec<ResourceOperation>> {
        match method {
            CommandMethod::Get => &self.read_ops,
            CommandMethod::Set => &self.write_ops,
        }
    }
}

/// Device profiles referenced by cached devices, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    profiles: Arc<RwLock<HashMap<String, ProfileEntry>>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_name(&self, name: &str) -> Option<DeviceProfile> {
        self.profiles
            .read()
            .get(name)
            .map(|entry| entry.profile.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.read().contains_key(name)
    }

    pub fn all(&self) -> Vec<DeviceProfile> {
        let mut all: Vec<_> = self
            .profiles
            .read()
            .values()
            .map(|entry| entry.profile.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    /// Insert a new profile after validating it.
    pub fn add(&self, profile: DeviceProfile) -> DsResult<()> {
        let entry = ProfileEntry::build(profile)?;
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&entry.profile.name) {
            return Err(DsError::duplicate(format!(
                "profile {} already exists in cache",
                entry.profile.name
            )));
        }
        debug!(profile = %entry.profile.name, commands = entry.commands.len(), "profile cached");
        profiles.insert(entry.profile.name.clone(), entry);
        Ok(())
    }

    /// Replace a cached profile and rebuild its indices.
    pub fn update(&self, profile: DeviceProfile) -> DsResult<()> {
        let entry = ProfileEntry::build(profile)?;
        let mut profiles = self.profiles.write();
        if profiles.remove(&entry.profile.name).is_none() {
            return Err(DsError::not_found(format!(
                "profile {} does not exist in cache",
                entry.profile.name
            )));
        }
        profiles.insert(entry.profile.name.clone(), entry);
        Ok(())
    }

    /// Remove a profile unless a cached device still references it.
    pub fn remove_by_name(&self, name: &str, devices: &DeviceCache) -> DsResult<DeviceProfile> {
        let mut profiles = self.profiles.write();
        if !profiles.contains_key(name) {
            return Err(DsError::not_found(format!(
                "profile {name} does not exist in cache"
            )));
        }
        if devices.references_profile(name) {
            return Err(DsError::not_allowed(format!(
                "profile {name} is still referenced by a device"
            )));
        }
        profiles
            .remove(name)
            .map(|entry| entry.profile)
            .ok_or_else(|| DsError::not_found(format!("profile {name} does not exist in cache")))
    }

    pub fn device_resource(&self, profile: &str, resource: &str) -> Option<DeviceResource> {
        self.profiles
            .read()
            .get(profile)
            .and_then(|entry| entry.resources.get(resource).cloned())
    }

    pub fn device_command(&self, profile: &str, command: &str) -> Option<DeviceCommand> {
        self.profiles
            .read()
            .get(profile)
            .and_then(|entry| entry.commands.get(command).cloned())
    }

    /// Whether `command` exists for `method`. Unknown commands are `false`;
    /// an unknown profile is an error.
    pub fn command_exists(
        &self,
        profile: &str,
        command: &str,
        method: CommandMethod,
    ) -> DsResult<bool> {
        let profiles = self.profiles.read();
        let entry = profiles.get(profile).ok_or_else(|| missing_profile(profile))?;
        Ok(entry.ops(method).contains_key(command))
    }

    /// Ordered operations of `command` for `method`.
    pub fn resource_operations(
        &self,
        profile: &str,
        command: &str,
        method: CommandMethod,
    ) -> DsResult<Vec<ResourceOperation>> {
        let profiles = self.profiles.read();
        let entry = profiles.get(profile).ok_or_else(|| missing_profile(profile))?;
        entry.ops(method).get(command).cloned().ok_or_else(|| {
            DsError::not_found(format!(
                "command {command} ({method}) does not exist in profile {profile}"
            ))
        })
    }

    /// First operation for `method` that targets `resource`.
    pub fn resource_operation(
        &self,
        profile: &str,
        resource: &str,
        method: CommandMethod,
    ) -> DsResult<ResourceOperation> {
        let profiles = self.profiles.read();
        let entry = profiles.get(profile).ok_or_else(|| missing_profile(profile))?;
        let mut commands: Vec<_> = entry.ops(method).iter().collect();
        commands.sort_by(|a, b| a.0.cmp(b.0));
        commands
            .into_iter()
            .flat_map(|(_, ops)| ops.iter())
            .find(|op| op.device_resource == resource)
            .cloned()
            .ok_or_else(|| {
                DsError::not_found(format!(
                    "no {method} operation targets resource {resource} in profile {profile}"
                ))
            })
    }
}

fn missing_profile(profile: &str) -> DsError {
    DsError::not_found(format!("profile {profile} does not exist in cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_common::ErrorKind;
    use ds_models::{Device, ReadWrite, ResourceProperties, ValueType};

    fn profile() -> DeviceProfile {
        let mut profile = DeviceProfile::new("P");
        profile.device_resources = vec![
            DeviceResource::new("t", ResourceProperties::new(ValueType::Int16)),
            DeviceResource::new("sp", ResourceProperties::new(ValueType::Float32)),
        ];
        profile.device_commands = vec![
            DeviceCommand {
                name: "status".into(),
                is_hidden: false,
                read_write: ReadWrite::Read,
                resource_operations: vec![ResourceOperation::new("t")],
                tags: Default::default(),
            },
            DeviceCommand {
                name: "configure".into(),
                is_hidden: false,
                read_write: ReadWrite::ReadWrite,
                resource_operations: vec![ResourceOperation::new("sp"), ResourceOperation::new("t")],
                tags: Default::default(),
            },
        ];
        profile
    }

    #[test]
    fn indices_split_by_method() {
        let cache = ProfileCache::new();
        cache.add(profile()).unwrap();
        assert!(cache.command_exists("P", "status", CommandMethod::Get).unwrap());
        assert!(!cache.command_exists("P", "status", CommandMethod::Set).unwrap());
        assert!(!cache.command_exists("P", "nope", CommandMethod::Get).unwrap());
        assert!(cache
            .command_exists("Q", "status", CommandMethod::Get)
            .unwrap_err()
            .is(ErrorKind::EntityDoesNotExist));
        let ops = cache
            .resource_operations("P", "configure", CommandMethod::Set)
            .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].device_resource, "sp");
        assert_eq!(
            cache
                .resource_operation("P", "t", CommandMethod::Get)
                .unwrap()
                .device_resource,
            "t"
        );
        assert!(cache.device_resource("P", "sp").is_some());
    }

    #[test]
    fn update_rebuilds_indices() {
        let cache = ProfileCache::new();
        cache.add(profile()).unwrap();
        let mut changed = profile();
        changed.device_commands.remove(0);
        cache.update(changed).unwrap();
        assert!(!cache.command_exists("P", "status", CommandMethod::Get).unwrap());
        assert!(cache.device_command("P", "configure").is_some());
    }

    #[test]
    fn invalid_profile_is_not_cached() {
        let cache = ProfileCache::new();
        let mut broken = profile();
        broken.device_commands[0]
            .resource_operations
            .push(ResourceOperation::new("missing"));
        assert!(cache.add(broken).unwrap_err().is(ErrorKind::ContractInvalid));
        assert!(cache.is_empty());
    }

    #[test]
    fn referenced_profile_cannot_be_removed() {
        let cache = ProfileCache::new();
        let devices = DeviceCache::new();
        cache.add(profile()).unwrap();
        devices.add(Device::new("d1", "P")).unwrap();
        assert!(cache
            .remove_by_name("P", &devices)
            .unwrap_err()
            .is(ErrorKind::NotAllowed));
        devices.remove_by_name("d1").unwrap();
        cache.remove_by_name("P", &devices).unwrap();
        assert!(!cache.contains("P"));
    }

    #[test]
    fn method_parsing() {
        assert_eq!("GET".parse::<CommandMethod>().unwrap(), CommandMethod::Get);
        assert!("post".parse::<CommandMethod>().is_err());
    }
}
