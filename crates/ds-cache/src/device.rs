//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device cache."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use ds_common::{DsError, DsResult};
use ds_models::{AdminState, Device, OperatingState};
use parking_lot::RwLock;

/// Devices owned by this service, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DeviceCache {
    devices: Arc<RwLock<HashMap<String, Device>>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache, rejecting duplicate names in the input.
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> DsResult<Self> {
        let cache = Self::new();
        for device in devices {
            cache.add(device)?;
        }
        Ok(cache)
    }

    pub fn for_name(&self, name: &str) -> Option<Device> {
        self.devices.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.read().contains_key(name)
    }

    /// Snapshot of every device, sorted by name.
    pub fn all(&self) -> Vec<Device> {
        let mut all: Vec<Device> = self.devices.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Devices that are UNLOCKED and UP, sorted by name.
    pub fn operational(&self) -> Vec<Device> {
        let mut up: Vec<Device> = self
            .devices
            .read()
            .values()
            .filter(|device| device.is_operational())
            .cloned()
            .collect();
        up.sort_by(|a, b| a.name.cmp(&b.name));
        up
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Insert a new device; an existing entry with the same name is left untouched.
    pub fn add(&self, device: Device) -> DsResult<()> {
        let mut devices = self.devices.write();
        if devices.contains_key(&device.name) {
            return Err(DsError::duplicate(format!(
                "device {} already exists in cache",
                device.name
            )));
        }
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    /// Replace an existing device in one critical section.
    pub fn update(&self, device: Device) -> DsResult<()> {
        let mut devices = self.devices.write();
        if devices.remove(&device.name).is_none() {
            return Err(DsError::not_found(format!(
                "device {} does not exist in cache",
                device.name
            )));
        }
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    /// Insert or replace; returns true when the device was already cached.
    pub fn upsert(&self, device: Device) -> bool {
        self.devices
            .write()
            .insert(device.name.clone(), device)
            .is_some()
    }

    /// Remove and return the device.
    pub fn remove_by_name(&self, name: &str) -> DsResult<Device> {
        self.devices
            .write()
            .remove(name)
            .ok_or_else(|| DsError::not_found(format!("device {name} does not exist in cache")))
    }

    /// Set the admin state from its wire text (`LOCKED`/`UNLOCKED`).
    pub fn update_admin_state(&self, name: &str, state: &str) -> DsResult<()> {
        let state: AdminState = state.parse()?;
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(name)
            .ok_or_else(|| DsError::not_found(format!("device {name} does not exist in cache")))?;
        device.admin_state = state;
        Ok(())
    }

    /// Set the operating state. Returns the previous state.
    pub fn update_operating_state(
        &self,
        name: &str,
        state: OperatingState,
    ) -> DsResult<OperatingState> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(name)
            .ok_or_else(|| DsError::not_found(format!("device {name} does not exist in cache")))?;
        Ok(std::mem::replace(&mut device.operating_state, state))
    }

    /// True when any cached device uses `profile_name`.
    pub fn references_profile(&self, profile_name: &str) -> bool {
        self.devices
            .read()
            .values()
            .any(|device| device.profile_name == profile_name)
    }
}
