//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Upstream metadata and core-data client contracts."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ds_common::{DsError, DsResult};
use ds_models::{
    AddEventRequest, Device, DeviceProfile, DeviceServiceRecord, OperatingState,
    ProvisionWatcher, UpdateDeviceService,
};
use parking_lot::RwLock;

mod http;

pub use http::{HttpCoreDataClient, HttpMetadataClient};

/// Subset of the metadata service the runtime consumes.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn ping(&self) -> DsResult<()>;
    async fn device_service_by_name(&self, name: &str) -> DsResult<DeviceServiceRecord>;
    async fn add_device_service(&self, record: &DeviceServiceRecord) -> DsResult<()>;
    async fn update_device_service(&self, update: &UpdateDeviceService) -> DsResult<()>;
    async fn devices_by_service_name(&self, service: &str) -> DsResult<Vec<Device>>;
    async fn device_by_name(&self, name: &str) -> DsResult<Device>;
    async fn device_profile_by_name(&self, name: &str) -> DsResult<DeviceProfile>;
    async fn provision_watchers_by_service_name(
        &self,
        service: &str,
    ) -> DsResult<Vec<ProvisionWatcher>>;
    async fn update_device_operating_state(
        &self,
        name: &str,
        state: OperatingState,
    ) -> DsResult<()>;
    /// `at` is milliseconds since the epoch.
    async fn update_device_last_connected(&self, name: &str, at: i64) -> DsResult<()>;
}

/// Core-data ingestion used when the message bus is disabled.
#[async_trait]
pub trait CoreDataClient: Send + Sync {
    async fn ping(&self) -> DsResult<()>;
    async fn add_event(&self, request: &AddEventRequest) -> DsResult<()>;
}

#[derive(Debug, Default)]
struct MetadataStore {
    services: HashMap<String, DeviceServiceRecord>,
    devices: HashMap<String, Device>,
    profiles: HashMap<String, DeviceProfile>,
    watchers: HashMap<String, ProvisionWatcher>,
    operating_state_updates: Vec<(String, OperatingState)>,
    last_connected_updates: Vec<(String, i64)>,
    service_updates: Vec<UpdateDeviceService>,
}

/// Metadata service held in memory. Records every write the runtime issues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataClient {
    store: Arc<RwLock<MetadataStore>>,
    failing_pings: Arc<AtomicU32>,
}

impl InMemoryMetadataClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` pings fail as if the service were unreachable.
    pub fn fail_pings(&self, count: u32) {
        self.failing_pings.store(count, Ordering::SeqCst);
    }

    pub fn insert_device(&self, device: Device) {
        self.store
            .write()
            .devices
            .insert(device.name.clone(), device);
    }

    pub fn remove_device(&self, name: &str) -> Option<Device> {
        self.store.write().devices.remove(name)
    }

    pub fn insert_profile(&self, profile: DeviceProfile) {
        self.store
            .write()
            .profiles
            .insert(profile.name.clone(), profile);
    }

    pub fn insert_watcher(&self, watcher: ProvisionWatcher) {
        self.store
            .write()
            .watchers
            .insert(watcher.name.clone(), watcher);
    }

    pub fn insert_service(&self, record: DeviceServiceRecord) {
        self.store
            .write()
            .services
            .insert(record.name.clone(), record);
    }

    pub fn service(&self, name: &str) -> Option<DeviceServiceRecord> {
        self.store.read().services.get(name).cloned()
    }

    pub fn device(&self, name: &str) -> Option<Device> {
        self.store.read().devices.get(name).cloned()
    }

    pub fn operating_state_updates(&self) -> Vec<(String, OperatingState)> {
        self.store.read().operating_state_updates.clone()
    }

    pub fn last_connected_updates(&self) -> Vec<(String, i64)> {
        self.store.read().last_connected_updates.clone()
    }

    pub fn service_updates(&self) -> Vec<UpdateDeviceService> {
        self.store.read().service_updates.clone()
    }
}

#[async_trait]
impl MetadataClient for InMemoryMetadataClient {
    async fn ping(&self) -> DsResult<()> {
        let remaining = self.failing_pings.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_pings.store(remaining - 1, Ordering::SeqCst);
            return Err(DsError::unavailable("metadata service unreachable"));
        }
        Ok(())
    }

    async fn device_service_by_name(&self, name: &str) -> DsResult<DeviceServiceRecord> {
        self.service(name)
            .ok_or_else(|| DsError::not_found(format!("device service {name} not found")))
    }

    async fn add_device_service(&self, record: &DeviceServiceRecord) -> DsResult<()> {
        let mut store = self.store.write();
        if store.services.contains_key(&record.name) {
            return Err(DsError::duplicate(format!(
                "device service {} already exists",
                record.name
            )));
        }
        store.services.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn update_device_service(&self, update: &UpdateDeviceService) -> DsResult<()> {
        let mut store = self.store.write();
        let record = store
            .services
            .get_mut(&update.name)
            .ok_or_else(|| DsError::not_found(format!("device service {} not found", update.name)))?;
        if let Some(state) = update.admin_state {
            record.admin_state = state;
        }
        if let Some(labels) = &update.labels {
            record.labels = labels.clone();
        }
        if let Some(address) = &update.base_address {
            record.base_address = address.clone();
        }
        store.service_updates.push(update.clone());
        Ok(())
    }

    async fn devices_by_service_name(&self, service: &str) -> DsResult<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .store
            .read()
            .devices
            .values()
            .filter(|device| device.service_name == service)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    async fn device_by_name(&self, name: &str) -> DsResult<Device> {
        self.device(name)
            .ok_or_else(|| DsError::not_found(format!("device {name} not found")))
    }

    async fn device_profile_by_name(&self, name: &str) -> DsResult<DeviceProfile> {
        self.store
            .read()
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| DsError::not_found(format!("device profile {name} not found")))
    }

    async fn provision_watchers_by_service_name(
        &self,
        service: &str,
    ) -> DsResult<Vec<ProvisionWatcher>> {
        Ok(self
            .store
            .read()
            .watchers
            .values()
            .filter(|watcher| watcher.service_name == service)
            .cloned()
            .collect())
    }

    async fn update_device_operating_state(
        &self,
        name: &str,
        state: OperatingState,
    ) -> DsResult<()> {
        let mut store = self.store.write();
        if let Some(device) = store.devices.get_mut(name) {
            device.operating_state = state;
        }
        store.operating_state_updates.push((name.to_owned(), state));
        Ok(())
    }

    async fn update_device_last_connected(&self, name: &str, at: i64) -> DsResult<()> {
        self.store
            .write()
            .last_connected_updates
            .push((name.to_owned(), at));
        Ok(())
    }
}

/// Core-data service held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoreDataClient {
    events: Arc<RwLock<Vec<AddEventRequest>>>,
}

impl InMemoryCoreDataClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far.
    pub fn received(&self) -> Vec<AddEventRequest> {
        self.events.read().clone()
    }
}

#[async_trait]
impl CoreDataClient for InMemoryCoreDataClient {
    async fn ping(&self) -> DsResult<()> {
        Ok(())
    }

    async fn add_event(&self, request: &AddEventRequest) -> DsResult<()> {
        self.events.write().push(request.clone());
        Ok(())
    }
}
