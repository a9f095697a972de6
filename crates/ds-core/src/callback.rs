//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Metadata callback handlers keeping caches, driver and schedules in sync."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use ds_common::{CorrelationId, DsError, DsResult, ErrorKind};
use ds_models::{Device, DeviceProfile, ProvisionWatcher, UpdateDeviceService};
use tracing::{error, info, warn};

use crate::autoevent::AutoEventManager;
use crate::container::ServiceContainer;

/// One entry point per callback kind and method.
///
/// Driver hook failures do not roll back the cache: metadata already holds
/// the change, so the cache follows it and the caller gets a `ServerError`.
#[derive(Debug, Clone)]
pub struct MetadataCallbacks {
    container: ServiceContainer,
    auto_events: AutoEventManager,
}

fn driver_error(action: &str, device: &str, err: DsError) -> DsError {
    DsError::wrap(
        ErrorKind::ServerError,
        format!("driver failed to {action} device {device}"),
        err,
    )
}

impl MetadataCallbacks {
    pub fn new(container: ServiceContainer, auto_events: AutoEventManager) -> Self {
        Self {
            container,
            auto_events,
        }
    }

    pub fn auto_events(&self) -> &AutoEventManager {
        &self.auto_events
    }

    /// Fetch the device, make sure its profile is cached, cache it, announce
    /// it to the driver and schedule its auto events.
    pub async fn add_device(&self, name: &str, correlation_id: &CorrelationId) -> DsResult<()> {
        let device = self.container.metadata.device_by_name(name).await?;
        self.ensure_profile(&device.profile_name).await?;
        self.container.caches.devices.add(device.clone())?;
        info!(correlation_id = %correlation_id.as_str(), device = %name, profile = %device.profile_name, "device added");
        let driver_result = self
            .container
            .driver
            .add_device(&device.name, &device.protocols, device.admin_state)
            .await;
        self.auto_events.restart_for_device(name).await;
        driver_result.map_err(|err| driver_error("add", name, err))
    }

    /// Re-fetch and replace the cached device. A device that moved to another
    /// service is dropped locally; an unknown one is added.
    pub async fn update_device(&self, name: &str, correlation_id: &CorrelationId) -> DsResult<()> {
        let device = self.container.metadata.device_by_name(name).await?;
        let service_name = self.container.service_name();
        if !device.service_name.is_empty() && device.service_name != service_name {
            info!(
                correlation_id = %correlation_id.as_str(),
                device = %name,
                service = %device.service_name,
                "device moved to another service"
            );
            return match self.container.caches.devices.for_name(name) {
                Some(_) => self.delete_device(name, correlation_id).await,
                None => Ok(()),
            };
        }

        self.ensure_profile(&device.profile_name).await?;
        let previous = self.container.caches.devices.for_name(name);
        let driver_result = match &previous {
            Some(old) => {
                self.container.caches.devices.update(device.clone())?;
                if old.profile_name != device.profile_name {
                    self.container.caches.evict_unused_profile(&old.profile_name);
                }
                self.container
                    .driver
                    .update_device(&device.name, &device.protocols, device.admin_state)
                    .await
                    .map_err(|err| driver_error("update", name, err))
            }
            None => {
                self.container.caches.devices.add(device.clone())?;
                self.container
                    .driver
                    .add_device(&device.name, &device.protocols, device.admin_state)
                    .await
                    .map_err(|err| driver_error("add", name, err))
            }
        };
        info!(correlation_id = %correlation_id.as_str(), device = %name, existed = previous.is_some(), "device updated");
        self.auto_events.restart_for_device(name).await;
        driver_result
    }

    /// Stop auto events, drop the device, tell the driver and evict the
    /// profile when nothing references it anymore.
    pub async fn delete_device(&self, name: &str, correlation_id: &CorrelationId) -> DsResult<()> {
        self.auto_events.stop_for_device(name).await;
        let device: Device = self.container.caches.devices.remove_by_name(name)?;
        let driver_result = self
            .container
            .driver
            .remove_device(&device.name, &device.protocols)
            .await;
        let evicted = self
            .container
            .caches
            .evict_unused_profile(&device.profile_name);
        info!(
            correlation_id = %correlation_id.as_str(),
            device = %name,
            profile_evicted = evicted,
            "device deleted"
        );
        driver_result.map_err(|err| {
            error!(correlation_id = %correlation_id.as_str(), device = %name, error = %err, "driver failed to remove device");
            driver_error("remove", name, err)
        })
    }

    /// Replace a cached profile. Profiles enter the cache through devices, so
    /// an uncached profile is reported as missing.
    pub async fn update_profile(
        &self,
        profile: DeviceProfile,
        correlation_id: &CorrelationId,
    ) -> DsResult<()> {
        let name = profile.name.clone();
        if let Err(err) = self.container.caches.profiles.update(profile) {
            if err.is(ErrorKind::EntityDoesNotExist) {
                warn!(correlation_id = %correlation_id.as_str(), profile = %name, "profile update for a profile no device uses");
            }
            return Err(err);
        }
        info!(correlation_id = %correlation_id.as_str(), profile = %name, "profile updated");
        Ok(())
    }

    pub async fn add_watcher(
        &self,
        watcher: ProvisionWatcher,
        correlation_id: &CorrelationId,
    ) -> DsResult<()> {
        let name = watcher.name.clone();
        self.container.caches.watchers.add(watcher)?;
        info!(correlation_id = %correlation_id.as_str(), watcher = %name, "provision watcher added");
        Ok(())
    }

    pub async fn update_watcher(
        &self,
        watcher: ProvisionWatcher,
        correlation_id: &CorrelationId,
    ) -> DsResult<()> {
        let name = watcher.name.clone();
        let watchers = &self.container.caches.watchers;
        if watchers.for_name(&name).is_some() {
            watchers.update(watcher)?;
        } else {
            watchers.add(watcher)?;
        }
        info!(correlation_id = %correlation_id.as_str(), watcher = %name, "provision watcher updated");
        Ok(())
    }

    pub async fn delete_watcher(&self, name: &str, correlation_id: &CorrelationId) -> DsResult<()> {
        self.container.caches.watchers.remove_by_name(name)?;
        info!(correlation_id = %correlation_id.as_str(), watcher = %name, "provision watcher deleted");
        Ok(())
    }

    /// Apply `adminState` and `labels`. The name identifies this service and
    /// cannot change.
    pub async fn update_service(
        &self,
        update: &UpdateDeviceService,
        correlation_id: &CorrelationId,
    ) -> DsResult<()> {
        let service_name = self.container.service_name();
        if update.name != service_name {
            return Err(DsError::not_found(format!(
                "device service {} does not match this service {service_name}",
                update.name
            )));
        }
        let mut record = self.container.service.write();
        if let Some(state) = update.admin_state {
            record.admin_state = state;
        }
        if let Some(labels) = &update.labels {
            record.labels = labels.clone();
        }
        info!(
            correlation_id = %correlation_id.as_str(),
            admin_state = %record.admin_state,
            labels = ?record.labels,
            "device service updated"
        );
        Ok(())
    }

    async fn ensure_profile(&self, profile_name: &str) -> DsResult<()> {
        let profiles = &self.container.caches.profiles;
        if profiles.contains(profile_name) {
            return Ok(());
        }
        let profile = self
            .container
            .metadata
            .device_profile_by_name(profile_name)
            .await?;
        match profiles.add(profile) {
            Err(err) if err.is(ErrorKind::DuplicateName) => Ok(()),
            other => other,
        }
    }
}
