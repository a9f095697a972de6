//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Service startup sequence and lifecycle handle."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! Startup runs strictly in order: dependencies, self-registration, caches,
//! driver, auto events, command subscriber. The HTTP surface is started by
//! the caller once [`DeviceServiceBuilder::start`] returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use ds_common::{AppConfig, DsResult, ErrorKind, MessageBusKind};
use ds_metrics::ServiceMetrics;
use ds_models::UpdateDeviceService;
use ds_msg::{InMemoryBus, MessageBus};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::autoevent::AutoEventManager;
use crate::callback::MetadataCallbacks;
use crate::clients::{CoreDataClient, HttpCoreDataClient, HttpMetadataClient, MetadataClient};
use crate::container::ServiceContainer;
use crate::driver::{DriverContext, ProtocolDriver};
use crate::egress::{bus_error, EgressSink};
use crate::ingest::{async_channel, spawn_ingest};
use crate::messaging::start_command_subscriber;

/// Assembles a [`DeviceService`]. Members not supplied explicitly are built
/// from configuration.
pub struct DeviceServiceBuilder {
    config: AppConfig,
    driver: Arc<dyn ProtocolDriver>,
    metadata: Option<Arc<dyn MetadataClient>>,
    core_data: Option<Arc<dyn CoreDataClient>>,
    bus: Option<Arc<dyn MessageBus>>,
    metrics: Option<ServiceMetrics>,
}

impl std::fmt::Debug for DeviceServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceServiceBuilder")
            .field("service", &self.config.service.name)
            .field("metadata", &self.metadata.is_some())
            .field("core_data", &self.core_data.is_some())
            .field("bus", &self.bus.as_ref().map(|bus| bus.name()))
            .finish()
    }
}

impl DeviceServiceBuilder {
    pub fn new(config: AppConfig, driver: Arc<dyn ProtocolDriver>) -> Self {
        Self {
            config,
            driver,
            metadata: None,
            core_data: None,
            bus: None,
            metrics: None,
        }
    }

    pub fn metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.metadata = Some(client);
        self
    }

    pub fn core_data_client(mut self, client: Arc<dyn CoreDataClient>) -> Self {
        self.core_data = Some(client);
        self
    }

    /// Bus used when `message_bus.enabled` is set. Defaults to an
    /// in-process bus.
    pub fn message_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the startup sequence. Any failure aborts startup.
    pub async fn start(self) -> Result<DeviceService> {
        let config = self.config;
        config.validate()?;
        let timeout = config.service.request_timeout;

        let metadata: Arc<dyn MetadataClient> = match self.metadata {
            Some(client) => client,
            None => Arc::new(HttpMetadataClient::new(
                &config.clients.core_metadata.url(),
                timeout,
            )?),
        };
        let bus: Option<Arc<dyn MessageBus>> = if config.message_bus.enabled {
            Some(self.bus.unwrap_or_else(|| default_bus(&config)))
        } else {
            None
        };
        let sink = match &bus {
            Some(bus) => EgressSink::Bus {
                bus: bus.clone(),
                base_topic: config.message_bus.base_topic.clone(),
            },
            None => {
                let client: Arc<dyn CoreDataClient> = match self.core_data {
                    Some(client) => client,
                    None => Arc::new(HttpCoreDataClient::new(
                        &config.clients.core_data.url(),
                        timeout,
                    )?),
                };
                EgressSink::CoreData(client)
            }
        };
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => ServiceMetrics::standalone()?,
        };

        wait_for_dependencies(&config, metadata.as_ref(), &sink).await?;

        let container =
            ServiceContainer::new(config, self.driver, metadata, sink, bus, metrics);
        register_service(&container).await?;
        populate_caches(&container).await?;

        let (async_tx, async_rx) = if container.config.device.enable_async_readings {
            let (tx, rx) = async_channel(&container);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        container
            .driver
            .initialize(DriverContext {
                service_name: container.service_name().to_owned(),
                async_values: async_tx,
            })
            .await
            .context("driver initialisation failed")?;
        seed_driver(&container).await;

        let mut background = Vec::new();
        if let Some(rx) = async_rx {
            background.push(spawn_ingest(container.clone(), rx));
        }
        let auto_events = AutoEventManager::new(container.clone());
        auto_events.start_all();
        if let Some(bus) = container.bus.clone() {
            background.push(
                start_command_subscriber(container.clone(), bus)
                    .await
                    .context("failed to subscribe to command requests")?,
            );
        }

        info!(
            service = %container.service_name(),
            devices = container.caches.devices.len(),
            profiles = container.caches.profiles.len(),
            watchers = container.caches.watchers.len(),
            "{}",
            container.config.service.startup_message
        );
        Ok(DeviceService {
            callbacks: MetadataCallbacks::new(container.clone(), auto_events),
            container,
            background,
        })
    }
}

fn default_bus(config: &AppConfig) -> Arc<dyn MessageBus> {
    match config.message_bus.kind {
        MessageBusKind::InMemory => Arc::new(InMemoryBus::new()),
    }
}

/// Running service. Dropping it does not stop anything; call
/// [`DeviceService::shutdown`].
#[derive(Debug)]
pub struct DeviceService {
    container: ServiceContainer,
    callbacks: MetadataCallbacks,
    background: Vec<JoinHandle<()>>,
}

impl DeviceService {
    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    pub fn callbacks(&self) -> &MetadataCallbacks {
        &self.callbacks
    }

    pub fn auto_events(&self) -> &AutoEventManager {
        self.callbacks.auto_events()
    }

    /// Cancel every task, stop the driver and drain in-flight egress for at
    /// most `service.shutdown_grace`.
    pub async fn shutdown(self, force: bool) -> Result<()> {
        let container = self.container;
        info!(service = %container.service_name(), force, "device service shutting down");
        container.cancel.cancel();
        self.callbacks.auto_events().stop_all().await;
        if let Err(err) = container.driver.stop(force).await {
            warn!(error = %err, "driver stop reported an error");
        }
        for handle in self.background {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = %err, "background task failed");
                }
            }
        }

        container.tasks.close();
        let grace = container.config.service.shutdown_grace;
        if tokio::time::timeout(grace, container.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                pending = container.tasks.len(),
                grace_secs = grace.as_secs(),
                "in-flight work did not finish within the shutdown grace period"
            );
        }
        if let Some(bus) = &container.bus {
            if let Err(err) = bus.disconnect().await {
                warn!(bus = bus.name(), error = %err, "message bus disconnect failed");
            }
        }
        info!("device service shutdown complete");
        Ok(())
    }
}

/// Probe `probe` until it succeeds, at most `retries` times.
async fn wait_for<F, Fut>(name: &str, retries: u32, interval: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DsResult<()>>,
{
    let mut last_error = None;
    for attempt in 1..=retries {
        match probe().await {
            Ok(()) => {
                info!(dependency = name, attempt, "dependency reachable");
                return Ok(());
            }
            Err(err) => {
                warn!(dependency = name, attempt, retries, error = %err, "dependency not reachable yet");
                last_error = Some(err);
                if attempt < retries {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    match last_error {
        Some(err) => Err(anyhow!(err).context(format!(
            "{name} unreachable after {retries} attempts"
        ))),
        None => bail!("{name} was never probed"),
    }
}

async fn wait_for_dependencies(
    config: &AppConfig,
    metadata: &dyn MetadataClient,
    sink: &EgressSink,
) -> Result<()> {
    let retries = config.service.connect_retries;
    let interval = config.service.retry_interval;
    wait_for("core-metadata", retries, interval, move || metadata.ping()).await?;
    match sink {
        EgressSink::Bus { bus, .. } => {
            wait_for(bus.name(), retries, interval, move || async move {
                bus.connect().await.map_err(bus_error)
            })
            .await
        }
        EgressSink::CoreData(client) => {
            wait_for("core-data", retries, interval, move || client.ping()).await
        }
    }
}

/// Create the registration when Metadata does not know this service;
/// otherwise adopt its admin state and labels and refresh the base address.
async fn register_service(container: &ServiceContainer) -> Result<()> {
    let name = container.service_name().to_owned();
    let desired = container.service_record();
    match container.metadata.device_service_by_name(&name).await {
        Ok(existing) => {
            {
                let mut record = container.service.write();
                record.admin_state = existing.admin_state;
                record.labels = existing.labels.clone();
                record.description = existing.description.clone();
            }
            if existing.base_address != desired.base_address {
                let update = UpdateDeviceService {
                    name: name.clone(),
                    base_address: Some(desired.base_address.clone()),
                    ..UpdateDeviceService::default()
                };
                container
                    .metadata
                    .update_device_service(&update)
                    .await
                    .with_context(|| format!("failed to update base address of {name}"))?;
            }
            info!(
                service = %name,
                admin_state = %existing.admin_state,
                base_address = %desired.base_address,
                "device service already registered"
            );
        }
        Err(err) if err.is(ErrorKind::EntityDoesNotExist) => {
            container
                .metadata
                .add_device_service(&desired)
                .await
                .with_context(|| format!("failed to register device service {name}"))?;
            info!(service = %name, base_address = %desired.base_address, "device service registered");
        }
        Err(err) => {
            return Err(anyhow!(err))
                .with_context(|| format!("failed to look up device service {name}"));
        }
    }
    Ok(())
}

/// Devices, then the profiles they reference, then provision watchers.
/// Entries that cannot be loaded are skipped with an error log.
async fn populate_caches(container: &ServiceContainer) -> Result<()> {
    let name = container.service_name();
    let caches = &container.caches;
    let devices = container
        .metadata
        .devices_by_service_name(name)
        .await
        .context("failed to load devices")?;
    for device in devices {
        if !caches.profiles.contains(&device.profile_name) {
            let loaded = match container
                .metadata
                .device_profile_by_name(&device.profile_name)
                .await
            {
                Ok(profile) => caches.profiles.add(profile),
                Err(err) => Err(err),
            };
            if let Err(err) = loaded {
                error!(device = %device.name, profile = %device.profile_name, error = %err, "skipping device: profile unavailable");
                continue;
            }
        }
        let device_name = device.name.clone();
        if let Err(err) = caches.devices.add(device) {
            error!(device = %device_name, error = %err, "skipping device");
        }
    }

    let watchers = container
        .metadata
        .provision_watchers_by_service_name(name)
        .await
        .context("failed to load provision watchers")?;
    for watcher in watchers {
        let watcher_name = watcher.name.clone();
        if let Err(err) = caches.watchers.add(watcher) {
            error!(watcher = %watcher_name, error = %err, "skipping provision watcher");
        }
    }
    info!(
        devices = caches.devices.len(),
        profiles = caches.profiles.len(),
        watchers = caches.watchers.len(),
        "caches populated"
    );
    Ok(())
}

/// Announce every cached device so the driver mirrors the cache.
async fn seed_driver(container: &ServiceContainer) {
    for device in container.caches.devices.all() {
        if let Err(err) = container
            .driver
            .add_device(&device.name, &device.protocols, device.admin_state)
            .await
        {
            warn!(device = %device.name, error = %err, "driver rejected device at startup");
        }
    }
}
