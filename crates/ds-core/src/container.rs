//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Dependency container threaded through every runtime component."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use ds_cache::Caches;
use ds_common::{AppConfig, OriginClock};
use ds_metrics::ServiceMetrics;
use ds_models::{AdminState, DeviceServiceRecord};
use ds_msg::MessageBus;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::clients::MetadataClient;
use crate::discovery::DiscoveryInterlock;
use crate::driver::ProtocolDriver;
use crate::egress::{EgressSink, EventPublisher};

/// Everything a component may need, shared by clone. Tests build one with
/// in-memory members.
#[derive(Clone)]
pub struct ServiceContainer {
    pub config: Arc<AppConfig>,
    pub caches: Caches,
    pub driver: Arc<dyn ProtocolDriver>,
    pub metadata: Arc<dyn MetadataClient>,
    pub bus: Option<Arc<dyn MessageBus>>,
    pub publisher: EventPublisher,
    pub metrics: ServiceMetrics,
    pub clock: Arc<OriginClock>,
    pub service: Arc<RwLock<DeviceServiceRecord>>,
    pub discovery: DiscoveryInterlock,
    /// Root cancellation token; cancelled on shutdown.
    pub cancel: CancellationToken,
    /// Background work (egress, metadata updates) drained on shutdown.
    pub tasks: TaskTracker,
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("service", &self.config.service.name)
            .field("devices", &self.caches.devices.len())
            .field("profiles", &self.caches.profiles.len())
            .field("publisher", &self.publisher)
            .finish()
    }
}

impl ServiceContainer {
    /// Assemble a container. The egress sink is the bus when one is supplied
    /// and `core_data` otherwise.
    pub fn new(
        config: AppConfig,
        driver: Arc<dyn ProtocolDriver>,
        metadata: Arc<dyn MetadataClient>,
        sink: EgressSink,
        bus: Option<Arc<dyn MessageBus>>,
        metrics: ServiceMetrics,
    ) -> Self {
        let tasks = TaskTracker::new();
        let mut record =
            DeviceServiceRecord::new(config.service.name.clone(), config.service.base_address());
        record.labels = config.service.labels.clone();
        let publisher = EventPublisher::new(
            config.service.name.clone(),
            sink,
            config.max_event_bytes(),
            metrics.clone(),
            tasks.clone(),
        );
        Self {
            config: Arc::new(config),
            caches: Caches::new(),
            driver,
            metadata,
            bus,
            publisher,
            metrics,
            clock: Arc::new(OriginClock::new()),
            service: Arc::new(RwLock::new(record)),
            discovery: DiscoveryInterlock::new(),
            cancel: CancellationToken::new(),
            tasks,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.config.service.name
    }

    /// Snapshot of this service's registration.
    pub fn service_record(&self) -> DeviceServiceRecord {
        self.service.read().clone()
    }

    pub fn service_locked(&self) -> bool {
        self.service.read().admin_state == AdminState::Locked
    }

    /// Run `future` as tracked background work.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }
}
