//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Event egress to the message bus or core data."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use ds_common::{CorrelationId, DsError, DsResult};
use ds_metrics::ServiceMetrics;
use ds_models::{AddEventRequest, Event};
use ds_msg::{event_topic, MessageBus, MessageEnvelope, MessagingError};
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::clients::CoreDataClient;

/// Where events go.
#[derive(Clone)]
pub enum EgressSink {
    /// Publish on `{base_topic}/device/{service}/{profile}/{device}/{source}`.
    Bus {
        bus: Arc<dyn MessageBus>,
        base_topic: String,
    },
    /// POST to core data; used when the bus is disabled.
    CoreData(Arc<dyn CoreDataClient>),
}

struct PublisherInner {
    service_name: String,
    sink: EgressSink,
    max_event_bytes: Option<usize>,
    metrics: ServiceMetrics,
    tracker: TaskTracker,
}

/// Hands events to the configured sink. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<PublisherInner>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match &self.inner.sink {
            EgressSink::Bus { bus, .. } => bus.name(),
            EgressSink::CoreData(_) => "core-data",
        };
        f.debug_struct("EventPublisher")
            .field("service_name", &self.inner.service_name)
            .field("sink", &sink)
            .finish()
    }
}

/// Map a transport failure onto the service error model.
pub(crate) fn bus_error(err: MessagingError) -> DsError {
    match err {
        MessagingError::NotConnected(_) => DsError::unavailable(err.to_string()),
        other => DsError::server(other.to_string()),
    }
}

impl EventPublisher {
    pub fn new(
        service_name: impl Into<String>,
        sink: EgressSink,
        max_event_bytes: Option<usize>,
        metrics: ServiceMetrics,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                service_name: service_name.into(),
                sink,
                max_event_bytes,
                metrics,
                tracker,
            }),
        }
    }

    /// Publish and wait for the sink to accept the event.
    pub async fn publish(&self, event: Event, correlation_id: &CorrelationId) -> DsResult<()> {
        let readings = event.readings.len();
        let result = self.send(AddEventRequest::new(event), correlation_id).await;
        match &result {
            Ok(()) => self.inner.metrics.observe_event_sent(readings),
            Err(_) => self.inner.metrics.observe_publish_failure(),
        }
        result
    }

    /// Publish in the background. Failures are logged; the task is tracked so
    /// shutdown can drain it.
    pub fn spawn_publish(&self, event: Event, correlation_id: CorrelationId) {
        let publisher = self.clone();
        self.inner.tracker.spawn(async move {
            let device = event.device_name.clone();
            let source = event.source_name.clone();
            if let Err(err) = publisher.publish(event, &correlation_id).await {
                error!(
                    correlation_id = %correlation_id.as_str(),
                    device = %device,
                    source = %source,
                    error = %err,
                    "failed to publish event"
                );
            }
        });
    }

    async fn send(&self, request: AddEventRequest, correlation_id: &CorrelationId) -> DsResult<()> {
        let event = &request.event;
        match &self.inner.sink {
            EgressSink::Bus { bus, base_topic } => {
                let topic = event_topic(
                    base_topic,
                    &self.inner.service_name,
                    &event.profile_name,
                    &event.device_name,
                    &event.source_name,
                );
                let envelope =
                    MessageEnvelope::for_event(&request, correlation_id.as_str()).map_err(bus_error)?;
                envelope
                    .check_size(self.inner.max_event_bytes)
                    .map_err(bus_error)?;
                debug!(
                    correlation_id = %correlation_id.as_str(),
                    topic = %topic,
                    event_id = %event.id,
                    readings = event.readings.len(),
                    "publishing event"
                );
                bus.publish(&topic, envelope).await.map_err(bus_error)
            }
            EgressSink::CoreData(client) => {
                debug!(
                    correlation_id = %correlation_id.as_str(),
                    event_id = %event.id,
                    readings = event.readings.len(),
                    "posting event to core data"
                );
                client.add_event(&request).await
            }
        }
    }
}
