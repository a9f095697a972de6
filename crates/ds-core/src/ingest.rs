//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Consumer of values pushed asynchronously by the driver."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use ds_common::{CorrelationId, DsError, DsResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::command::{after_contact, build_event, OnAssertionFailure};
use crate::container::ServiceContainer;
use crate::driver::AsyncValues;

/// Bounded channel handed to the driver; capacity is `device.async_buffer_size`.
pub fn async_channel(
    container: &ServiceContainer,
) -> (mpsc::Sender<AsyncValues>, mpsc::Receiver<AsyncValues>) {
    mpsc::channel(container.config.device.async_buffer_size.max(1))
}

/// Start the single consumer draining `rx` until the channel closes or the
/// service is cancelled.
pub fn spawn_ingest(
    container: ServiceContainer,
    mut rx: mpsc::Receiver<AsyncValues>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("async reading consumer started");
        loop {
            tokio::select! {
                _ = container.cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(values) => {
                        let correlation_id = CorrelationId::new();
                        if let Err(err) = ingest(&container, values, &correlation_id) {
                            container.metrics.observe_async_dropped();
                            error!(
                                correlation_id = %correlation_id.as_str(),
                                error = %err,
                                "dropping asynchronous values"
                            );
                        }
                    }
                    None => break,
                },
            }
        }
        info!("async reading consumer stopped");
    })
}

/// Turn one batch into an event and hand it to egress.
pub fn ingest(
    container: &ServiceContainer,
    values: AsyncValues,
    correlation_id: &CorrelationId,
) -> DsResult<()> {
    let device = container
        .caches
        .devices
        .for_name(&values.device_name)
        .ok_or_else(|| DsError::not_found(format!("device {} not found", values.device_name)))?;
    debug!(
        correlation_id = %correlation_id.as_str(),
        device = %device.name,
        source = %values.source_name,
        values = values.command_values.len(),
        "asynchronous values received"
    );
    let event = build_event(
        container,
        &device,
        &values.source_name,
        values.command_values,
        &[],
        &BTreeMap::new(),
        OnAssertionFailure::DropReading,
    )?;
    after_contact(container, &device.name);
    if event.readings.is_empty() {
        debug!(device = %device.name, "no readings left after processing");
        return Ok(());
    }
    container
        .publisher
        .spawn_publish(event, correlation_id.clone());
    Ok(())
}
