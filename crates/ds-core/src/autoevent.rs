//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Per-device periodic reads driven by auto-event schedules."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ds_common::{CorrelationId, ErrorKind};
use ds_models::{AutoEvent, Device, Event};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{read_command, CommandOptions};
use crate::container::ServiceContainer;
use crate::duration::parse_interval;

#[derive(Debug)]
struct DeviceSchedule {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns one timer task per (device, auto event). A device's tasks live
/// exactly as long as the device is scheduled.
#[derive(Clone)]
pub struct AutoEventManager {
    container: ServiceContainer,
    schedules: Arc<Mutex<HashMap<String, DeviceSchedule>>>,
}

impl std::fmt::Debug for AutoEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoEventManager")
            .field("devices", &self.schedules.lock().len())
            .finish()
    }
}

impl AutoEventManager {
    pub fn new(container: ServiceContainer) -> Self {
        Self {
            container,
            schedules: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule every cached device.
    pub fn start_all(&self) {
        for device in self.container.caches.devices.all() {
            self.start_for(&device);
        }
    }

    /// Replace the tasks of `device_name` with ones built from its cached
    /// record. A device no longer in the cache ends up unscheduled.
    pub async fn restart_for_device(&self, device_name: &str) {
        self.stop_for_device(device_name).await;
        if let Some(device) = self.container.caches.devices.for_name(device_name) {
            self.start_for(&device);
        }
    }

    /// Cancel the tasks of `device_name` and wait until they are gone.
    pub async fn stop_for_device(&self, device_name: &str) {
        let schedule = self.schedules.lock().remove(device_name);
        if let Some(schedule) = schedule {
            stop_schedule(device_name, schedule).await;
        }
    }

    pub async fn stop_all(&self) {
        let schedules: Vec<_> = self.schedules.lock().drain().collect();
        for (device_name, schedule) in schedules {
            stop_schedule(&device_name, schedule).await;
        }
    }

    /// Number of running auto-event tasks of `device_name`.
    pub fn running(&self, device_name: &str) -> usize {
        self.schedules
            .lock()
            .get(device_name)
            .map(|schedule| schedule.tasks.iter().filter(|task| !task.is_finished()).count())
            .unwrap_or(0)
    }

    fn start_for(&self, device: &Device) {
        if device.auto_events.is_empty() {
            return;
        }
        let cancel = self.container.cancel.child_token();
        let mut tasks = Vec::with_capacity(device.auto_events.len());
        for auto_event in &device.auto_events {
            let interval = match parse_interval(&auto_event.interval) {
                Ok(interval) => interval,
                Err(err) => {
                    error!(
                        device = %device.name,
                        source = %auto_event.source_name,
                        error = %err,
                        "skipping auto event with invalid interval"
                    );
                    continue;
                }
            };
            debug!(
                device = %device.name,
                source = %auto_event.source_name,
                interval_ms = interval.as_millis() as u64,
                on_change = auto_event.on_change,
                "auto event scheduled"
            );
            tasks.push(tokio::spawn(run_auto_event(
                self.container.clone(),
                device.name.clone(),
                auto_event.clone(),
                interval,
                cancel.clone(),
            )));
        }
        if tasks.is_empty() {
            return;
        }
        info!(device = %device.name, tasks = tasks.len(), "auto events started");
        let previous = self
            .schedules
            .lock()
            .insert(device.name.clone(), DeviceSchedule { cancel, tasks });
        if let Some(previous) = previous {
            // Only reachable when start_for races itself; never leave orphans.
            previous.cancel.cancel();
            for task in previous.tasks {
                task.abort();
            }
        }
    }
}

async fn stop_schedule(device_name: &str, schedule: DeviceSchedule) {
    schedule.cancel.cancel();
    for task in schedule.tasks {
        task.abort();
        if let Err(err) = task.await {
            if !err.is_cancelled() {
                error!(device = %device_name, error = %err, "auto event task failed");
            }
        }
    }
    info!(device = %device_name, "auto events stopped");
}

/// What on-change suppression compares between ticks.
#[derive(Debug, PartialEq)]
struct ReadingValue {
    resource: String,
    value: Option<String>,
    binary: Option<Vec<u8>>,
    object: Option<JsonValue>,
}

fn fingerprint(event: &Event) -> Vec<ReadingValue> {
    event
        .readings
        .iter()
        .map(|reading| ReadingValue {
            resource: reading.resource_name.clone(),
            value: reading.value.clone(),
            binary: reading.binary_value.clone(),
            object: reading.object_value.clone(),
        })
        .collect()
}

async fn run_auto_event(
    container: ServiceContainer,
    device_name: String,
    auto_event: AutoEvent,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_published: Option<Vec<ReadingValue>> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        container.metrics.observe_auto_event_tick();
        let options = CommandOptions {
            correlation_id: CorrelationId::new(),
            ..CommandOptions::default()
        };
        match read_command(&container, &device_name, &auto_event.source_name, &options).await {
            Ok(event) => {
                if auto_event.on_change {
                    let current = fingerprint(&event);
                    if last_published.as_ref() == Some(&current) {
                        debug!(device = %device_name, source = %auto_event.source_name, "readings unchanged, not publishing");
                        continue;
                    }
                    last_published = Some(current);
                }
                container
                    .publisher
                    .spawn_publish(event, options.correlation_id);
            }
            Err(err) if err.is(ErrorKind::ServiceLocked) => {
                debug!(device = %device_name, source = %auto_event.source_name, "auto event skipped: {err}");
            }
            Err(err) => {
                warn!(
                    correlation_id = %options.correlation_id.as_str(),
                    device = %device_name,
                    source = %auto_event.source_name,
                    error = %err,
                    "auto event read failed"
                );
            }
        }
    }
}
