//! ---
//! ds_section: "03-persistence-logging"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Service counters backed by a Prometheus registry."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Counters recorded by the command pipeline, ingest, scheduler and egress.
#[derive(Clone, Debug)]
pub struct ServiceMetrics {
    registry: SharedRegistry,
    started: Instant,
    events_sent: IntCounter,
    readings_sent: IntCounter,
    commands: IntCounterVec,
    command_errors: IntCounterVec,
    async_dropped: IntCounter,
    publish_failures: IntCounter,
    auto_event_ticks: IntCounter,
}

impl ServiceMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let events_sent = IntCounter::with_opts(Opts::new(
            "ds_events_sent_total",
            "Events handed to egress successfully",
        ))?;
        registry.register(Box::new(events_sent.clone()))?;

        let readings_sent = IntCounter::with_opts(Opts::new(
            "ds_readings_sent_total",
            "Readings carried by successfully published events",
        ))?;
        registry.register(Box::new(readings_sent.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("ds_commands_total", "Device commands executed by method"),
            &["method"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let command_errors = IntCounterVec::new(
            Opts::new("ds_command_errors_total", "Failed device commands by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(command_errors.clone()))?;

        let async_dropped = IntCounter::with_opts(Opts::new(
            "ds_async_values_dropped_total",
            "Driver-pushed values discarded by the ingest loop",
        ))?;
        registry.register(Box::new(async_dropped.clone()))?;

        let publish_failures = IntCounter::with_opts(Opts::new(
            "ds_publish_failures_total",
            "Events that could not be published",
        ))?;
        registry.register(Box::new(publish_failures.clone()))?;

        let auto_event_ticks = IntCounter::with_opts(Opts::new(
            "ds_auto_event_ticks_total",
            "Auto-event executions",
        ))?;
        registry.register(Box::new(auto_event_ticks.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            events_sent,
            readings_sent,
            commands,
            command_errors,
            async_dropped,
            publish_failures,
            auto_event_ticks,
        })
    }

    /// Metrics on a private registry, for tests and embedded use.
    pub fn standalone() -> Result<Self> {
        Self::new(new_registry())
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_event_sent(&self, readings: usize) {
        self.events_sent.inc();
        self.readings_sent.inc_by(readings as u64);
    }

    /// `method` is `get` or `set`.
    pub fn observe_command(&self, method: &str) {
        self.commands.with_label_values(&[method]).inc();
    }

    pub fn observe_command_error(&self, kind: &str) {
        self.command_errors.with_label_values(&[kind]).inc();
    }

    pub fn observe_async_dropped(&self) {
        self.async_dropped.inc();
    }

    pub fn observe_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub fn observe_auto_event_tick(&self) {
        self.auto_event_ticks.inc();
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let command_errors = self
            .registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == "ds_command_errors_total")
            .flat_map(|family| family.get_metric().iter())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum();
        MetricsSnapshot {
            events_sent: self.events_sent.get(),
            readings_sent: self.readings_sent.get(),
            read_commands: self.commands.with_label_values(&["get"]).get(),
            write_commands: self.commands.with_label_values(&["set"]).get(),
            command_errors,
            async_dropped: self.async_dropped.get(),
            publish_failures: self.publish_failures.get(),
            auto_event_ticks: self.auto_event_ticks.get(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition of the whole registry.
    pub fn encode_text(&self) -> Result<String> {
        let families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&families)
            .map_err(|err| {
                error!(error = %err, "failed to encode metrics");
                err
            })
            .context("metrics encoding error")
    }
}

/// Serializable counter values returned by the metrics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_sent: u64,
    pub readings_sent: u64,
    pub read_commands: u64,
    pub write_commands: u64,
    pub command_errors: u64,
    pub async_dropped: u64,
    pub publish_failures: u64,
    pub auto_event_ticks: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_observations() {
        let metrics = ServiceMetrics::standalone().unwrap();
        metrics.observe_command("get");
        metrics.observe_command("get");
        metrics.observe_command("set");
        metrics.observe_command_error("ServiceLocked");
        metrics.observe_command_error("ServerError");
        metrics.observe_event_sent(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.read_commands, 2);
        assert_eq!(snapshot.write_commands, 1);
        assert_eq!(snapshot.command_errors, 2);
        assert_eq!(snapshot.events_sent, 1);
        assert_eq!(snapshot.readings_sent, 3);
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["readCommands"], 2);
    }

    #[test]
    fn text_exposition_names_counters() {
        let metrics = ServiceMetrics::standalone().unwrap();
        metrics.observe_auto_event_tick();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("ds_auto_event_ticks_total 1"));
    }

    #[test]
    fn registering_twice_fails() {
        let registry = new_registry();
        ServiceMetrics::new(registry.clone()).unwrap();
        assert!(ServiceMetrics::new(registry).is_err());
    }
}
