//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Single-flight guard around driver discovery."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use ds_common::{CorrelationId, DsError, DsResult};
use parking_lot::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::container::ServiceContainer;

#[derive(Debug, Default)]
struct DiscoveryState {
    busy: bool,
    id: String,
}

/// Outcome of [`DiscoveryInterlock::try_begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTicket {
    /// A new discovery was started under this id; the caller must run it and
    /// call [`DiscoveryInterlock::finish`].
    Started(String),
    /// A discovery is already running under this id.
    InProgress(String),
}

impl DiscoveryTicket {
    pub fn id(&self) -> &str {
        match self {
            DiscoveryTicket::Started(id) | DiscoveryTicket::InProgress(id) => id,
        }
    }
}

/// At most one discovery runs at a time; concurrent triggers get the running id.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryInterlock {
    state: Arc<Mutex<DiscoveryState>>,
}

impl DiscoveryInterlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> DiscoveryTicket {
        let mut state = self.state.lock();
        if state.busy {
            return DiscoveryTicket::InProgress(state.id.clone());
        }
        state.busy = true;
        state.id = Uuid::new_v4().to_string();
        DiscoveryTicket::Started(state.id.clone())
    }

    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.busy = false;
        state.id.clear();
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }
}

/// Start a driver discovery pass in the background, or report the one
/// already running.
pub fn trigger_discovery(
    container: &ServiceContainer,
    correlation_id: &CorrelationId,
) -> DsResult<DiscoveryTicket> {
    if container.service_locked() {
        return Err(DsError::locked(format!(
            "service {} is locked",
            container.service_name()
        )));
    }
    if !container.config.device.discovery_enabled {
        return Err(DsError::unavailable("device discovery is disabled"));
    }
    if !container.driver.supports_discovery() {
        return Err(DsError::not_implemented(
            "driver does not support device discovery",
        ));
    }
    let ticket = container.discovery.try_begin();
    match &ticket {
        DiscoveryTicket::InProgress(id) => {
            info!(correlation_id = %correlation_id.as_str(), discovery_id = %id, "discovery already running");
        }
        DiscoveryTicket::Started(id) => {
            info!(correlation_id = %correlation_id.as_str(), discovery_id = %id, "discovery started");
            let driver = container.driver.clone();
            let interlock = container.discovery.clone();
            let id = id.clone();
            container.spawn(async move {
                if let Err(err) = driver.discover().await {
                    error!(discovery_id = %id, error = %err, "driver discovery failed");
                }
                interlock.finish();
                info!(discovery_id = %id, "discovery finished");
            });
        }
    }
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_trigger_gets_running_id() {
        let interlock = DiscoveryInterlock::new();
        let first = interlock.try_begin();
        assert!(matches!(first, DiscoveryTicket::Started(_)));
        let second = interlock.try_begin();
        assert_eq!(second, DiscoveryTicket::InProgress(first.id().to_owned()));
        interlock.finish();
        assert!(!interlock.is_busy());
        let third = interlock.try_begin();
        assert!(matches!(third, DiscoveryTicket::Started(ref id) if id != first.id()));
    }
}
