//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Shared primitives and utilities for the device service runtime."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! Shared primitives for the device service workspace.
//! This crate exposes the error model, configuration loading, logging
//! bootstrap, the process-wide origin clock and version metadata consumed
//! across the workspace.

pub mod config;
pub mod correlation;
pub mod errors;
pub mod logging;
pub mod time;
pub mod version;

pub use config::{
    AppConfig, ClientEndpoint, ClientsConfig, DeviceConfig, LoggingConfig, MessageBusConfig,
    MessageBusKind, ServiceConfig,
};
pub use correlation::{CorrelationId, CORRELATION_HEADER};
pub use errors::{DsError, DsResult, ErrorKind};
pub use logging::{init_tracing, LogFormat};
pub use time::{now_millis, OriginClock};
pub use version::{VersionInfo, API_VERSION};
