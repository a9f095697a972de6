//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Tracing subscriber bootstrap."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! The daemon logs to stdout in the configured format and, unless
//! `logging.file` is off, to a daily rolling JSON file named after the service.

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "DS_LOG";

/// Flush guards for the non-blocking writers; dropping them loses buffered lines.
static WRITER_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Lower-case the level names device service configurations use (`INFO`,
/// `WARN`, `TRACE`). Full filter directives pass through untouched.
fn level_directive(level: &str) -> String {
    let trimmed = level.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        lower @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => lower.to_owned(),
        _ => trimmed.to_owned(),
    }
}

/// `DS_LOG`, then `RUST_LOG`, then `logging.level`.
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let configured = || {
        EnvFilter::try_new(level_directive(&config.level)).unwrap_or_else(|err| {
            eprintln!("invalid logging.level {:?} ({err}); using info", config.level);
            EnvFilter::new("info")
        })
    };
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using logging.level");
            configured()
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| configured()),
    }
}

/// Install the global subscriber. A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let mut guards = Vec::with_capacity(2);

    let (stdout_writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (file_writer, guard) =
            tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
        guards.push(guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = WRITER_GUARDS.set(guards);

    info!(
        service = %service_name,
        format = ?config.format,
        file = config.file,
        log_dir = %config.directory.display(),
        "logging initialised"
    );
    Ok(())
}
