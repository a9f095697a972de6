//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Build and version metadata."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Version tag of the REST and messaging contracts.
pub const API_VERSION: &str = "v2";

/// Version metadata reported by `/api/v2/version` and the daemon CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Version of the concrete device service (driver binary).
    pub version: String,
    /// Version of the runtime library.
    pub sdk_version: String,
    pub build_timestamp: String,
    pub target: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self::for_service(env!("CARGO_PKG_VERSION"))
    }

    /// Metadata for a service binary built on top of this runtime.
    pub fn for_service(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("unknown")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("unknown")
                .to_owned(),
        }
    }

    pub fn cli_string(&self) -> String {
        format!("{} (sdk {})", self.version, self.sdk_version)
    }

    pub fn extended(&self) -> String {
        format!(
            "version: {}\nsdk: {}\nbuilt: {}\ntarget: {}",
            self.version, self.sdk_version, self.build_timestamp, self.target
        )
    }
}
