//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Request-scoped correlation identifiers."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP header carrying the correlation id.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Opaque per-request token propagated through logs and egress envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopt an inbound id, generating a fresh one when it is blank.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_owned()),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
