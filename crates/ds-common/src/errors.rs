//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Closed error taxonomy shared by every component."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Shared result alias for device service operations.
pub type DsResult<T> = std::result::Result<T, DsError>;

/// Closed set of failure categories. Each kind maps onto exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ContractInvalid,
    EntityDoesNotExist,
    DuplicateName,
    InvalidId,
    NotAllowed,
    ServiceLocked,
    ServiceUnavailable,
    ServerError,
    OverflowError,
    NaNError,
    NotImplemented,
}

impl ErrorKind {
    /// HTTP status code reported on the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ContractInvalid | ErrorKind::InvalidId => 400,
            ErrorKind::EntityDoesNotExist => 404,
            ErrorKind::NotAllowed => 405,
            ErrorKind::DuplicateName => 409,
            ErrorKind::ServiceLocked => 423,
            ErrorKind::ServerError | ErrorKind::OverflowError | ErrorKind::NaNError => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::ServiceUnavailable => 503,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ContractInvalid => "ContractInvalid",
            ErrorKind::EntityDoesNotExist => "EntityDoesNotExist",
            ErrorKind::DuplicateName => "DuplicateName",
            ErrorKind::InvalidId => "InvalidId",
            ErrorKind::NotAllowed => "NotAllowed",
            ErrorKind::ServiceLocked => "ServiceLocked",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::NaNError => "NaNError",
            ErrorKind::NotImplemented => "NotImplemented",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error carrying a [`ErrorKind`] and a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DsError {
    kind: ErrorKind,
    message: String,
}

impl DsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Attach a lower level cause, rendered as `"message: cause"`.
    pub fn wrap(kind: ErrorKind, message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            message: format!("{}: {}", message.into(), cause),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn contract_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractInvalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EntityDoesNotExist, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateName, message)
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAllowed, message)
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceLocked, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_boundary_statuses() {
        let expected = [
            (ErrorKind::ContractInvalid, 400),
            (ErrorKind::EntityDoesNotExist, 404),
            (ErrorKind::DuplicateName, 409),
            (ErrorKind::InvalidId, 400),
            (ErrorKind::NotAllowed, 405),
            (ErrorKind::ServiceLocked, 423),
            (ErrorKind::ServiceUnavailable, 503),
            (ErrorKind::ServerError, 500),
            (ErrorKind::OverflowError, 500),
            (ErrorKind::NaNError, 500),
            (ErrorKind::NotImplemented, 501),
        ];
        for (kind, status) in expected {
            assert_eq!(kind.http_status(), status, "{kind}");
        }
    }

    #[test]
    fn wrap_chains_cause_into_message() {
        let err = DsError::wrap(ErrorKind::ServerError, "driver read failed", "timeout");
        assert_eq!(err.to_string(), "driver read failed: timeout");
        assert!(err.is(ErrorKind::ServerError));
        assert_eq!(err.http_status(), 500);
    }
}
