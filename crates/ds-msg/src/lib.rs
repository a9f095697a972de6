//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Message bus envelope, topics and transports."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Egress envelope, topic layout and the message bus abstraction.

pub mod bus;
pub mod envelope;
pub mod logging;
pub mod topic;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failures raised by envelopes and bus transports.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Publish or subscribe attempted before `connect`.
    #[error("message bus {0} is not connected")]
    NotConnected(&'static str),
    /// Encoded payload exceeds the configured limit.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Envelope carries a content type this crate cannot decode.
    #[error("unsupported content type {0}")]
    UnsupportedContentType(String),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization or deserialization problems.
    #[error("cbor error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

pub use bus::{BusMessage, InMemoryBus, MessageBus, Subscription};
pub use envelope::{MessageEnvelope, CONTENT_TYPE_CBOR, CONTENT_TYPE_JSON};
pub use logging::{log_envelope, MessageDirection};
pub use topic::{
    command_request_filter, command_response_topic, escape_segment, event_topic,
    parse_command_topic, topic_matches, unescape_segment, CommandTopic,
};
