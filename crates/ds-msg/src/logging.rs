//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Structured logging of bus traffic."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use tracing::debug;

use crate::envelope::MessageEnvelope;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Envelope published to the bus.
    Outbound,
    /// Envelope received from a subscription.
    Inbound,
}

/// Emit a structured log entry for bus activity.
pub fn log_envelope(direction: MessageDirection, topic: &str, envelope: &MessageEnvelope) {
    debug!(
        correlation_id = %envelope.correlation_id,
        request_id = %envelope.request_id,
        content_type = %envelope.content_type,
        error_code = envelope.error_code,
        bytes = envelope.payload.len(),
        topic,
        direction = ?direction,
        "messaging activity"
    );
}
