//! Envelope validation.

use thiserror::Error;

use crate::model::Envelope;

/// Reason an envelope was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("invalid protocol version {0}")]
    InvalidVersion(i64),

    #[error("missing deviceId")]
    MissingDeviceId,

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// Check the header fields shared by every inbound message.
pub fn validate_envelope(env: &Envelope) -> Result<(), EnvelopeError> {
    if env.v < 1 {
        return Err(EnvelopeError::InvalidVersion(env.v));
    }
    if env.device_id.trim().is_empty() {
        return Err(EnvelopeError::MissingDeviceId);
    }
    if env.ts <= 0 {
        return Err(EnvelopeError::InvalidTimestamp(env.ts));
    }
    Ok(())
}
