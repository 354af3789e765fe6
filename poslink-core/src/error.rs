//! Error types for poslink-core



/// Result type alias for poslink-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort {
        expected: usize,
        actual: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Unknown frame kind code
    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u16),

    /// Invalid connection state transition
    #[error("Invalid connection state: {0}")]
    InvalidSessionState(String),

    /// A required field is missing or out of range (never leaves the codec)
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    /// Truncated or unparseable payload from the device
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Payload too large
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if error was caused by bad input on our side (never retried)
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidField { .. }
                | Self::PayloadTooLarge { .. }
                | Self::Serialize(_)
        )
    }

    /// Check if error was caused by a damaged or unexpected frame from the device
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::ChecksumMismatch { .. }
                | Self::UnknownFrameKind(_)
                | Self::MalformedResponse(_)
        )
    }
}
