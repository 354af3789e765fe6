//! High-level error types

use poslink_types::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] poslink_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] poslink_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] poslink_types::Error),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to establish a connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The link could not be opened
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The link opened but the terminal never acknowledged
    #[error("Device not responding: {0}")]
    DeviceNotResponding(String),

    /// `reconnect` called before any `connect`
    #[error("No previous connection to re-establish")]
    NeverConnected,
}

/// Failure of an issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Device busy")]
    DeviceBusy,

    #[error("Device reported invalid data")]
    InvalidData,

    #[error("Device rejected the command")]
    DeviceRejected,

    #[error("Timed out waiting for the device")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Cancelled")]
    Cancelled,
}

impl CommandError {
    /// Status reported to callers of the status-code surface
    ///
    /// Cancellation only happens when the link is torn down or replaced, so
    /// it reads as `NotConnected` there.
    pub fn status(self) -> StatusCode {
        match self {
            Self::DeviceBusy => StatusCode::DeviceBusy,
            Self::InvalidData => StatusCode::InvalidData,
            Self::DeviceRejected => StatusCode::DeviceRejected,
            Self::Timeout => StatusCode::Timeout,
            Self::NotConnected | Self::Cancelled => StatusCode::NotConnected,
        }
    }
}

impl Error {
    /// Status reported to callers of the status-code surface
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Command(e) => e.status(),
            Self::Core(e) if e.is_invalid_input() || e.is_malformed() => StatusCode::InvalidData,
            Self::Connect(_) | Self::Transport(_) => StatusCode::NotConnected,
            _ => StatusCode::InvalidData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_status() {
        assert_eq!(CommandError::Timeout.status(), StatusCode::Timeout);
        assert_eq!(CommandError::Cancelled.status(), StatusCode::NotConnected);
        assert_eq!(CommandError::DeviceBusy.status(), StatusCode::DeviceBusy);
    }

    #[test]
    fn test_codec_error_status() {
        let err = Error::from(poslink_core::Error::MalformedResponse("x".into()));
        assert_eq!(err.status(), StatusCode::InvalidData);
    }
}
