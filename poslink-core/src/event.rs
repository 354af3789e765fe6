//! Unsolicited terminal events

use std::fmt;

/// Event pushed by the terminal outside of any request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Raw serial input forwarded by the terminal (card reader, keypad, ...)
    SerialInput {
        tag: u32,
        payload: String,
    },

    /// Link to the terminal came up or went down
    StateChange {
        connected: bool,
        device_id: String,
    },
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialInput { tag, payload } => {
                write!(f, "SerialInput(tag={}, len={})", tag, payload.len())
            }
            Self::StateChange {
                connected,
                device_id,
            } => write!(f, "StateChange(connected={}, device={})", connected, device_id),
        }
    }
}
