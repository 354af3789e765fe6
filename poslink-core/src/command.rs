//! Frame kinds and command kinds

use std::fmt;

use poslink_types::StatusCode;

use crate::error::{Error, Result};

/// Frame kind codes
///
/// Requests travel from host to terminal, responses back with the request's
/// correlation id, and unsolicited frames are pushed by the terminal at any
/// time with correlation id 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameKind {
    // Requests
    Connect = 1000,
    Disconnect = 1001,
    SendBasket = 1100,
    SendPayment = 1101,
    GetFiscalInfo = 1200,
    Ping = 1300,

    // Responses
    Ack = 2000,
    AckData = 2001,
    Busy = 2002,
    InvalidData = 2003,
    Rejected = 2004,

    // Unsolicited
    SerialIn = 3000,
    DeviceState = 3001,
}

impl FrameKind {
    /// Check if this is a request (from host to terminal)
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::Connect
                | Self::Disconnect
                | Self::SendBasket
                | Self::SendPayment
                | Self::GetFiscalInfo
                | Self::Ping
        )
    }

    /// Check if this is a response (from terminal, correlated)
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::Ack | Self::AckData | Self::Busy | Self::InvalidData | Self::Rejected
        )
    }

    /// Check if this is an unsolicited terminal frame
    pub fn is_unsolicited(self) -> bool {
        matches!(self, Self::SerialIn | Self::DeviceState)
    }

    /// Check if this is a success response
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ack | Self::AckData)
    }

    /// Status a response kind maps to, `None` for non-responses
    pub fn status(self) -> Option<StatusCode> {
        match self {
            Self::Ack | Self::AckData => Some(StatusCode::Success),
            Self::Busy => Some(StatusCode::DeviceBusy),
            Self::InvalidData => Some(StatusCode::InvalidData),
            Self::Rejected => Some(StatusCode::DeviceRejected),
            _ => None,
        }
    }

    /// Get kind name
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::SendBasket => "SEND_BASKET",
            Self::SendPayment => "SEND_PAYMENT",
            Self::GetFiscalInfo => "GET_FISCAL_INFO",
            Self::Ping => "PING",
            Self::Ack => "ACK",
            Self::AckData => "ACK_DATA",
            Self::Busy => "BUSY",
            Self::InvalidData => "INVALID_DATA",
            Self::Rejected => "REJECTED",
            Self::SerialIn => "SERIAL_IN",
            Self::DeviceState => "DEVICE_STATE",
        }
    }
}

impl From<FrameKind> for u16 {
    fn from(kind: FrameKind) -> u16 {
        kind as u16
    }
}

impl TryFrom<u16> for FrameKind {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1000 => Ok(Self::Connect),
            1001 => Ok(Self::Disconnect),
            1100 => Ok(Self::SendBasket),
            1101 => Ok(Self::SendPayment),
            1200 => Ok(Self::GetFiscalInfo),
            1300 => Ok(Self::Ping),
            2000 => Ok(Self::Ack),
            2001 => Ok(Self::AckData),
            2002 => Ok(Self::Busy),
            2003 => Ok(Self::InvalidData),
            2004 => Ok(Self::Rejected),
            3000 => Ok(Self::SerialIn),
            3001 => Ok(Self::DeviceState),
            _ => Err(Error::UnknownFrameKind(value)),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u16)
    }
}

/// Commands a caller can issue through the session
///
/// Each kind has its own timeout; see `SessionConfig` in the facade crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Connect,
    Disconnect,
    SendBasket,
    SendPayment,
    GetFiscalInfo,
    Ping,
}

impl CommandKind {
    pub fn frame_kind(self) -> FrameKind {
        match self {
            Self::Connect => FrameKind::Connect,
            Self::Disconnect => FrameKind::Disconnect,
            Self::SendBasket => FrameKind::SendBasket,
            Self::SendPayment => FrameKind::SendPayment,
            Self::GetFiscalInfo => FrameKind::GetFiscalInfo,
            Self::Ping => FrameKind::Ping,
        }
    }
}

impl TryFrom<FrameKind> for CommandKind {
    type Error = Error;

    fn try_from(kind: FrameKind) -> Result<Self> {
        match kind {
            FrameKind::Connect => Ok(Self::Connect),
            FrameKind::Disconnect => Ok(Self::Disconnect),
            FrameKind::SendBasket => Ok(Self::SendBasket),
            FrameKind::SendPayment => Ok(Self::SendPayment),
            FrameKind::GetFiscalInfo => Ok(Self::GetFiscalInfo),
            FrameKind::Ping => Ok(Self::Ping),
            other => Err(Error::UnknownFrameKind(other.into())),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.frame_kind().name())
    }
}
