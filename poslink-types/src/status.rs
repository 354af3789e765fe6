//! Command status codes

use std::fmt;

use crate::error::{Error, Result};

/// Outcome of `send_basket` / `send_payment`
///
/// Device replies and local failures (timeouts, lost links) are both mapped
/// onto this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    DeviceBusy = 1,
    InvalidData = 2,
    DeviceRejected = 3,
    Timeout = 4,
    NotConnected = 5,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::DeviceBusy => "DEVICE_BUSY",
            Self::InvalidData => "INVALID_DATA",
            Self::DeviceRejected => "DEVICE_REJECTED",
            Self::Timeout => "TIMEOUT",
            Self::NotConnected => "NOT_CONNECTED",
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(status: StatusCode) -> i32 {
        status.code()
    }
}

impl TryFrom<i32> for StatusCode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::DeviceBusy),
            2 => Ok(Self::InvalidData),
            3 => Ok(Self::DeviceRejected),
            4 => Ok(Self::Timeout),
            5 => Ok(Self::NotConnected),
            _ => Err(Error::UnknownStatusCode(value)),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversion() {
        assert_eq!(i32::from(StatusCode::Success), 0);
        assert_eq!(StatusCode::try_from(5).unwrap(), StatusCode::NotConnected);
        assert!(StatusCode::try_from(42).is_err());
    }

    #[test]
    fn test_only_success_is_success() {
        assert!(StatusCode::Success.is_success());
        assert!(!StatusCode::Timeout.is_success());
    }
}
