//! Terminal device classes

use std::fmt;

use crate::error::{Error, Result};

/// Device class negotiated on connect
///
/// The two classes accept different basket layouts: X30TR expects payment
/// items inside the basket, 300TR takes payments as a separate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    X30TR,
    T300TR,
}

impl DeviceClass {
    /// Value reported when no device is active
    pub const NONE_INDEX: i32 = -1;

    pub fn index(self) -> i32 {
        match self {
            Self::X30TR => 0,
            Self::T300TR => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::X30TR => "X30TR",
            Self::T300TR => "300TR",
        }
    }

    /// Whether the class accepts a standalone payment command
    pub fn supports_standalone_payment(self) -> bool {
        matches!(self, Self::T300TR)
    }
}

impl TryFrom<i32> for DeviceClass {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::X30TR),
            1 => Ok(Self::T300TR),
            _ => Err(Error::UnknownDeviceIndex(value)),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.index())
    }
}
