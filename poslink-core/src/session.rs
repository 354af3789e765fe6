//! Connection state machine
//!
//! A session tracks:
//! - Connection state (Disconnected / Connecting / Connected / Lost)
//! - Negotiated device class and device id
//! - Correlation id counter (increments per command)
//! - Link generation, bumped on every successful connect so that a read loop
//!   left over from an earlier link can recognise itself as stale
//!
//! The session does no locking of its own; the owner keeps it behind the same
//! mutex as its pending-request table.

use std::fmt;

use poslink_types::DeviceClass;

use crate::error::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link
    Disconnected,

    /// Link opening, waiting for the connect acknowledgement
    Connecting,

    /// Acknowledged and ready for commands
    Connected,

    /// Link dropped underneath an established connection
    Lost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Connection session
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    device_class: Option<DeviceClass>,
    device_id: Option<String>,
    next_correlation_id: u32,
    generation: u64,
}

impl Session {
    /// First correlation id handed out (0 is reserved for unsolicited frames)
    pub const INITIAL_CORRELATION_ID: u32 = 1;

    /// Create a new disconnected session
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            device_class: None,
            device_id: None,
            next_correlation_id: Self::INITIAL_CORRELATION_ID,
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Device class of the active connection
    pub fn device_class(&self) -> Option<DeviceClass> {
        if self.is_connected() { self.device_class } else { None }
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start opening a link (from `Disconnected`, `Lost`, or `Connected` for a reconnect)
    pub fn begin_connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connecting {
            return Err(Error::InvalidSessionState(
                "Connect already in progress".into()
            ));
        }

        self.state = ConnectionState::Connecting;
        self.device_class = None;
        Ok(())
    }

    /// Record the acknowledgement; returns the new link generation
    pub fn acknowledge(&mut self, device_class: DeviceClass, device_id: impl Into<String>) -> Result<u64> {
        if self.state != ConnectionState::Connecting {
            return Err(Error::InvalidSessionState(
                format!("Cannot acknowledge from state: {}", self.state)
            ));
        }

        self.state = ConnectionState::Connected;
        self.device_class = Some(device_class);
        self.device_id = Some(device_id.into());
        self.generation += 1;

        Ok(self.generation)
    }

    /// Mark the link of `generation` as lost
    ///
    /// Returns `false` when the generation is stale or the session is not
    /// connected; nothing changes in that case.
    pub fn mark_lost(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != ConnectionState::Connected {
            return false;
        }

        self.state = ConnectionState::Lost;
        true
    }

    /// Drop back to `Disconnected`
    pub fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.device_class = None;
    }

    /// Get next correlation id
    ///
    /// Wraps from `u32::MAX` back to 1, skipping the reserved 0.
    pub fn next_correlation_id(&mut self) -> u32 {
        let current = self.next_correlation_id;

        self.next_correlation_id = match current.checked_add(1) {
            Some(next) => next,
            None => Self::INITIAL_CORRELATION_ID,
        };

        current
    }

    #[cfg(test)]
    pub(crate) fn set_next_correlation_id(&mut self, id: u32) {
        self.next_correlation_id = id;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
