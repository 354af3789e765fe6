//! Session configuration
//!
//! Defaults come from `poslink_core::constants`. Durations are stored in
//! milliseconds so the same struct can be loaded from a JSON file:
//!
//! ```json
//! { "payment_timeout_ms": 90000, "event_queue_capacity": 64 }
//! ```
//!
//! Missing fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use poslink_core::constants::*;
use poslink_core::CommandKind;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub basket_timeout_ms: u64,
    pub payment_timeout_ms: u64,
    pub fiscal_info_timeout_ms: u64,
    /// Timeout for every other command kind
    pub command_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_initial_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub event_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            basket_timeout_ms: DEFAULT_BASKET_TIMEOUT_MS,
            payment_timeout_ms: DEFAULT_PAYMENT_TIMEOUT_MS,
            fiscal_info_timeout_ms: DEFAULT_FISCAL_INFO_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff_initial_ms: RECONNECT_BACKOFF_INITIAL_MS,
            reconnect_backoff_max_ms: RECONNECT_BACKOFF_MAX_MS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_queue_capacity == 0 {
            return Err(Error::Config("event_queue_capacity must be at least 1".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(Error::Config("max_reconnect_attempts must be at least 1".into()));
        }
        let timeouts = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("basket_timeout_ms", self.basket_timeout_ms),
            ("payment_timeout_ms", self.payment_timeout_ms),
            ("fiscal_info_timeout_ms", self.fiscal_info_timeout_ms),
            ("command_timeout_ms", self.command_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::Config(format!("{} must be positive", name)));
        }
        Ok(())
    }

    /// Timeout applied to a command of `kind`
    pub fn timeout_for(&self, kind: CommandKind) -> Duration {
        let ms = match kind {
            CommandKind::SendBasket => self.basket_timeout_ms,
            CommandKind::SendPayment => self.payment_timeout_ms,
            CommandKind::GetFiscalInfo => self.fiscal_info_timeout_ms,
            CommandKind::Connect => self.handshake_timeout_ms,
            CommandKind::Disconnect | CommandKind::Ping => self.command_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reconnect_backoff_initial_ms),
            Duration::from_millis(self.reconnect_backoff_max_ms),
        )
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    /// Set how long to wait for the connect acknowledgement
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = millis(timeout);
        self
    }

    /// Set the timeout of one command kind
    pub fn with_command_timeout(mut self, kind: CommandKind, timeout: Duration) -> Self {
        let ms = millis(timeout);
        match kind {
            CommandKind::SendBasket => self.basket_timeout_ms = ms,
            CommandKind::SendPayment => self.payment_timeout_ms = ms,
            CommandKind::GetFiscalInfo => self.fiscal_info_timeout_ms = ms,
            CommandKind::Connect => self.handshake_timeout_ms = ms,
            CommandKind::Disconnect | CommandKind::Ping => self.command_timeout_ms = ms,
        }
        self
    }

    /// Set the reconnect retry policy
    pub fn with_reconnect_policy(mut self, attempts: u32, initial: Duration, max: Duration) -> Self {
        self.max_reconnect_attempts = attempts;
        self.reconnect_backoff_initial_ms = millis(initial);
        self.reconnect_backoff_max_ms = millis(max);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
