//! Protocol constants

/// Stream framing magic (precedes every frame on byte-stream transports)
pub const STREAM_MAGIC_1: u16 = 0x5050;
pub const STREAM_MAGIC_2: u16 = 0x8272;

/// Default TCP port of the terminal bridge
pub const DEFAULT_PORT: u16 = 4370;

/// Default transport open timeout (milliseconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default wait for the connect acknowledgement (milliseconds)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 3_000;

/// Default command timeouts per kind (milliseconds)
pub const DEFAULT_BASKET_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_FISCAL_INFO_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Delay before the single retry of a transient write failure (milliseconds)
pub const WRITE_RETRY_DELAY_MS: u64 = 50;

/// Reconnect policy
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const RECONNECT_BACKOFF_INITIAL_MS: u64 = 200;
pub const RECONNECT_BACKOFF_MAX_MS: u64 = 2_000;

/// Capacity of the device event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Correlation id reserved for unsolicited device frames
pub const UNSOLICITED_CORRELATION_ID: u32 = 0;

/// Upper bound of `taxPercent` (hundredths of a percent)
pub const MAX_TAX_PERCENT: i64 = 10_000;
