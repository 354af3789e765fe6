//! # poslink
//!
//! Session manager for wired X30TR / 300TR POS terminals.
//!
//! ## Features
//!
//! - One managed connection per terminal with bounded reconnect
//! - Request/response correlation with per-command timeouts
//! - Unsolicited device events dispatched off the I/O path
//! - Status-code surface for baskets, payments and fiscal info
//! - In-process terminal simulator for tests and demos
//!
//! ## Quick Start
//!
//! ```no_run
//! use poslink::{SessionConfig, SessionManager};
//! use poslink_types::Payment;
//!
//! #[tokio::main]
//! async fn main() -> poslink::Result<()> {
//!     let manager = SessionManager::tcp("192.168.1.50", 4370, SessionConfig::default())?;
//!     manager.connect("ACME Retail").await?;
//!
//!     let _events = manager.register_serial_handler(|tag, data| {
//!         println!("serial input {}: {}", tag, data);
//!         Ok(())
//!     });
//!
//!     let status = manager.send_payment(&Payment::cash(6000, "Nakit")).await;
//!     println!("Payment: {}", status);
//!
//!     manager.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod pending;
pub mod simulator;

// Re-exports
pub use config::SessionConfig;
pub use dispatcher::{EventDispatcher, EventKind, HandlerError, Subscription};
pub use error::{CommandError, ConnectError, Error, Result};
pub use manager::{ConnectionInfo, PendingHandle, SessionManager};
pub use pending::{CommandResult, Request, Response};
pub use simulator::{Simulator, SimulatorMode};

// Re-export types
pub use poslink_core::{CommandKind, ConnectionState, DeviceEvent};
pub use poslink_types::{Basket, BasketItem, DeviceClass, FiscalRecord, Payment, StatusCode};
