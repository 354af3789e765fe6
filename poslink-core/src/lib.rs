//! # poslink-core
//!
//! Core protocol implementation for wired POS terminals.
//!
//! This crate provides the low-level protocol primitives:
//! - Frame structure and encoding/decoding
//! - Checksum calculation
//! - Frame kinds and command kinds
//! - Payload codec (baskets, payments, fiscal info, device events)
//! - Connection state machine
//! - Protocol constants

pub mod checksum;
pub mod codec;
pub mod command;
pub mod constants;
pub mod error;
pub mod event;
pub mod frame;
pub mod session;

pub use codec::ConnectAck;
pub use command::{CommandKind, FrameKind};
pub use error::{Error, Result};
pub use event::DeviceEvent;
pub use frame::Frame;
pub use session::{ConnectionState, Session};

/// Maximum frame size (64KB)
pub const MAX_FRAME_SIZE: usize = 65535;
