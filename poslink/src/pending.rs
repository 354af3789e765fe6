//! Pending request table
//!
//! Every issued command owns one entry until it is resolved, cancelled, or
//! times out. Entries are keyed by correlation id; resolving an entry removes
//! it, so a result is delivered at most once.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use poslink_core::{codec, CommandKind, FrameKind};
use poslink_types::{Basket, Payment, StatusCode};

use crate::error::CommandError;

/// Command to issue: a kind plus its encoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: CommandKind,
    pub payload: Bytes,
}

impl Request {
    pub fn new(kind: CommandKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Validate and encode a basket
    pub fn basket(basket: &Basket) -> poslink_core::Result<Self> {
        Ok(Self::new(CommandKind::SendBasket, codec::encode_basket(basket)?))
    }

    /// Validate and encode a standalone payment
    pub fn payment(payment: &Payment) -> poslink_core::Result<Self> {
        Ok(Self::new(CommandKind::SendPayment, codec::encode_payment(payment)?))
    }

    pub fn fiscal_info() -> Self {
        Self::new(CommandKind::GetFiscalInfo, Bytes::new())
    }

    pub fn ping() -> Self {
        Self::new(CommandKind::Ping, Bytes::new())
    }
}

/// Successful reply to an issued command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: FrameKind,
    pub correlation_id: u32,
    pub payload: Bytes,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.kind.status().unwrap_or(StatusCode::Success)
    }
}

pub type CommandResult = std::result::Result<Response, CommandError>;

pub(crate) struct PendingRequest {
    kind: CommandKind,
    submitted_at: Instant,
    slot: oneshot::Sender<CommandResult>,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u32, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Register a request; refuses an id that is already pending
    pub fn insert(&mut self, id: u32, kind: CommandKind, slot: oneshot::Sender<CommandResult>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }

        self.entries.insert(
            id,
            PendingRequest {
                kind,
                submitted_at: Instant::now(),
                slot,
            },
        );
        true
    }

    /// Deliver `result` to request `id`; `false` if nothing was pending under it
    pub fn resolve(&mut self, id: u32, result: CommandResult) -> bool {
        let Some(request) = self.entries.remove(&id) else {
            return false;
        };

        trace!(
            correlation_id = id,
            kind = %request.kind,
            elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Resolved pending request"
        );

        // The waiter may have given up already; that is fine
        let _ = request.slot.send(result);
        true
    }

    /// Drop request `id` without delivering anything
    pub fn remove(&mut self, id: u32) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Resolve every pending request with `error`; returns how many there were
    pub fn fail_all(&mut self, error: CommandError) -> usize {
        let count = self.entries.len();

        for (id, request) in self.entries.drain() {
            debug!(correlation_id = id, kind = %request.kind, error = %error, "Failing pending request");
            let _ = request.slot.send(Err(error));
        }

        count
    }
}
