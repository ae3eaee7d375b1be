//! Request metadata and time sources.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TransactionId;

/// Metadata of one logical operation, supplied by the transport layer.
///
/// The transaction ID is the operation's idempotency key; the timestamp is when the
/// caller issued the request and is checked against the ledger's freshness window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Idempotency key shared by every event of the operation
    pub transaction_id: TransactionId,
    /// When the caller issued the request
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    /// Creates a context.
    pub const fn new(transaction_id: TransactionId, timestamp: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            timestamp,
        }
    }

    /// Creates a context stamped with the current system time.
    pub fn now(transaction_id: TransactionId) -> Self {
        Self::new(transaction_id, Utc::now())
    }
}

/// Source of "now" for freshness checks and row timestamps.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
