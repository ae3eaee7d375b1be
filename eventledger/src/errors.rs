//! Error types for the ledger.
//!
//! Two layers of errors exist:
//!
//! - **`StoreError`**: failures reported by an account store or event store
//!   adapter. These describe *what went wrong in persistence* and carry the
//!   [`Operation`] that failed.
//! - **`LedgerError`**: the outcome of a workflow. Business-rule violations get
//!   their own variants so callers can branch on them; every persistence failure is
//!   wrapped in [`LedgerError::Internal`] together with the step that was running.
//!
//! Callers that only need a coarse classification (for example to pick an HTTP
//! status) can use [`LedgerError::kind`].
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use eventledger::errors::{ErrorKind, LedgerError};
//!
//! match ledger.transfer(&ctx, source, destination, amount).await {
//!     Ok(()) => {}
//!     Err(LedgerError::InsufficientBalance { balance, .. }) => {
//!         println!("only {balance} available");
//!     }
//!     Err(error) if error.kind() == ErrorKind::Internal => return Err(error),
//!     Err(error) => println!("rejected: {error}"),
//! }
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AccountId, Amount, TransactionId};

/// Persistence operations reported in store errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Reading an account row without a lock.
    FindAccount,
    /// Reading an account row while acquiring its row lock.
    LockAccount,
    /// Inserting or updating an account row.
    UpsertAccount,
    /// Appending one or more events.
    AppendEvents,
    /// Looking up events by transaction ID.
    FindEventsByTransaction,
    /// Looking up the latest event of an aggregate.
    FindLastEvent,
    /// Opening a unit of work.
    BeginTransaction,
    /// Committing a unit of work.
    CommitTransaction,
    /// Rolling back a unit of work.
    RollbackTransaction,
}

impl Operation {
    /// Returns the operation name used in error messages and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindAccount => "find_account",
            Self::LockAccount => "lock_account",
            Self::UpsertAccount => "upsert_account",
            Self::AppendEvents => "append_events",
            Self::FindEventsByTransaction => "find_events_by_transaction",
            Self::FindLastEvent => "find_last_event",
            Self::BeginTransaction => "begin_transaction",
            Self::CommitTransaction => "commit_transaction",
            Self::RollbackTransaction => "rollback_transaction",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by store adapters.
///
/// `NotFound` is a normal outcome for lookups and is translated by the workflows;
/// everything else is treated as a failure of the underlying storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested row or event does not exist.
    #[error("{entity} not found")]
    NotFound {
        /// What was being looked up (for example `"account"` or `"event"`).
        entity: &'static str,
    },

    /// A uniqueness constraint rejected the write.
    #[error("conflicting write during {operation}")]
    Conflict {
        /// The operation that hit the constraint
        operation: Operation,
    },

    /// An event payload could not be serialized.
    #[error("failed to serialize event payload: {detail}")]
    Serialization {
        /// Description of the serialization failure
        detail: String,
    },

    /// A stored row could not be decoded into the domain model.
    #[error("failed to decode stored data: {detail}")]
    Decode {
        /// Description of the decoding failure
        detail: String,
    },

    /// The backend failed to perform the operation.
    #[error("store failure during {operation}: {detail}")]
    StoreFailure {
        /// The operation that failed
        operation: Operation,
        /// Backend-specific description
        detail: String,
    },

    /// The workflow did not finish within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Returns `true` if this error means "no such row".
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error is a uniqueness conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Coarse classification of [`LedgerError`] variants.
///
/// Source and destination variants of "not found" collapse into [`ErrorKind::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced account does not exist.
    NotFound,
    /// The account being created already exists.
    AlreadyExists,
    /// The transaction ID was already used.
    IdempotencyConflict,
    /// The request timestamp is outside the freshness window.
    InvalidRequestTime,
    /// A transfer names the same account on both sides.
    SameAccount,
    /// The source balance does not cover the amount.
    InsufficientBalance,
    /// Persistence failed; nothing was committed.
    Internal,
}

/// Outcome of a failed ledger workflow.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An account with this ID already exists.
    #[error("account {0} already exists")]
    AccountAlreadyExists(AccountId),

    /// Events with this transaction ID have already been recorded.
    #[error("transaction {0} has already been processed")]
    IdempotencyConflict(TransactionId),

    /// The request timestamp is too far from the current time.
    #[error("request time {request_time} is outside the allowed window of {threshold:?} around {now}")]
    InvalidRequestTime {
        /// Timestamp carried by the request
        request_time: DateTime<Utc>,
        /// Clock reading when the request was checked
        now: DateTime<Utc>,
        /// Configured freshness threshold
        threshold: Duration,
    },

    /// Source and destination of a transfer are the same account.
    #[error("cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// The account does not exist (lookup by ID).
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// The transfer's source account does not exist.
    #[error("source account {0} not found")]
    SourceAccountNotFound(AccountId),

    /// The transfer's destination account does not exist.
    #[error("destination account {0} not found")]
    DestinationAccountNotFound(AccountId),

    /// The source balance is lower than the requested amount.
    #[error("insufficient balance in account {account}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited
        account: AccountId,
        /// Its balance at the time of the check
        balance: Decimal,
        /// The requested transfer amount
        requested: Amount,
    },

    /// A persistence step failed; the unit of work was rolled back.
    #[error("internal error while {context}: {source}")]
    Internal {
        /// The workflow step that was running
        context: &'static str,
        /// The underlying store error
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    /// Wraps a store error with the workflow step that produced it.
    pub const fn internal(context: &'static str, source: StoreError) -> Self {
        Self::Internal { context, source }
    }

    /// Returns the coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountAlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::IdempotencyConflict(_) => ErrorKind::IdempotencyConflict,
            Self::InvalidRequestTime { .. } => ErrorKind::InvalidRequestTime,
            Self::SameAccount(_) => ErrorKind::SameAccount,
            Self::AccountNotFound(_)
            | Self::SourceAccountNotFound(_)
            | Self::DestinationAccountNotFound(_) => ErrorKind::NotFound,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

/// Result type for store adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for ledger workflows.
pub type LedgerResult<T> = Result<T, LedgerError>;
