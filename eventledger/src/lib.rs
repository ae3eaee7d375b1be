//! `EventLedger` - event-sourced account ledger
//!
//! Account balances are a projection of an append-only event log. Opening an
//! account and transferring funds are atomic, idempotent operations: each one
//! appends its events and updates the affected account rows inside a single unit
//! of work, or leaves no trace at all.
//!
//! The crate holds the domain types, the storage contracts ([`AccountStore`],
//! [`EventStore`], [`UnitOfWork`]), the per-aggregate [`EventCollector`] and the
//! [`Ledger`] workflows. Store adapters live in `eventledger-memory` and
//! `eventledger-postgres`.
//!
//! ```rust,ignore
//! use eventledger::{Amount, AccountId, Ledger, LedgerConfig, RequestContext, TransactionId};
//!
//! let ledger = Ledger::new(store.clone(), store, LedgerConfig::from_env()?);
//! let ctx = RequestContext::now(TransactionId::try_new("tx-a")?);
//! ledger.create_account(&ctx, AccountId::try_new(1)?, Amount::try_new(dec!(1000.00))?).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collector;
pub mod config;
pub mod context;
pub mod errors;
pub mod ledger;
pub mod model;
pub mod store;
pub mod types;

pub use collector::EventCollector;
pub use config::{ConfigError, LedgerConfig, OperationTimeoutMs, RequestTimeThresholdMs};
pub use context::{Clock, FixedClock, RequestContext, SystemClock};
pub use errors::{ErrorKind, LedgerError, LedgerResult, Operation, StoreError, StoreResult};
pub use ledger::Ledger;
pub use model::{
    Account, AccountEvent, AggregateType, Event, EventKind, NewEvent, SYSTEM_DEPOSIT_SOURCE,
};
pub use store::{AccountStore, EventStore, UnitOfWork};
pub use types::{AccountId, Amount, EventId, SchemaVersion, SequenceNumber, TransactionId};
