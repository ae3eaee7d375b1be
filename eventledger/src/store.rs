//! Storage contracts consumed by the ledger workflows.
//!
//! This module defines the port interfaces the core depends on. Adapters live in
//! separate crates (`eventledger-memory`, `eventledger-postgres`).
//!
//! # Units of work
//!
//! [`AccountStore::begin`] opens a unit of work and returns a guard implementing
//! [`UnitOfWork`]. Every transactional call on either store takes `&mut` access to
//! that guard. The guard has exactly one success path, [`UnitOfWork::commit`].
//! Dropping it without committing (early `?` return, panic, timeout, task
//! cancellation) discards every write performed through it, so a workflow can
//! never leave the event log and the account projection out of step.
//!
//! Both stores must share the same guard type, which workflows express as
//! `E: EventStore<Tx = A::Tx>`. In practice a single adapter type implements both
//! traits.

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::model::{Account, Event, NewEvent};
use crate::types::{AccountId, TransactionId};

/// A scoped atomic unit of work.
///
/// Implementations must roll back on drop if neither `commit` nor `rollback` was
/// called.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Makes every write performed through this unit of work durable and visible.
    async fn commit(self) -> StoreResult<()>;

    /// Discards every write performed through this unit of work.
    async fn rollback(self) -> StoreResult<()>;
}

/// The balance projection store.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The unit-of-work guard type.
    type Tx: UnitOfWork;

    /// Opens a new unit of work.
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Reads an account outside any unit of work.
    ///
    /// Returns [`StoreError::NotFound`](crate::errors::StoreError::NotFound) when
    /// no such account exists.
    async fn find_by_id(&self, id: AccountId) -> StoreResult<Account>;

    /// Reads an account and takes an exclusive lock on its row.
    ///
    /// The lock is held for the lifetime of `tx`; other callers locking the same
    /// row wait until `tx` commits or rolls back.
    async fn find_by_id_for_update(&self, tx: &mut Self::Tx, id: AccountId)
        -> StoreResult<Account>;

    /// Inserts the account or replaces the existing row with the same ID.
    async fn upsert(&self, tx: &mut Self::Tx, account: &Account) -> StoreResult<()>;
}

/// The append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The unit-of-work guard type.
    type Tx: Send;

    /// Appends a single event inside `tx`.
    async fn append(&self, tx: &mut Self::Tx, event: &NewEvent) -> StoreResult<()>;

    /// Appends all `events` inside `tx`, all or nothing.
    ///
    /// A duplicate `(aggregate_id, sequence_number)` is reported as
    /// [`StoreError::Conflict`](crate::errors::StoreError::Conflict), either here or
    /// when `tx` commits.
    async fn append_bulk(&self, tx: &mut Self::Tx, events: &[NewEvent]) -> StoreResult<()>;

    /// Returns every committed event carrying `transaction_id`.
    ///
    /// An empty result and `NotFound` both mean the transaction ID is unused.
    async fn find_all_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>>;

    /// Like [`find_all_by_transaction_id`](Self::find_all_by_transaction_id) but read
    /// through `tx`, so events appended earlier in the same unit of work are included.
    async fn find_all_by_transaction_id_in(
        &self,
        tx: &mut Self::Tx,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>>;

    /// Returns the committed event with the highest sequence number for an aggregate.
    async fn find_last_by_aggregate_id(&self, aggregate_id: AccountId) -> StoreResult<Event>;

    /// Like [`find_last_by_aggregate_id`](Self::find_last_by_aggregate_id) but read
    /// through `tx`, so events appended earlier in the same unit of work are seen.
    async fn find_last_by_aggregate_id_in(
        &self,
        tx: &mut Self::Tx,
        aggregate_id: AccountId,
    ) -> StoreResult<Event>;
}
