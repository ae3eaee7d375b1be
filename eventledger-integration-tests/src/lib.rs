//! Integration tests for `EventLedger`
//!
//! This crate contains integration tests that verify the interaction between the
//! ledger workflows and the in-memory store adapter. The library part holds the
//! [`FaultyStore`] wrapper the atomicity tests use to fail individual store calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventledger::{
    Account, AccountId, AccountStore, Event, EventStore, NewEvent, Operation, StoreError,
    StoreResult, TransactionId,
};
use eventledger_memory::{InMemoryLedgerStore, InMemoryTransaction};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Faults {
    failing: HashSet<Operation>,
    lock_delay: Option<Duration>,
}

/// In-memory store that fails selected operations on demand.
///
/// Every call is delegated to the wrapped [`InMemoryLedgerStore`] unless its
/// [`Operation`] has been armed with [`FaultyStore::fail_on`], in which case the
/// call returns [`StoreError::StoreFailure`] without touching the inner store.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryLedgerStore,
    faults: Arc<Mutex<Faults>>,
}

impl FaultyStore {
    /// Wraps an existing store.
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// The wrapped store, for inspecting committed state.
    pub const fn inner(&self) -> &InMemoryLedgerStore {
        &self.inner
    }

    /// Makes every subsequent call of `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        self.faults.lock().failing.insert(operation);
    }

    /// Stops injecting failures and delays.
    pub fn heal(&self) {
        let mut faults = self.faults.lock();
        faults.failing.clear();
        faults.lock_delay = None;
    }

    /// Sleeps for `delay` before each row lock is taken.
    pub fn delay_locks(&self, delay: Duration) {
        self.faults.lock().lock_delay = Some(delay);
    }

    fn check(&self, operation: Operation) -> StoreResult<()> {
        if self.faults.lock().failing.contains(&operation) {
            debug!(%operation, "[faulty_store] Injecting failure");
            return Err(StoreError::StoreFailure {
                operation,
                detail: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        self.check(Operation::BeginTransaction)?;
        self.inner.begin().await
    }

    async fn find_by_id(&self, id: AccountId) -> StoreResult<Account> {
        self.check(Operation::FindAccount)?;
        self.inner.find_by_id(id).await
    }

    async fn find_by_id_for_update(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> StoreResult<Account> {
        let delay = self.faults.lock().lock_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(Operation::LockAccount)?;
        self.inner.find_by_id_for_update(tx, id).await
    }

    async fn upsert(&self, tx: &mut Self::Tx, account: &Account) -> StoreResult<()> {
        self.check(Operation::UpsertAccount)?;
        self.inner.upsert(tx, account).await
    }
}

#[async_trait]
impl EventStore for FaultyStore {
    type Tx = InMemoryTransaction;

    async fn append(&self, tx: &mut Self::Tx, event: &NewEvent) -> StoreResult<()> {
        self.check(Operation::AppendEvents)?;
        self.inner.append(tx, event).await
    }

    async fn append_bulk(&self, tx: &mut Self::Tx, events: &[NewEvent]) -> StoreResult<()> {
        self.check(Operation::AppendEvents)?;
        self.inner.append_bulk(tx, events).await
    }

    async fn find_all_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        self.check(Operation::FindEventsByTransaction)?;
        self.inner.find_all_by_transaction_id(transaction_id).await
    }

    async fn find_all_by_transaction_id_in(
        &self,
        tx: &mut Self::Tx,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        self.check(Operation::FindEventsByTransaction)?;
        self.inner.find_all_by_transaction_id_in(tx, transaction_id).await
    }

    async fn find_last_by_aggregate_id(&self, aggregate_id: AccountId) -> StoreResult<Event> {
        self.check(Operation::FindLastEvent)?;
        self.inner.find_last_by_aggregate_id(aggregate_id).await
    }

    async fn find_last_by_aggregate_id_in(
        &self,
        tx: &mut Self::Tx,
        aggregate_id: AccountId,
    ) -> StoreResult<Event> {
        self.check(Operation::FindLastEvent)?;
        self.inner.find_last_by_aggregate_id_in(tx, aggregate_id).await
    }
}
