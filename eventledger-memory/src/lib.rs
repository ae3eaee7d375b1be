//! In-memory adapter for the `EventLedger` storage contracts
//!
//! [`InMemoryLedgerStore`] implements both [`AccountStore`] and [`EventStore`] with
//! the same guarantees a relational backend gives the workflows:
//!
//! - writes made through an [`InMemoryTransaction`] stay private until commit and
//!   are discarded when the transaction is dropped;
//! - [`AccountStore::find_by_id_for_update`] takes a per-row async lock held until
//!   the transaction ends;
//! - `(aggregate_id, sequence_number)` is unique across the event log.
//!
//! Event IDs are allocated when events are appended, so rolled-back appends leave
//! gaps in the ID sequence just like a database sequence would.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eventledger::errors::{Operation, StoreError, StoreResult};
use eventledger::model::{Account, Event, NewEvent};
use eventledger::store::{AccountStore, EventStore, UnitOfWork};
use eventledger::types::{AccountId, EventId, SequenceNumber, TransactionId};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    // Committed events per aggregate, in append order
    streams: HashMap<AccountId, Vec<Event>>,
    next_event_id: i64,
}

impl LedgerState {
    fn contains(&self, aggregate_id: AccountId, sequence_number: SequenceNumber) -> bool {
        self.streams
            .get(&aggregate_id)
            .is_some_and(|stream| stream.iter().any(|e| e.sequence_number == sequence_number))
    }

    fn last_event(&self, aggregate_id: AccountId) -> Option<&Event> {
        self.streams
            .get(&aggregate_id)
            .and_then(|stream| stream.iter().max_by_key(|e| e.sequence_number))
    }

    fn allocate_event_id(&mut self) -> EventId {
        self.next_event_id += 1;
        EventId::new(self.next_event_id)
    }
}

/// Thread-safe in-memory account and event store.
///
/// Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    row_locks: Arc<Mutex<HashMap<AccountId, RowLock>>>,
}

impl InMemoryLedgerStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed events of one aggregate, ordered by sequence number.
    pub fn events_for(&self, aggregate_id: AccountId) -> Vec<Event> {
        let state = self.state.lock();
        let mut events = state.streams.get(&aggregate_id).cloned().unwrap_or_default();
        events.sort_by_key(|e| e.sequence_number);
        events
    }

    /// Total number of committed events.
    pub fn event_count(&self) -> usize {
        self.state.lock().streams.values().map(Vec::len).sum()
    }

    /// Number of committed account rows.
    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }

    fn row_lock(&self, id: AccountId) -> RowLock {
        let mut locks = self.row_locks.lock();
        Arc::clone(locks.entry(id).or_default())
    }
}

/// Unit of work over an [`InMemoryLedgerStore`].
///
/// Dropping it without calling [`UnitOfWork::commit`] discards its writes and
/// releases its row locks.
pub struct InMemoryTransaction {
    state: Arc<Mutex<LedgerState>>,
    pending_accounts: HashMap<AccountId, Account>,
    pending_events: Vec<Event>,
    held_locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    finished: bool,
}

impl InMemoryTransaction {
    fn pending_last_event(&self, aggregate_id: AccountId) -> Option<&Event> {
        self.pending_events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .max_by_key(|e| e.sequence_number)
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                discarded_events = self.pending_events.len(),
                discarded_accounts = self.pending_accounts.len(),
                "[memory.transaction] Dropped without commit, writes discarded"
            );
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryTransaction {
    async fn commit(mut self) -> StoreResult<()> {
        let events = std::mem::take(&mut self.pending_events);
        let accounts = std::mem::take(&mut self.pending_accounts);

        {
            let mut state = self.state.lock();

            let mut batch = HashSet::new();
            for event in &events {
                let key = (event.aggregate_id, event.sequence_number);
                if !batch.insert(key) || state.contains(key.0, key.1) {
                    return Err(StoreError::Conflict {
                        operation: Operation::CommitTransaction,
                    });
                }
            }

            for event in events {
                state
                    .streams
                    .entry(event.aggregate_id)
                    .or_default()
                    .push(event);
            }
            state.accounts.extend(accounts);
        }

        self.finished = true;
        trace!(released_locks = self.held_locks.len(), "[memory.transaction] Committed");
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.pending_events.clear();
        self.pending_accounts.clear();
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            pending_accounts: HashMap::new(),
            pending_events: Vec::new(),
            held_locks: HashMap::new(),
            finished: false,
        })
    }

    async fn find_by_id(&self, id: AccountId) -> StoreResult<Account> {
        self.state
            .lock()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "account" })
    }

    async fn find_by_id_for_update(&self, tx: &mut Self::Tx, id: AccountId) -> StoreResult<Account> {
        if !tx.held_locks.contains_key(&id) {
            let lock = self.row_lock(id);
            let guard = lock.lock_owned().await;
            tx.held_locks.insert(id, guard);
        }

        if let Some(account) = tx.pending_accounts.get(&id) {
            return Ok(account.clone());
        }
        self.state
            .lock()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "account" })
    }

    async fn upsert(&self, tx: &mut Self::Tx, account: &Account) -> StoreResult<()> {
        tx.pending_accounts.insert(account.id, account.clone());
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn append(&self, tx: &mut Self::Tx, event: &NewEvent) -> StoreResult<()> {
        self.append_bulk(tx, std::slice::from_ref(event)).await
    }

    async fn append_bulk(&self, tx: &mut Self::Tx, events: &[NewEvent]) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut staged = Vec::with_capacity(events.len());

        for event in events {
            let key = (event.aggregate_id, event.sequence_number);
            let pending_duplicate = tx
                .pending_events
                .iter()
                .chain(staged.iter())
                .any(|e: &Event| (e.aggregate_id, e.sequence_number) == key);
            if pending_duplicate || state.contains(key.0, key.1) {
                return Err(StoreError::Conflict {
                    operation: Operation::AppendEvents,
                });
            }
            let id = state.allocate_event_id();
            staged.push(event.clone().persisted(id, Utc::now()));
        }
        drop(state);

        tx.pending_events.extend(staged);
        Ok(())
    }

    async fn find_all_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        let state = self.state.lock();
        let mut events: Vec<Event> = state
            .streams
            .values()
            .flatten()
            .filter(|e| &e.transaction_id == transaction_id)
            .cloned()
            .collect();
        drop(state);

        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_all_by_transaction_id_in(
        &self,
        tx: &mut Self::Tx,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        let mut events = self.find_all_by_transaction_id(transaction_id).await?;
        events.extend(
            tx.pending_events
                .iter()
                .filter(|e| &e.transaction_id == transaction_id)
                .cloned(),
        );

        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_last_by_aggregate_id(&self, aggregate_id: AccountId) -> StoreResult<Event> {
        self.state
            .lock()
            .last_event(aggregate_id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "event" })
    }

    async fn find_last_by_aggregate_id_in(
        &self,
        tx: &mut Self::Tx,
        aggregate_id: AccountId,
    ) -> StoreResult<Event> {
        let committed = self.state.lock().last_event(aggregate_id).cloned();
        let pending = tx.pending_last_event(aggregate_id).cloned();

        committed
            .into_iter()
            .chain(pending)
            .max_by_key(|e| e.sequence_number)
            .ok_or(StoreError::NotFound { entity: "event" })
    }
}
