//! Ledger workflows.
//!
//! [`Ledger`] is the entry point the transport layer calls. It owns handles to an
//! [`AccountStore`] and an [`EventStore`] sharing one unit-of-work type, the
//! [`LedgerConfig`], and a [`Clock`].
//!
//! Every workflow follows the same shape:
//!
//! 1. freshness and idempotency gates, checked before anything is written;
//! 2. domain precondition checks;
//! 3. event emission into in-memory collectors;
//! 4. one unit of work that appends the events and updates the projection, then
//!    commits.
//!
//! The whole workflow runs under the configured operation timeout. When the deadline
//! passes the in-flight future is dropped, which drops the unit-of-work guard and
//! rolls back every write.

mod create;
mod transfer;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, instrument};

use crate::config::LedgerConfig;
use crate::context::{Clock, RequestContext, SystemClock};
use crate::errors::{LedgerError, LedgerResult, StoreError, StoreResult};
use crate::model::{Account, Event};
use crate::store::{AccountStore, EventStore};
use crate::types::{AccountId, TransactionId};

/// The ledger service.
pub struct Ledger<A, E> {
    accounts: A,
    events: E,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
}

impl<A, E> Ledger<A, E>
where
    A: AccountStore,
    E: EventStore<Tx = A::Tx>,
{
    /// Creates a ledger using the system clock.
    pub fn new(accounts: A, events: E, config: LedgerConfig) -> Self {
        Self {
            accounts,
            events,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// The active configuration.
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The account store handle.
    pub const fn accounts(&self) -> &A {
        &self.accounts
    }

    /// The event store handle.
    pub const fn events(&self) -> &E {
        &self.events
    }

    /// Reads the current projection of an account.
    #[instrument(name = "ledger.get_account", skip_all, fields(account_id = %account_id))]
    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.with_deadline("looking up account", async {
            self.accounts
                .find_by_id(account_id)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        LedgerError::AccountNotFound(account_id)
                    } else {
                        LedgerError::internal("looking up account", e)
                    }
                })
        })
        .await
    }

    /// Rejects requests whose timestamp is further than the threshold from now.
    ///
    /// A distance exactly equal to the threshold is accepted. Returns the clock
    /// reading used for the check.
    fn check_freshness(&self, ctx: &RequestContext) -> LedgerResult<DateTime<Utc>> {
        let now = self.clock.now();
        let threshold = self.config.request_time_threshold.as_duration();
        let skew = if now >= ctx.timestamp {
            now - ctx.timestamp
        } else {
            ctx.timestamp - now
        };
        let within_window = skew.to_std().is_ok_and(|skew| skew <= threshold);

        if within_window {
            Ok(now)
        } else {
            Err(LedgerError::InvalidRequestTime {
                request_time: ctx.timestamp,
                now,
                threshold,
            })
        }
    }

    /// Fails with [`LedgerError::IdempotencyConflict`] if any committed event
    /// already carries `transaction_id`.
    async fn ensure_transaction_unused(&self, transaction_id: &TransactionId) -> LedgerResult<()> {
        let recorded = self.events.find_all_by_transaction_id(transaction_id).await;
        Self::reject_recorded(transaction_id, recorded, "checking transaction id")
    }

    /// Repeats the idempotency gate through `tx`.
    ///
    /// Called once the row locks are held: a request with the same transaction ID
    /// that committed while this one waited on a lock is visible here.
    async fn ensure_transaction_unused_in(
        &self,
        tx: &mut A::Tx,
        transaction_id: &TransactionId,
    ) -> LedgerResult<()> {
        let recorded = self.events.find_all_by_transaction_id_in(tx, transaction_id).await;
        Self::reject_recorded(transaction_id, recorded, "rechecking transaction id")
    }

    fn reject_recorded(
        transaction_id: &TransactionId,
        recorded: StoreResult<Vec<Event>>,
        context: &'static str,
    ) -> LedgerResult<()> {
        match recorded {
            Ok(events) if events.is_empty() => Ok(()),
            Ok(_) => Err(LedgerError::IdempotencyConflict(transaction_id.clone())),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(LedgerError::internal(context, e)),
        }
    }

    /// Runs `operation` under the configured timeout.
    async fn with_deadline<T, F>(&self, context: &'static str, operation: F) -> LedgerResult<T>
    where
        F: Future<Output = LedgerResult<T>>,
    {
        let timeout = self.config.operation_timeout.as_duration();
        if let Ok(result) = tokio::time::timeout(timeout, operation).await {
            result
        } else {
            error!(?timeout, context, "[ledger] Deadline exceeded, unit of work dropped");
            Err(LedgerError::internal(context, StoreError::Timeout(timeout)))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Single-threaded store double shared by the workflow unit tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::errors::{Operation, StoreError, StoreResult};
    use crate::model::{Account, Event, NewEvent};
    use crate::store::{AccountStore, EventStore, UnitOfWork};
    use crate::types::{AccountId, EventId, TransactionId};

    #[derive(Default)]
    pub struct State {
        pub accounts: HashMap<AccountId, Account>,
        pub events: Vec<Event>,
        pub fail_upsert: bool,
        pub fail_append: bool,
        /// Makes lookups by transaction ID outside a unit of work see nothing.
        pub stale_transaction_reads: bool,
    }

    /// Buffers writes and applies them to the shared state on commit.
    pub struct BufferedTx {
        state: Arc<Mutex<State>>,
        accounts: Vec<Account>,
        events: Vec<NewEvent>,
    }

    #[async_trait]
    impl UnitOfWork for BufferedTx {
        async fn commit(self) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            for event in self.events {
                let duplicate = state.events.iter().any(|e| {
                    e.aggregate_id == event.aggregate_id && e.sequence_number == event.sequence_number
                });
                if duplicate {
                    return Err(StoreError::Conflict {
                        operation: Operation::CommitTransaction,
                    });
                }
                let id = EventId::new(i64::try_from(state.events.len()).unwrap() + 1);
                state.events.push(event.persisted(id, Utc::now()));
            }
            for account in self.accounts {
                state.accounts.insert(account.id, account);
            }
            Ok(())
        }

        async fn rollback(self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeStore {
        pub state: Arc<Mutex<State>>,
    }

    impl FakeStore {
        pub fn account(&self, id: AccountId) -> Option<Account> {
            self.state.lock().unwrap().accounts.get(&id).cloned()
        }

        pub fn events_for(&self, id: AccountId) -> Vec<Event> {
            self.state
                .lock()
                .unwrap()
                .events
                .iter()
                .filter(|e| e.aggregate_id == id)
                .cloned()
                .collect()
        }

        fn committed_with(&self, transaction_id: &TransactionId) -> Vec<Event> {
            self.state
                .lock()
                .unwrap()
                .events
                .iter()
                .filter(|e| &e.transaction_id == transaction_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl AccountStore for FakeStore {
        type Tx = BufferedTx;

        async fn begin(&self) -> StoreResult<Self::Tx> {
            Ok(BufferedTx {
                state: Arc::clone(&self.state),
                accounts: Vec::new(),
                events: Vec::new(),
            })
        }

        async fn find_by_id(&self, id: AccountId) -> StoreResult<Account> {
            self.account(id).ok_or(StoreError::NotFound { entity: "account" })
        }

        async fn find_by_id_for_update(&self, tx: &mut Self::Tx, id: AccountId) -> StoreResult<Account> {
            tx.accounts
                .iter()
                .rev()
                .find(|a| a.id == id)
                .cloned()
                .or_else(|| self.account(id))
                .ok_or(StoreError::NotFound { entity: "account" })
        }

        async fn upsert(&self, tx: &mut Self::Tx, account: &Account) -> StoreResult<()> {
            if self.state.lock().unwrap().fail_upsert {
                return Err(StoreError::StoreFailure {
                    operation: Operation::UpsertAccount,
                    detail: "injected".to_string(),
                });
            }
            tx.accounts.push(account.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl EventStore for FakeStore {
        type Tx = BufferedTx;

        async fn append(&self, tx: &mut Self::Tx, event: &NewEvent) -> StoreResult<()> {
            self.append_bulk(tx, std::slice::from_ref(event)).await
        }

        async fn append_bulk(&self, tx: &mut Self::Tx, events: &[NewEvent]) -> StoreResult<()> {
            if self.state.lock().unwrap().fail_append {
                return Err(StoreError::StoreFailure {
                    operation: Operation::AppendEvents,
                    detail: "injected".to_string(),
                });
            }
            tx.events.extend_from_slice(events);
            Ok(())
        }

        async fn find_all_by_transaction_id(
            &self,
            transaction_id: &TransactionId,
        ) -> StoreResult<Vec<Event>> {
            if self.state.lock().unwrap().stale_transaction_reads {
                return Ok(Vec::new());
            }
            Ok(self.committed_with(transaction_id))
        }

        async fn find_all_by_transaction_id_in(
            &self,
            tx: &mut Self::Tx,
            transaction_id: &TransactionId,
        ) -> StoreResult<Vec<Event>> {
            let mut events = self.committed_with(transaction_id);
            events.extend(
                tx.events
                    .iter()
                    .filter(|e| &e.transaction_id == transaction_id)
                    .cloned()
                    .map(|e| e.persisted(EventId::new(0), Utc::now())),
            );
            Ok(events)
        }

        async fn find_last_by_aggregate_id(&self, aggregate_id: AccountId) -> StoreResult<Event> {
            self.events_for(aggregate_id)
                .into_iter()
                .max_by_key(|e| e.sequence_number)
                .ok_or(StoreError::NotFound { entity: "event" })
        }

        async fn find_last_by_aggregate_id_in(
            &self,
            tx: &mut Self::Tx,
            aggregate_id: AccountId,
        ) -> StoreResult<Event> {
            let pending = tx
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .max_by_key(|e| e.sequence_number)
                .cloned()
                .map(|e| e.persisted(EventId::new(0), Utc::now()));
            match pending {
                Some(event) => Ok(event),
                None => self.find_last_by_aggregate_id(aggregate_id).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeStore;
    use super::*;
    use crate::config::{OperationTimeoutMs, RequestTimeThresholdMs};
    use crate::context::FixedClock;
    use crate::errors::ErrorKind;
    use crate::types::Amount;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ledger(store: &FakeStore) -> Ledger<FakeStore, FakeStore> {
        let config = LedgerConfig::default()
            .with_request_time_threshold(RequestTimeThresholdMs::try_new(60_000).unwrap())
            .with_operation_timeout(OperationTimeoutMs::try_new(5_000).unwrap());
        Ledger::new(store.clone(), store.clone(), config).with_clock(FixedClock(noon()))
    }

    fn ctx(tx: &str, timestamp: DateTime<Utc>) -> RequestContext {
        RequestContext::new(TransactionId::try_new(tx).unwrap(), timestamp)
    }

    #[test]
    fn freshness_accepts_exact_threshold_in_both_directions() {
        let store = FakeStore::default();
        let ledger = ledger(&store);

        let early = ctx("tx-early", noon() - chrono::Duration::milliseconds(60_000));
        let late = ctx("tx-late", noon() + chrono::Duration::milliseconds(60_000));

        assert!(ledger.check_freshness(&early).is_ok());
        assert!(ledger.check_freshness(&late).is_ok());
    }

    #[test]
    fn freshness_rejects_one_millisecond_beyond_threshold() {
        let store = FakeStore::default();
        let ledger = ledger(&store);

        let stale = ctx("tx-stale", noon() - chrono::Duration::milliseconds(60_001));
        let future = ctx("tx-future", noon() + chrono::Duration::milliseconds(60_001));

        let error = ledger.check_freshness(&stale).expect_err("stale request must fail");
        assert_eq!(error.kind(), ErrorKind::InvalidRequestTime);
        assert!(ledger.check_freshness(&future).is_err());
    }

    #[tokio::test]
    async fn get_account_maps_missing_row_to_account_not_found() {
        let store = FakeStore::default();
        let ledger = ledger(&store);
        let id = AccountId::try_new(42).unwrap();

        let error = ledger.get_account(id).await.expect_err("no such account");

        assert!(matches!(error, LedgerError::AccountNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn get_account_returns_projection() {
        let store = FakeStore::default();
        let ledger = ledger(&store);
        let id = AccountId::try_new(1).unwrap();
        ledger
            .create_account(&ctx("tx-open", noon()), id, Amount::try_new(dec!(12.34)).unwrap())
            .await
            .expect("creation should succeed");

        let account = ledger.get_account(id).await.expect("account exists");

        assert_eq!(account.balance, dec!(12.34));
    }

    #[tokio::test]
    async fn deadline_turns_slow_operation_into_internal_timeout() {
        let store = FakeStore::default();
        let config = LedgerConfig::default()
            .with_operation_timeout(OperationTimeoutMs::try_new(100).unwrap());
        let ledger = Ledger::new(store.clone(), store, config);

        let result: LedgerResult<()> = ledger
            .with_deadline("sleeping", async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::Internal {
                context: "sleeping",
                source: StoreError::Timeout(_)
            })
        ));
    }
}
