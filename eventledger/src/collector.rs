//! Per-aggregate event collector.
//!
//! An [`EventCollector`] produces the gap-free batch of events one operation adds to
//! one aggregate. It is loaded with the aggregate's last sequence number, stamps
//! every applied event with the next number, and flushes the pending batch through
//! a caller-supplied unit of work in a single bulk append.
//!
//! ```rust,ignore
//! let mut collector = EventCollector::load_in(&store, &mut tx, id, tx_id, version).await?;
//! collector.on_balance_debited(destination, amount)?;
//! collector.place(&store, &mut tx).await?;
//! ```

use tracing::{debug, instrument};

use crate::errors::StoreResult;
use crate::model::{AccountEvent, AggregateType, Event, NewEvent};
use crate::store::EventStore;
use crate::types::{AccountId, Amount, SchemaVersion, SequenceNumber, TransactionId};

/// Builds and flushes the event batch of one aggregate within one operation.
#[derive(Debug, Clone)]
pub struct EventCollector {
    aggregate_id: AccountId,
    transaction_id: TransactionId,
    version: SchemaVersion,
    sequence: SequenceNumber,
    pending: Vec<NewEvent>,
}

impl EventCollector {
    /// Loads a collector from committed state.
    ///
    /// A missing aggregate starts at sequence 0. Lookup failures other than
    /// "not found" are returned.
    #[instrument(name = "collector.load", skip(store, transaction_id, version))]
    pub async fn load<E>(
        store: &E,
        aggregate_id: AccountId,
        transaction_id: TransactionId,
        version: SchemaVersion,
    ) -> StoreResult<Self>
    where
        E: EventStore + ?Sized,
    {
        let last = store.find_last_by_aggregate_id(aggregate_id).await;
        let sequence = last_sequence(last)?;
        debug!(%sequence, "[collector.load] Starting from last committed sequence");
        Ok(Self::starting_at(aggregate_id, transaction_id, version, sequence))
    }

    /// Loads a collector through an open unit of work.
    ///
    /// Used inside locked sections so the starting sequence cannot change before
    /// the batch is placed.
    #[instrument(name = "collector.load_in", skip(store, tx, transaction_id, version))]
    pub async fn load_in<E>(
        store: &E,
        tx: &mut E::Tx,
        aggregate_id: AccountId,
        transaction_id: TransactionId,
        version: SchemaVersion,
    ) -> StoreResult<Self>
    where
        E: EventStore + ?Sized,
    {
        let last = store.find_last_by_aggregate_id_in(tx, aggregate_id).await;
        let sequence = last_sequence(last)?;
        debug!(%sequence, "[collector.load_in] Starting from last sequence seen by unit of work");
        Ok(Self::starting_at(aggregate_id, transaction_id, version, sequence))
    }

    /// Creates a collector that continues after `sequence`.
    pub const fn starting_at(
        aggregate_id: AccountId,
        transaction_id: TransactionId,
        version: SchemaVersion,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            aggregate_id,
            transaction_id,
            version,
            sequence,
            pending: Vec::new(),
        }
    }

    /// The aggregate this collector writes to.
    pub const fn aggregate_id(&self) -> AccountId {
        self.aggregate_id
    }

    /// Sequence number of the most recently applied event.
    pub const fn sequence_number(&self) -> SequenceNumber {
        self.sequence
    }

    /// Events applied since the last successful [`place`](Self::place).
    pub fn pending(&self) -> &[NewEvent] {
        &self.pending
    }

    /// Stamps `event` with the next sequence number and buffers it.
    pub fn apply(&mut self, event: AccountEvent) -> StoreResult<()> {
        let payload = event.payload()?;
        let sequence = self.sequence.next();
        self.pending.push(NewEvent {
            transaction_id: self.transaction_id.clone(),
            sequence_number: sequence,
            aggregate_id: self.aggregate_id,
            aggregate_type: AggregateType::Account,
            kind: event.kind(),
            payload,
            version: self.version.clone(),
        });
        self.sequence = sequence;
        Ok(())
    }

    /// Buffers an `init_balance` event.
    pub fn on_initial_balance_set(&mut self, initial_balance: Amount) -> StoreResult<()> {
        self.apply(AccountEvent::InitialBalanceSet { initial_balance })
    }

    /// Buffers a `deposit_received` event.
    pub fn on_deposit_received(&mut self, source: &str, amount: Amount) -> StoreResult<()> {
        self.apply(AccountEvent::DepositReceived {
            source: source.to_string(),
            amount,
        })
    }

    /// Buffers a `balance_debited` event naming the receiving account.
    pub fn on_balance_debited(
        &mut self,
        destination_account_id: AccountId,
        amount: Amount,
    ) -> StoreResult<()> {
        self.apply(AccountEvent::BalanceDebited {
            destination_account_id,
            amount,
        })
    }

    /// Buffers a `balance_credited` event naming the paying account.
    pub fn on_balance_credited(
        &mut self,
        source_account_id: AccountId,
        amount: Amount,
    ) -> StoreResult<()> {
        self.apply(AccountEvent::BalanceCredited {
            source_account_id,
            amount,
        })
    }

    /// Appends the pending batch through `tx` and returns how many events were placed.
    ///
    /// On success the batch is cleared and later events continue from the current
    /// sequence number. On failure the batch is kept and nothing is retried; the
    /// caller is expected to drop `tx`.
    #[instrument(
        name = "collector.place",
        skip(self, store, tx),
        fields(aggregate_id = %self.aggregate_id, pending = self.pending.len())
    )]
    pub async fn place<E>(&mut self, store: &E, tx: &mut E::Tx) -> StoreResult<usize>
    where
        E: EventStore + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(0);
        }

        store.append_bulk(tx, &self.pending).await?;

        let placed = self.pending.len();
        self.pending.clear();
        debug!(placed, "[collector.place] Batch appended");
        Ok(placed)
    }
}

fn last_sequence(last: StoreResult<Event>) -> StoreResult<SequenceNumber> {
    match last {
        Ok(event) => Ok(event.sequence_number),
        Err(error) if error.is_not_found() => Ok(SequenceNumber::initial()),
        Err(error) => Err(error),
    }
}
