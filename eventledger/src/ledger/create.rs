//! Account opening with an initial deposit.

use tracing::{debug, error, info, instrument, warn};

use super::Ledger;
use crate::collector::EventCollector;
use crate::context::RequestContext;
use crate::errors::{ErrorKind, LedgerError, LedgerResult, StoreError};
use crate::model::{Account, SYSTEM_DEPOSIT_SOURCE};
use crate::store::{AccountStore, EventStore, UnitOfWork};
use crate::types::{AccountId, Amount, SequenceNumber};

impl<A, E> Ledger<A, E>
where
    A: AccountStore,
    E: EventStore<Tx = A::Tx>,
{
    /// Opens `account_id` holding `initial_balance`.
    ///
    /// Records an `init_balance` event followed by a `deposit_received` event from
    /// `SYSTEM`, and inserts the account row, in one unit of work.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequestTime`] if the request is outside the freshness window
    /// - [`LedgerError::AccountAlreadyExists`] if the account exists, including when a
    ///   concurrent creation of the same ID commits first
    /// - [`LedgerError::IdempotencyConflict`] if the transaction ID was already used
    /// - [`LedgerError::Internal`] on storage failure
    #[instrument(
        name = "ledger.create_account",
        skip_all,
        fields(
            account_id = %account_id,
            transaction_id = %ctx.transaction_id,
            initial_balance = %initial_balance
        )
    )]
    pub async fn create_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        initial_balance: Amount,
    ) -> LedgerResult<Account> {
        let result = self
            .with_deadline(
                "creating account",
                self.open_account(ctx, account_id, initial_balance),
            )
            .await;

        match &result {
            Ok(_) => info!("[ledger.create_account] Account opened"),
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(error = %e, "[ledger.create_account] Failed, nothing committed");
            }
            Err(e) => warn!(error = %e, "[ledger.create_account] Rejected"),
        }
        result
    }

    async fn open_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        initial_balance: Amount,
    ) -> LedgerResult<Account> {
        let now = self.check_freshness(ctx)?;

        match self.accounts.find_by_id(account_id).await {
            Ok(_) => return Err(LedgerError::AccountAlreadyExists(account_id)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(LedgerError::internal("checking for existing account", e)),
        }

        self.ensure_transaction_unused(&ctx.transaction_id).await?;

        let mut collector = EventCollector::load(
            &self.events,
            account_id,
            ctx.transaction_id.clone(),
            self.config.event_version.clone(),
        )
        .await
        .map_err(|e| LedgerError::internal("loading event sequence", e))?;
        if collector.sequence_number() != SequenceNumber::initial() {
            // a concurrent creation committed after the row check
            return Err(LedgerError::AccountAlreadyExists(account_id));
        }
        collector
            .on_initial_balance_set(initial_balance)
            .and_then(|()| collector.on_deposit_received(SYSTEM_DEPOSIT_SOURCE, initial_balance))
            .map_err(|e| LedgerError::internal("recording opening events", e))?;

        let account = Account::open(account_id, initial_balance, now);

        let mut tx = self
            .accounts
            .begin()
            .await
            .map_err(|e| LedgerError::internal("opening unit of work", e))?;
        let placed = collector
            .place(&self.events, &mut tx)
            .await
            .map_err(|e| write_failure(account_id, "placing opening events", e))?;
        self.accounts
            .upsert(&mut tx, &account)
            .await
            .map_err(|e| write_failure(account_id, "inserting account", e))?;
        tx.commit()
            .await
            .map_err(|e| write_failure(account_id, "committing account creation", e))?;

        debug!(placed, "[ledger.create_account] Unit of work committed");
        Ok(account)
    }
}

/// A uniqueness conflict while writing means another creation of the same account
/// won the race.
fn write_failure(account_id: AccountId, context: &'static str, e: StoreError) -> LedgerError {
    if e.is_conflict() {
        LedgerError::AccountAlreadyExists(account_id)
    } else {
        LedgerError::internal(context, e)
    }
}
