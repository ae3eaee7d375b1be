//! Atomic two-account transfer.

use tracing::{debug, error, info, instrument, warn};

use super::Ledger;
use crate::collector::EventCollector;
use crate::context::RequestContext;
use crate::errors::{ErrorKind, LedgerError, LedgerResult};
use crate::model::Account;
use crate::store::{AccountStore, EventStore, UnitOfWork};
use crate::types::{AccountId, Amount};

impl<A, E> Ledger<A, E>
where
    A: AccountStore,
    E: EventStore<Tx = A::Tx>,
{
    /// Moves `amount` from `source` to `destination`.
    ///
    /// Both account rows are locked in ascending ID order, so transfers running in
    /// opposite directions over the same pair cannot deadlock. The transaction ID
    /// is checked again and sequence numbers are read after the locks are held. The
    /// balance check sees the locked balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequestTime`] if the request is outside the freshness window
    /// - [`LedgerError::IdempotencyConflict`] if the transaction ID was already used
    /// - [`LedgerError::SameAccount`] if `source == destination`
    /// - [`LedgerError::SourceAccountNotFound`] / [`LedgerError::DestinationAccountNotFound`]
    /// - [`LedgerError::InsufficientBalance`] if the source balance is below `amount`
    /// - [`LedgerError::Internal`] on storage failure
    #[instrument(
        name = "ledger.transfer",
        skip_all,
        fields(
            source = %source,
            destination = %destination,
            amount = %amount,
            transaction_id = %ctx.transaction_id
        )
    )]
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        source: AccountId,
        destination: AccountId,
        amount: Amount,
    ) -> LedgerResult<()> {
        let result = self
            .with_deadline(
                "transferring funds",
                self.move_funds(ctx, source, destination, amount),
            )
            .await;

        match &result {
            Ok(()) => info!("[ledger.transfer] Transfer committed"),
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(error = %e, "[ledger.transfer] Failed, nothing committed");
            }
            Err(e) => warn!(error = %e, "[ledger.transfer] Rejected"),
        }
        result
    }

    async fn move_funds(
        &self,
        ctx: &RequestContext,
        source: AccountId,
        destination: AccountId,
        amount: Amount,
    ) -> LedgerResult<()> {
        self.check_freshness(ctx)?;
        self.ensure_transaction_unused(&ctx.transaction_id).await?;
        if source == destination {
            return Err(LedgerError::SameAccount(source));
        }

        let mut tx = self
            .accounts
            .begin()
            .await
            .map_err(|e| LedgerError::internal("opening unit of work", e))?;

        let (low, high) = if source < destination {
            (source, destination)
        } else {
            (destination, source)
        };
        let low_row = self.lock_account(&mut tx, low).await?;
        let high_row = self.lock_account(&mut tx, high).await?;
        let (source_row, destination_row) = if low == source {
            (low_row, high_row)
        } else {
            (high_row, low_row)
        };
        let mut source_account = source_row.ok_or(LedgerError::SourceAccountNotFound(source))?;
        let mut destination_account =
            destination_row.ok_or(LedgerError::DestinationAccountNotFound(destination))?;
        self.ensure_transaction_unused_in(&mut tx, &ctx.transaction_id).await?;

        let now = self.clock.now();
        source_account.debit(amount, now)?;
        destination_account.credit(amount, now);

        let mut debits = EventCollector::load_in(
            &self.events,
            &mut tx,
            source,
            ctx.transaction_id.clone(),
            self.config.event_version.clone(),
        )
        .await
        .map_err(|e| LedgerError::internal("loading source sequence", e))?;
        let mut credits = EventCollector::load_in(
            &self.events,
            &mut tx,
            destination,
            ctx.transaction_id.clone(),
            self.config.event_version.clone(),
        )
        .await
        .map_err(|e| LedgerError::internal("loading destination sequence", e))?;

        debits
            .on_balance_debited(destination, amount)
            .and_then(|()| credits.on_balance_credited(source, amount))
            .map_err(|e| LedgerError::internal("recording transfer events", e))?;
        debits
            .place(&self.events, &mut tx)
            .await
            .map_err(|e| LedgerError::internal("placing debit events", e))?;
        credits
            .place(&self.events, &mut tx)
            .await
            .map_err(|e| LedgerError::internal("placing credit events", e))?;

        self.accounts
            .upsert(&mut tx, &source_account)
            .await
            .map_err(|e| LedgerError::internal("updating source balance", e))?;
        self.accounts
            .upsert(&mut tx, &destination_account)
            .await
            .map_err(|e| LedgerError::internal("updating destination balance", e))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::internal("committing transfer", e))?;

        debug!(
            source_balance = %source_account.balance,
            destination_balance = %destination_account.balance,
            "[ledger.transfer] Unit of work committed"
        );
        Ok(())
    }

    /// Locks an account row; `None` when it does not exist.
    async fn lock_account(&self, tx: &mut A::Tx, id: AccountId) -> LedgerResult<Option<Account>> {
        match self.accounts.find_by_id_for_update(tx, id).await {
            Ok(account) => Ok(Some(account)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(LedgerError::internal("locking account", e)),
        }
    }
}
