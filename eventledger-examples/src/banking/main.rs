//! Banking example application
//!
//! This example walks through the ledger on the in-memory store:
//! - Opening two accounts
//! - Transferring funds between them
//! - Rejected requests (replayed transaction id, insufficient balance)
//! - Printing each account's audit trail
//!
//! Configuration is read from `LEDGER_*` environment variables and log output is
//! filtered with `RUST_LOG`.

use anyhow::{bail, Result};
use eventledger::{
    AccountId, Amount, ErrorKind, EventStore, Ledger, LedgerConfig, RequestContext, TransactionId,
};
use eventledger_examples::banking::AuditLine;
use eventledger_memory::InMemoryLedgerStore;
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn new_request() -> Result<RequestContext> {
    let transaction_id = TransactionId::try_new(format!("tx-{}", Uuid::now_v7()))?;
    Ok(RequestContext::now(transaction_id))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting banking example");

    let store = InMemoryLedgerStore::new();
    let ledger = Ledger::new(store.clone(), store.clone(), LedgerConfig::from_env()?);

    let alice = AccountId::try_new(1)?;
    let bob = AccountId::try_new(2)?;

    info!("Opening Alice's account with 1000.00");
    ledger
        .create_account(&new_request()?, alice, Amount::try_new(dec!(1000.00))?)
        .await?;

    info!("Opening Bob's account with 500.00");
    ledger
        .create_account(&new_request()?, bob, Amount::try_new(dec!(500.00))?)
        .await?;

    info!("Transferring 200.00 from Alice to Bob");
    let payment = new_request()?;
    ledger
        .transfer(&payment, alice, bob, Amount::try_new(dec!(200.00))?)
        .await?;

    info!("Sending the same transfer again");
    match ledger
        .transfer(&payment, alice, bob, Amount::try_new(dec!(200.00))?)
        .await
    {
        Err(error) if error.kind() == ErrorKind::IdempotencyConflict => {
            info!("Replay correctly rejected: {error}");
        }
        other => bail!("replayed transfer should be rejected, got {other:?}"),
    }

    info!("Attempting transfer with insufficient funds");
    match ledger
        .transfer(&new_request()?, bob, alice, Amount::try_new(dec!(2000.00))?)
        .await
    {
        Err(error) if error.kind() == ErrorKind::InsufficientBalance => {
            info!("Transfer correctly rejected: {error}");
        }
        other => bail!("overdrawing transfer should be rejected, got {other:?}"),
    }

    info!("Final account balances:");
    for id in [alice, bob] {
        let account = ledger.get_account(id).await?;
        info!("  account {}: {}", account.id, account.balance);
    }

    let recorded = store.find_all_by_transaction_id(&payment.transaction_id).await?;
    info!(
        "Transfer {} recorded {} events",
        payment.transaction_id,
        recorded.len()
    );

    for id in [alice, bob] {
        info!("Audit trail of account {id}:");
        for line in AuditLine::from_events(&store.events_for(id))? {
            info!("  {line}");
        }
    }

    info!("Banking example completed successfully");
    Ok(())
}
