//! Concurrent workflows on a shared in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{account_id, amount, faulty_ledger, fresh_request, memory_ledger, open, request};
use eventledger::{LedgerError, SequenceNumber};
use futures::future::join_all;
use rust_decimal_macros::dec;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_cannot_overdraw() {
    // Given: account 1 with 150.00
    let (_store, ledger) = memory_ledger();
    let ledger = Arc::new(ledger);
    open(&*ledger, 1, dec!(150.00)).await.unwrap();
    open(&*ledger, 2, dec!(0.01)).await.unwrap();

    // When: two 100.00 transfers out of account 1 race
    let transfers = (0..2).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .transfer(&fresh_request(), account_id(1), account_id(2), amount(dec!(100.00)))
                .await
        })
    });
    let results: Vec<_> = join_all(transfers)
        .await
        .into_iter()
        .map(|joined| joined.expect("transfer task should not panic"))
        .collect();

    // Then: exactly one wins and the loser sees the reduced balance
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(LedgerError::InsufficientBalance { balance, .. }) if *balance == dec!(50.00)
            )
        })
        .count();
    assert_eq!((succeeded, insufficient), (1, 1), "results: {results:?}");
    assert_eq!(ledger.get_account(account_id(1)).await.unwrap().balance, dec!(50.00));
    assert_eq!(ledger.get_account(account_id(2)).await.unwrap().balance, dec!(100.01));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_direction_transfers_complete_without_deadlock() {
    // Given: two accounts with 500 each
    let (store, ledger) = memory_ledger();
    let ledger = Arc::new(ledger);
    open(&*ledger, 10, dec!(500)).await.unwrap();
    open(&*ledger, 20, dec!(500)).await.unwrap();

    // When: 40 transfers of 1 alternate direction concurrently
    let transfers = (0..40).map(|i| {
        let ledger = Arc::clone(&ledger);
        let (from, to) = if i % 2 == 0 { (10, 20) } else { (20, 10) };
        tokio::spawn(async move {
            ledger
                .transfer(&fresh_request(), account_id(from), account_id(to), amount(dec!(1)))
                .await
        })
    });
    for joined in join_all(transfers).await {
        joined
            .expect("transfer task should not panic")
            .expect("transfer should commit");
    }

    // Then: balances net out and each stream is gap-free
    assert_eq!(ledger.get_account(account_id(10)).await.unwrap().balance, dec!(500));
    assert_eq!(ledger.get_account(account_id(20)).await.unwrap().balance, dec!(500));
    for id in [10, 20] {
        let sequences: Vec<_> = store
            .events_for(account_id(id))
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        let expected: Vec<_> = (1..=42).map(SequenceNumber::new).collect();
        assert_eq!(sequences, expected, "stream of account {id}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creations_of_one_account_admit_a_single_winner() {
    // Given: an empty ledger
    let (store, ledger) = memory_ledger();
    let ledger = Arc::new(ledger);

    // When: two requests open account 1 at the same time
    let creations = (0..2).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { open(&*ledger, 1, dec!(10)).await })
    });
    let results: Vec<_> = join_all(creations)
        .await
        .into_iter()
        .map(|joined| joined.expect("creation task should not panic"))
        .collect();

    // Then: one succeeds, the other is told the account exists
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::AccountAlreadyExists(_))))
        .count();
    assert_eq!((succeeded, duplicates), (1, 1), "results: {results:?}");
    assert_eq!(store.event_count(), 2);
    assert_eq!(store.account_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replayed_transfer_racing_the_original_is_rejected() {
    // Given: two accounts and a store that stalls before each row lock, so both
    // requests pass the early transaction id check before either commits
    let (store, ledger) = faulty_ledger();
    let ledger = Arc::new(ledger);
    open(&*ledger, 1, dec!(1000)).await.unwrap();
    open(&*ledger, 2, dec!(0.01)).await.unwrap();
    store.delay_locks(Duration::from_millis(50));

    // When: the same transfer request is submitted twice at once
    let transfers = (0..2).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .transfer(&request("tx-retry"), account_id(1), account_id(2), amount(dec!(100)))
                .await
        })
    });
    let results: Vec<_> = join_all(transfers)
        .await
        .into_iter()
        .map(|joined| joined.expect("transfer task should not panic"))
        .collect();

    // Then: it is applied once and the other copy is a replay
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let replays = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::IdempotencyConflict(_))))
        .count();
    assert_eq!((succeeded, replays), (1, 1), "results: {results:?}");
    store.heal();
    assert_eq!(ledger.get_account(account_id(1)).await.unwrap().balance, dec!(900));
    assert_eq!(ledger.get_account(account_id(2)).await.unwrap().balance, dec!(100.01));
    assert_eq!(store.inner().events_for(account_id(1)).len(), 3);
    assert_eq!(store.inner().events_for(account_id(2)).len(), 3);
}
