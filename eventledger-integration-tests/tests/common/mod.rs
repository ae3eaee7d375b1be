//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

use eventledger::{
    Account, AccountId, AccountStore, Amount, EventStore, Ledger, LedgerConfig, LedgerResult,
    RequestContext, TransactionId,
};
use eventledger_integration_tests::FaultyStore;
use eventledger_memory::InMemoryLedgerStore;
use rust_decimal::Decimal;
use uuid::Uuid;

pub type MemoryLedger = Ledger<InMemoryLedgerStore, InMemoryLedgerStore>;

pub fn account_id(id: i64) -> AccountId {
    AccountId::try_new(id).expect("test account ids are positive")
}

pub fn amount(value: Decimal) -> Amount {
    Amount::try_new(value).expect("test amounts are positive")
}

pub fn request(transaction_id: &str) -> RequestContext {
    RequestContext::now(TransactionId::try_new(transaction_id).expect("valid transaction id"))
}

pub fn fresh_request() -> RequestContext {
    request(&format!("tx-{}", Uuid::now_v7()))
}

pub fn memory_ledger() -> (InMemoryLedgerStore, MemoryLedger) {
    let store = InMemoryLedgerStore::new();
    let ledger = Ledger::new(store.clone(), store.clone(), LedgerConfig::default());
    (store, ledger)
}

pub fn faulty_ledger() -> (FaultyStore, Ledger<FaultyStore, FaultyStore>) {
    let store = FaultyStore::default();
    let ledger = Ledger::new(store.clone(), store.clone(), LedgerConfig::default());
    (store, ledger)
}

pub async fn open<A, E>(ledger: &Ledger<A, E>, id: i64, balance: Decimal) -> LedgerResult<Account>
where
    A: AccountStore,
    E: EventStore<Tx = A::Tx>,
{
    ledger
        .create_account(&fresh_request(), account_id(id), amount(balance))
        .await
}
