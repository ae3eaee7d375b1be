//! Example usage of the `EventLedger` account ledger
//!
//! The `banking` example opens accounts and moves funds between them on the
//! in-memory store, shows a replayed request and an overdraft being rejected, then
//! prints each account's audit trail of stored events.
//!
//! Run it with `cargo run -p eventledger-examples --example banking`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Banking example: audit lines rendered from stored account events
pub mod banking;
