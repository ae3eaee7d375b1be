//! Banking example showing accounts, transfers and their audit trail
//!
//! - Opening accounts with an initial deposit
//! - Transfers between accounts with idempotent transaction ids
//! - An [`AuditLine`] view of each event an operation recorded

pub mod audit;

pub use audit::{AuditLine, Direction};
