//! Core value types for the ledger.
//!
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle. Once a request has been parsed
//! into these types the workflows never re-check shape rules such as positivity.

use nutype::nutype;
use rust_decimal::Decimal;

/// Caller-assigned identifier of an account aggregate.
///
/// Account IDs are strictly positive. They are totally ordered, which the transfer
/// workflow relies on to acquire row locks in a canonical order.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct AccountId(i64);

/// Idempotency key of one logical operation.
///
/// Every event produced by the operation carries this value, so a replayed request
/// can be detected by looking the key up in the event log.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct TransactionId(String);

/// A strictly positive monetary amount.
///
/// Used for initial deposits and transfer amounts. Balances themselves are plain
/// [`Decimal`] values because a balance may legitimately be zero.
#[nutype(
    validate(predicate = |amount: &Decimal| *amount > Decimal::ZERO),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Amount(Decimal);

impl Amount {
    /// Returns the amount as a [`Decimal`] for arithmetic.
    pub fn as_decimal(self) -> Decimal {
        self.into_inner()
    }
}

/// Position of an event within its aggregate's stream.
///
/// Sequence numbers start at 1 for the first event; 0 denotes "no events yet".
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The position of an aggregate with no recorded events.
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns the next sequence number after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// Surrogate key assigned to an event by the store when it is persisted.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct EventId(i64);

/// Schema version tag stamped on every event payload.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 32),
    default = "v1",
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct SchemaVersion(String);
