//! Ledger entity model: the account projection row and the event records.
//!
//! Events exist in three shapes:
//!
//! - [`AccountEvent`], the typed domain fact the workflows apply;
//! - [`NewEvent`], the stamped record produced by the collector and handed to the
//!   event store (no surrogate ID or creation timestamp yet);
//! - [`Event`], a record read back from the store.
//!
//! Payloads are stored as JSON objects keyed per event kind. Decimal values are
//! encoded as strings so no precision is lost on the way through the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LedgerError, LedgerResult, StoreError, StoreResult};
use crate::types::{AccountId, Amount, EventId, SchemaVersion, SequenceNumber, TransactionId};

/// Deposit source recorded for the initial deposit of a new account.
pub const SYSTEM_DEPOSIT_SOURCE: &str = "SYSTEM";

/// The balance projection of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Caller-assigned account identifier
    pub id: AccountId,
    /// Current balance; never negative outside an in-flight unit of work
    pub balance: Decimal,
    /// When the account was opened
    pub created_at: DateTime<Utc>,
    /// When the balance last changed
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens a new account holding `initial_balance`.
    pub fn open(id: AccountId, initial_balance: Amount, now: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: initial_balance.as_decimal(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the balance covers `amount`.
    pub fn can_cover(&self, amount: Amount) -> bool {
        self.balance >= amount.as_decimal()
    }

    /// Removes `amount` from the balance.
    ///
    /// Fails with [`LedgerError::InsufficientBalance`] and leaves the account
    /// untouched if the balance is strictly less than `amount`.
    pub fn debit(&mut self, amount: Amount, now: DateTime<Utc>) -> LedgerResult<()> {
        if !self.can_cover(amount) {
            return Err(LedgerError::InsufficientBalance {
                account: self.id,
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount.as_decimal();
        self.updated_at = now;
        Ok(())
    }

    /// Adds `amount` to the balance.
    pub fn credit(&mut self, amount: Amount, now: DateTime<Utc>) {
        self.balance += amount.as_decimal();
        self.updated_at = now;
    }
}

/// Aggregate types known to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    /// The account aggregate
    Account,
}

impl AggregateType {
    /// Stored representation of the aggregate type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Self::Account),
            other => Err(StoreError::Decode {
                detail: format!("unknown aggregate type '{other}'"),
            }),
        }
    }
}

/// Event kinds, with the names under which they are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `init_balance`
    #[serde(rename = "init_balance")]
    InitialBalanceSet,
    /// `deposit_received`
    #[serde(rename = "deposit_received")]
    DepositReceived,
    /// `balance_debited`
    #[serde(rename = "balance_debited")]
    BalanceDebited,
    /// `balance_credited`
    #[serde(rename = "balance_credited")]
    BalanceCredited,
}

impl EventKind {
    /// Stored representation of the event kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitialBalanceSet => "init_balance",
            Self::DepositReceived => "deposit_received",
            Self::BalanceDebited => "balance_debited",
            Self::BalanceCredited => "balance_credited",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init_balance" => Ok(Self::InitialBalanceSet),
            "deposit_received" => Ok(Self::DepositReceived),
            "balance_debited" => Ok(Self::BalanceDebited),
            "balance_credited" => Ok(Self::BalanceCredited),
            other => Err(StoreError::Decode {
                detail: format!("unknown event kind '{other}'"),
            }),
        }
    }
}

/// A domain fact about an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    /// The account was opened with this balance.
    InitialBalanceSet {
        /// Opening balance
        initial_balance: Amount,
    },
    /// Funds arrived from outside the ledger.
    DepositReceived {
        /// Free-form label of the depositor
        source: String,
        /// Deposited amount
        amount: Amount,
    },
    /// Funds left this account towards another account.
    BalanceDebited {
        /// The account that received the funds
        destination_account_id: AccountId,
        /// Transferred amount
        amount: Amount,
    },
    /// Funds arrived from another account.
    BalanceCredited {
        /// The account the funds came from
        source_account_id: AccountId,
        /// Transferred amount
        amount: Amount,
    },
}

#[derive(Serialize, Deserialize)]
struct InitialBalancePayload {
    initial_balance: Amount,
}

#[derive(Serialize, Deserialize)]
struct DepositPayload {
    source: String,
    amount: Amount,
}

#[derive(Serialize, Deserialize)]
struct DebitPayload {
    destination_account_id: AccountId,
    amount: Amount,
}

#[derive(Serialize, Deserialize)]
struct CreditPayload {
    source_account_id: AccountId,
    amount: Amount,
}

impl AccountEvent {
    /// The kind under which this event is stored.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::InitialBalanceSet { .. } => EventKind::InitialBalanceSet,
            Self::DepositReceived { .. } => EventKind::DepositReceived,
            Self::BalanceDebited { .. } => EventKind::BalanceDebited,
            Self::BalanceCredited { .. } => EventKind::BalanceCredited,
        }
    }

    /// Encodes the kind-specific payload as a JSON object.
    pub fn payload(&self) -> StoreResult<Value> {
        let encoded = match self {
            Self::InitialBalanceSet { initial_balance } => {
                serde_json::to_value(InitialBalancePayload {
                    initial_balance: *initial_balance,
                })
            }
            Self::DepositReceived { source, amount } => serde_json::to_value(DepositPayload {
                source: source.clone(),
                amount: *amount,
            }),
            Self::BalanceDebited {
                destination_account_id,
                amount,
            } => serde_json::to_value(DebitPayload {
                destination_account_id: *destination_account_id,
                amount: *amount,
            }),
            Self::BalanceCredited {
                source_account_id,
                amount,
            } => serde_json::to_value(CreditPayload {
                source_account_id: *source_account_id,
                amount: *amount,
            }),
        };
        encoded.map_err(|e| StoreError::Serialization {
            detail: e.to_string(),
        })
    }

    /// Decodes a stored `(kind, payload)` pair.
    pub fn decode(kind: EventKind, payload: &Value) -> StoreResult<Self> {
        let decoded = match kind {
            EventKind::InitialBalanceSet => InitialBalancePayload::deserialize(payload)
                .map(|p| Self::InitialBalanceSet {
                    initial_balance: p.initial_balance,
                }),
            EventKind::DepositReceived => {
                DepositPayload::deserialize(payload).map(|p| Self::DepositReceived {
                    source: p.source,
                    amount: p.amount,
                })
            }
            EventKind::BalanceDebited => {
                DebitPayload::deserialize(payload).map(|p| Self::BalanceDebited {
                    destination_account_id: p.destination_account_id,
                    amount: p.amount,
                })
            }
            EventKind::BalanceCredited => {
                CreditPayload::deserialize(payload).map(|p| Self::BalanceCredited {
                    source_account_id: p.source_account_id,
                    amount: p.amount,
                })
            }
        };
        decoded.map_err(|e| StoreError::Decode {
            detail: format!("invalid {kind} payload: {e}"),
        })
    }
}

/// An event stamped by the collector and not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Idempotency key of the producing operation
    pub transaction_id: TransactionId,
    /// Position within the aggregate's stream
    pub sequence_number: SequenceNumber,
    /// The aggregate this event belongs to
    pub aggregate_id: AccountId,
    /// Always [`AggregateType::Account`]
    pub aggregate_type: AggregateType,
    /// Event kind
    pub kind: EventKind,
    /// Kind-specific JSON payload
    pub payload: Value,
    /// Payload schema version
    pub version: SchemaVersion,
}

impl NewEvent {
    /// Decodes the payload back into a typed event.
    pub fn decode(&self) -> StoreResult<AccountEvent> {
        AccountEvent::decode(self.kind, &self.payload)
    }

    /// Completes the record with the fields a store assigns on persist.
    pub fn persisted(self, id: EventId, created_at: DateTime<Utc>) -> Event {
        Event {
            id,
            transaction_id: self.transaction_id,
            sequence_number: self.sequence_number,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            kind: self.kind,
            payload: self.payload,
            version: self.version,
            created_at,
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Store-assigned surrogate key
    pub id: EventId,
    /// Idempotency key of the producing operation
    pub transaction_id: TransactionId,
    /// Position within the aggregate's stream
    pub sequence_number: SequenceNumber,
    /// The aggregate this event belongs to
    pub aggregate_id: AccountId,
    /// Aggregate type
    pub aggregate_type: AggregateType,
    /// Event kind
    pub kind: EventKind,
    /// Kind-specific JSON payload
    pub payload: Value,
    /// Payload schema version
    pub version: SchemaVersion,
    /// When the store persisted the event
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Decodes the payload back into a typed event.
    pub fn decode(&self) -> StoreResult<AccountEvent> {
        AccountEvent::decode(self.kind, &self.payload)
    }
}
