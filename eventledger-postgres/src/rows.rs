//! Row shapes of the `accounts` and `events` tables and their conversion into the
//! domain model.

use chrono::{DateTime, Utc};
use eventledger::errors::{StoreError, StoreResult};
use eventledger::model::{Account, Event};
use eventledger::types::{AccountId, EventId, SchemaVersion, SequenceNumber, TransactionId};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    id: i64,
    balance: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> StoreResult<Self> {
        Ok(Self {
            id: account_id(row.id)?,
            balance: row.balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: i64,
    transaction_id: String,
    sequence_number: i64,
    aggregate_id: i64,
    aggregate_type: String,
    event_type: String,
    event_data: Json<Value>,
    version: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        let sequence_number = u64::try_from(row.sequence_number).map_err(|_| StoreError::Decode {
            detail: format!("negative sequence number {}", row.sequence_number),
        })?;

        Ok(Self {
            id: EventId::new(row.id),
            transaction_id: TransactionId::try_new(row.transaction_id)
                .map_err(|e| decode("transaction_id", &e))?,
            sequence_number: SequenceNumber::new(sequence_number),
            aggregate_id: account_id(row.aggregate_id)?,
            aggregate_type: row.aggregate_type.parse()?,
            kind: row.event_type.parse()?,
            payload: row.event_data.0,
            version: SchemaVersion::try_new(row.version).map_err(|e| decode("version", &e))?,
            created_at: row.created_at,
        })
    }
}

/// Columns selected by every event query, in [`EventRow`] order.
pub(crate) const EVENT_COLUMNS: &str = "id, transaction_id, sequence_number, aggregate_id, \
     aggregate_type, event_type, event_data, version, created_at";

/// Converts a sequence number to the `BIGINT` column type.
pub(crate) fn sequence_column(sequence: SequenceNumber) -> StoreResult<i64> {
    i64::try_from(sequence.into_inner()).map_err(|_| StoreError::Serialization {
        detail: format!("sequence number {sequence} exceeds BIGINT range"),
    })
}

fn account_id(raw: i64) -> StoreResult<AccountId> {
    AccountId::try_new(raw).map_err(|e| decode("account id", &e))
}

fn decode(column: &str, error: &dyn std::fmt::Display) -> StoreError {
    StoreError::Decode {
        detail: format!("invalid {column}: {error}"),
    }
}
