//! Human-readable audit lines for stored account events.

use std::fmt;

use eventledger::{AccountEvent, AccountId, Event, EventKind, SequenceNumber, StoreResult};
use rust_decimal::Decimal;
use serde::Serialize;

/// Which way funds moved for the audited account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The account was opened
    Opened,
    /// Funds arrived
    In,
    /// Funds left
    Out,
}

/// One event of an account's stream, flattened for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditLine {
    /// Audited account
    pub account_id: AccountId,
    /// Position of the event in the account's stream
    pub sequence_number: SequenceNumber,
    /// Stored event kind
    pub kind: EventKind,
    /// Movement direction
    pub direction: Direction,
    /// Amount involved
    pub amount: Decimal,
    /// Other side of the movement, if any
    pub counterparty: Option<String>,
    /// Operation that recorded the event
    pub transaction_id: String,
}

impl AuditLine {
    /// Builds the audit line for a stored event.
    pub fn from_event(event: &Event) -> StoreResult<Self> {
        let (direction, amount, counterparty) = match event.decode()? {
            AccountEvent::InitialBalanceSet { initial_balance } => {
                (Direction::Opened, initial_balance, None)
            }
            AccountEvent::DepositReceived { source, amount } => {
                (Direction::In, amount, Some(source))
            }
            AccountEvent::BalanceDebited {
                destination_account_id,
                amount,
            } => (
                Direction::Out,
                amount,
                Some(format!("account {destination_account_id}")),
            ),
            AccountEvent::BalanceCredited {
                source_account_id,
                amount,
            } => (
                Direction::In,
                amount,
                Some(format!("account {source_account_id}")),
            ),
        };

        Ok(Self {
            account_id: event.aggregate_id,
            sequence_number: event.sequence_number,
            kind: event.kind,
            direction,
            amount: amount.as_decimal(),
            counterparty,
            transaction_id: event.transaction_id.to_string(),
        })
    }

    /// Builds audit lines for a whole stream, preserving its order.
    pub fn from_events(events: &[Event]) -> StoreResult<Vec<Self>> {
        events.iter().map(Self::from_event).collect()
    }
}

impl fmt::Display for AuditLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account {} #{} {} {}",
            self.account_id, self.sequence_number, self.kind, self.amount
        )?;
        match (self.direction, &self.counterparty) {
            (Direction::In, Some(other)) => write!(f, " from {other}")?,
            (Direction::Out, Some(other)) => write!(f, " to {other}")?,
            _ => {}
        }
        write!(f, " [{}]", self.transaction_id)
    }
}
