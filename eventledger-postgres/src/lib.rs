//! PostgreSQL adapter for the `EventLedger` storage contracts
//!
//! [`PostgresLedgerStore`] implements both [`AccountStore`] and [`EventStore`] over
//! one connection pool. A unit of work is a database transaction
//! ([`PostgresTransaction`]); dropping it without committing rolls it back.
//! Row locks are `SELECT ... FOR UPDATE`, and the `events` table carries a unique
//! constraint on `(aggregate_id, sequence_number)`, reported as
//! [`StoreError::Conflict`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use std::time::Duration;

use async_trait::async_trait;
use eventledger::errors::{Operation, StoreError, StoreResult};
use eventledger::model::{Account, Event, NewEvent};
use eventledger::store::{AccountStore, EventStore, UnitOfWork};
use eventledger::types::{AccountId, TransactionId};
use nutype::nutype;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{query, query_as, Pool, Postgres, QueryBuilder, Transaction};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::rows::{sequence_column, AccountRow, EventRow, EVENT_COLUMNS};

/// Errors raised while setting up the store.
#[derive(Debug, Error)]
pub enum PostgresLedgerStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// Schema migrations failed.
    #[error("failed to run postgres migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// The database did not answer a health check.
    #[error("postgres health check failed")]
    PingFailed(#[source] sqlx::Error),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Account and event store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Pool<Postgres>,
}

impl PostgresLedgerStore {
    /// Connect with default pool configuration.
    pub async fn new<S: Into<String>>(
        connection_string: S,
    ) -> Result<Self, PostgresLedgerStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresLedgerStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresLedgerStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Runs `SELECT 1`.
    pub async fn ping(&self) -> Result<(), PostgresLedgerStoreError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(PostgresLedgerStoreError::PingFailed)?;
        Ok(())
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), PostgresLedgerStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresLedgerStoreError::MigrationFailed)?;
        info!("[postgres.migrate] schema is up to date");
        Ok(())
    }
}

/// A database transaction used as a unit of work.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresTransaction {
    inner: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresTransaction {
    async fn commit(self) -> StoreResult<()> {
        self.inner
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.inner
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RollbackTransaction))
    }
}

#[async_trait]
impl AccountStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;
        Ok(PostgresTransaction { inner })
    }

    #[instrument(name = "postgres.find_account", skip(self))]
    async fn find_by_id(&self, id: AccountId) -> StoreResult<Account> {
        let row: Option<AccountRow> = query_as(
            "SELECT id, balance, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::FindAccount))?;

        row.ok_or(StoreError::NotFound { entity: "account" })?
            .try_into()
    }

    #[instrument(name = "postgres.lock_account", skip(self, tx))]
    async fn find_by_id_for_update(&self, tx: &mut Self::Tx, id: AccountId) -> StoreResult<Account> {
        let row: Option<AccountRow> = query_as(
            "SELECT id, balance, created_at, updated_at FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(id.into_inner())
        .fetch_optional(&mut *tx.inner)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::LockAccount))?;

        debug!(found = row.is_some(), "[postgres.lock_account] row lock acquired");
        row.ok_or(StoreError::NotFound { entity: "account" })?
            .try_into()
    }

    #[instrument(name = "postgres.upsert_account", skip(self, tx, account), fields(account_id = %account.id))]
    async fn upsert(&self, tx: &mut Self::Tx, account: &Account) -> StoreResult<()> {
        query(
            "INSERT INTO accounts (id, balance, created_at, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET balance = EXCLUDED.balance, updated_at = EXCLUDED.updated_at",
        )
        .bind(account.id.into_inner())
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *tx.inner)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpsertAccount))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    async fn append(&self, tx: &mut Self::Tx, event: &NewEvent) -> StoreResult<()> {
        self.append_bulk(tx, std::slice::from_ref(event)).await
    }

    #[instrument(name = "postgres.append_events", skip(self, tx, events), fields(event_count = events.len()))]
    async fn append_bulk(&self, tx: &mut Self::Tx, events: &[NewEvent]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let sequences = events
            .iter()
            .map(|event| sequence_column(event.sequence_number))
            .collect::<StoreResult<Vec<i64>>>()?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO events (transaction_id, sequence_number, aggregate_id, aggregate_type, event_type, event_data, version) ",
        );
        builder.push_values(events.iter().zip(sequences), |mut row, (event, sequence)| {
            row.push_bind(event.transaction_id.as_ref())
                .push_bind(sequence)
                .push_bind(event.aggregate_id.into_inner())
                .push_bind(event.aggregate_type.as_str())
                .push_bind(event.kind.as_str())
                .push_bind(Json(&event.payload))
                .push_bind(event.version.as_ref());
        });

        builder
            .build()
            .execute(&mut *tx.inner)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::AppendEvents))?;

        debug!("[postgres.append_events] events inserted");
        Ok(())
    }

    #[instrument(name = "postgres.find_events_by_transaction", skip(self))]
    async fn find_all_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE transaction_id = $1 ORDER BY id");
        let rows: Vec<EventRow> = query_as(&sql)
            .bind(transaction_id.as_ref())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindEventsByTransaction))?;

        rows.into_iter().map(Event::try_from).collect()
    }

    #[instrument(name = "postgres.find_events_by_transaction_in", skip(self, tx))]
    async fn find_all_by_transaction_id_in(
        &self,
        tx: &mut Self::Tx,
        transaction_id: &TransactionId,
    ) -> StoreResult<Vec<Event>> {
        // read committed: rows committed by a previous lock holder are visible here
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE transaction_id = $1 ORDER BY id");
        let rows: Vec<EventRow> = query_as(&sql)
            .bind(transaction_id.as_ref())
            .fetch_all(&mut *tx.inner)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindEventsByTransaction))?;

        rows.into_iter().map(Event::try_from).collect()
    }

    #[instrument(name = "postgres.find_last_event", skip(self))]
    async fn find_last_by_aggregate_id(&self, aggregate_id: AccountId) -> StoreResult<Event> {
        let sql = last_event_sql();
        let row: Option<EventRow> = query_as(&sql)
            .bind(aggregate_id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindLastEvent))?;

        row.ok_or(StoreError::NotFound { entity: "event" })?
            .try_into()
    }

    #[instrument(name = "postgres.find_last_event_in", skip(self, tx))]
    async fn find_last_by_aggregate_id_in(
        &self,
        tx: &mut Self::Tx,
        aggregate_id: AccountId,
    ) -> StoreResult<Event> {
        let sql = last_event_sql();
        let row: Option<EventRow> = query_as(&sql)
            .bind(aggregate_id.into_inner())
            .fetch_optional(&mut *tx.inner)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindLastEvent))?;

        row.ok_or(StoreError::NotFound { entity: "event" })?
            .try_into()
    }
}

fn last_event_sql() -> String {
    format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY sequence_number DESC LIMIT 1"
    )
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        // 23505: unique constraint violation
        if db_error.code().as_deref() == Some("23505") {
            warn!(
                error = %db_error,
                operation = %operation,
                "[postgres.unique_violation] write rejected by unique constraint"
            );
            return StoreError::Conflict { operation };
        }
    }

    if matches!(error, sqlx::Error::RowNotFound) {
        return StoreError::NotFound { entity: "row" };
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::StoreFailure {
        operation,
        detail: error.to_string(),
    }
}
