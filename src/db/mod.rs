//! Dual database sessions: one hard-restricted to reads, one that writes.
//!
//! The read pool is opened read-only with `PRAGMA query_only` on every
//! connection, so even a statement that slipped past classification cannot
//! mutate data. The write pool owns explicit transaction boundaries: the
//! preview path measures and rolls back, the confirm path commits. Every
//! call is bounded by the configured query timeout.

mod rows;

pub use rows::JsonRow;

use crate::config::WardenConfig;
use crate::error::{ConfigError, ExecutionError, WardenError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct SessionManager {
    read: SqlitePool,
    write: SqlitePool,
    timeout: Duration,
}

impl SessionManager {
    /// Open both pools. Connection failures here are startup failures; the
    /// gateway never retries them per request.
    pub async fn connect(config: &WardenConfig) -> Result<Self, WardenError> {
        let read_options = SqliteConnectOptions::from_str(&config.read_database_url)
            .map_err(|error| ConfigError::Connect(format!("read session url: {error}")))?
            .read_only(true)
            .pragma("query_only", "ON");
        let read = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(read_options)
            .await
            .map_err(|error| ConfigError::Connect(format!("read session: {error}")))?;

        let write_options = SqliteConnectOptions::from_str(&config.write_database_url)
            .map_err(|error| ConfigError::Connect(format!("write session url: {error}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        // SQLite has a single writer; one pooled connection serializes writes
        // instead of surfacing SQLITE_BUSY.
        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_options)
            .await
            .map_err(|error| ConfigError::Connect(format!("write session: {error}")))?;

        Ok(Self {
            read,
            write,
            timeout: config.query_timeout(),
        })
    }

    /// The read-only pool, for collaborators that need direct read access
    /// (schema introspection lives outside this crate).
    #[must_use]
    pub fn read_pool(&self) -> &SqlitePool {
        &self.read
    }

    /// Run a read, decode rows to JSON, and truncate at `row_limit`.
    /// Returns the rows plus whether truncation cut anything off.
    pub async fn fetch_read(
        &self,
        sql: &str,
        row_limit: i64,
    ) -> Result<(Vec<JsonRow>, bool), WardenError> {
        let statement = rows::ensure_row_limit(sql, row_limit);
        let fetched = self
            .bounded(async { sqlx::query(&statement).fetch_all(&self.read).await })
            .await?;

        let mut decoded = Vec::with_capacity(fetched.len());
        for row in &fetched {
            decoded.push(rows::row_to_json(row).map_err(ExecutionError::Database)?);
        }
        let cap = usize::try_from(row_limit).unwrap_or(usize::MAX);
        let truncated = decoded.len() > cap;
        decoded.truncate(cap);
        Ok((decoded, truncated))
    }

    /// Execute a mutating statement inside a transaction opened purely for
    /// measurement, then roll back unconditionally. The affected-row count
    /// is returned; the data is provably unchanged afterwards.
    pub async fn measure_rollback(&self, sql: &str) -> Result<u64, WardenError> {
        self.bounded(async {
            let mut tx = self.write.begin().await?;
            let result = sqlx::query(sql).execute(&mut *tx).await?;
            let affected = result.rows_affected();
            tx.rollback().await?;
            Ok(affected)
        })
        .await
    }

    /// Execute a mutating statement and commit. A failure anywhere before
    /// the commit aborts the transaction with no partial effect.
    pub async fn execute_commit(&self, sql: &str) -> Result<u64, WardenError> {
        self.bounded(async {
            let mut tx = self.write.begin().await?;
            let result = sqlx::query(sql).execute(&mut *tx).await?;
            let affected = result.rows_affected();
            tx.commit().await?;
            Ok(affected)
        })
        .await
    }

    /// Bound `op` by the configured query timeout. An elapsed timer drops
    /// the in-flight operation (open transactions roll back on drop) and
    /// surfaces as a timeout error.
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, WardenError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ExecutionError::Database(error).into()),
            Err(_elapsed) => Err(WardenError::Timeout {
                limit_secs: self.timeout.as_secs(),
            }),
        }
    }
}
