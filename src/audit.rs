//! Append-only audit trail.
//!
//! One entry per policy verdict and per coordinator phase transition.
//! Entries are immutable once written: nothing in this crate updates or
//! deletes them. A failed append never blocks or reverses the operation it
//! records; it is traced and reported to the caller as a degraded-mode
//! signal instead.

use crate::classify::{Classification, StatementKind};
use crate::error::{ConfigError, ExecutionError};
use crate::policy::{PolicyVerdict, ReasonCode};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;
use uuid::Uuid;

/// Which step of the pipeline produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditPhase {
    /// Policy decision, before any execution.
    Verdict,
    Read,
    Preview,
    Commit,
}

/// Entry about to be appended. Identity, timestamp, and actor are stamped
/// by the sink.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub phase: AuditPhase,
    pub kind: StatementKind,
    pub target_table: Option<String>,
    pub statement: String,
    pub allowed: bool,
    pub reason: ReasonCode,
    pub affected_rows: Option<i64>,
    pub token: Option<String>,
}

impl AuditRecord {
    /// Entry for a policy verdict, allow or deny.
    #[must_use]
    pub fn verdict(classification: &Classification, verdict: &PolicyVerdict) -> Self {
        Self {
            phase: AuditPhase::Verdict,
            kind: classification.kind,
            target_table: classification.target_table.clone(),
            statement: verdict.statement.clone(),
            allowed: verdict.allowed,
            reason: verdict.reason,
            affected_rows: None,
            token: None,
        }
    }

    /// Entry for a phase that was refused or failed.
    #[must_use]
    pub fn denied(phase: AuditPhase, classification: &Classification, reason: ReasonCode) -> Self {
        Self {
            phase,
            kind: classification.kind,
            target_table: classification.target_table.clone(),
            statement: classification.raw_text.trim().to_string(),
            allowed: false,
            reason,
            affected_rows: None,
            token: None,
        }
    }

    /// Entry for a phase that executed, with its measured row count.
    #[must_use]
    pub fn executed(phase: AuditPhase, classification: &Classification, affected_rows: u64) -> Self {
        Self {
            phase,
            kind: classification.kind,
            target_table: classification.target_table.clone(),
            statement: classification.raw_text.trim().to_string(),
            allowed: true,
            reason: ReasonCode::Allowed,
            affected_rows: Some(i64::try_from(affected_rows).unwrap_or(i64::MAX)),
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_affected(mut self, affected_rows: u64) -> Self {
        self.affected_rows = Some(i64::try_from(affected_rows).unwrap_or(i64::MAX));
        self
    }
}

/// Entry as read back out of the sink.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub recorded_at: String,
    pub actor: String,
    pub phase: String,
    pub kind: String,
    pub target_table: Option<String>,
    pub statement: String,
    pub allowed: bool,
    pub reason: String,
    pub affected_rows: Option<i64>,
    pub token: Option<String>,
}

/// Optional narrowing for [`AuditLog::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub phase: Option<AuditPhase>,
    pub target_table: Option<String>,
    pub denied_only: bool,
    /// Most recent entries first; defaults to 100.
    pub limit: Option<i64>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id      TEXT PRIMARY KEY,
    recorded_at   TEXT NOT NULL,
    actor         TEXT NOT NULL,
    phase         TEXT NOT NULL,
    kind          TEXT NOT NULL,
    target_table  TEXT,
    statement     TEXT NOT NULL,
    allowed       INTEGER NOT NULL,
    reason        TEXT NOT NULL,
    affected_rows INTEGER,
    token         TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_recorded_at ON audit_entries (recorded_at);
CREATE INDEX IF NOT EXISTS idx_audit_phase ON audit_entries (phase);
";

#[derive(Debug)]
pub struct AuditLog {
    pool: SqlitePool,
    actor: String,
}

impl AuditLog {
    /// Open (or create) the sink and make sure its table exists.
    pub async fn connect(url: &str, actor: &str) -> Result<Self, ConfigError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|error| ConfigError::Connect(format!("audit sink url: {error}")))?
            .create_if_missing(true);
        // A single connection keeps an in-memory sink coherent and an
        // on-disk one free of writer contention.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|error| ConfigError::Connect(format!("audit sink: {error}")))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|error| ConfigError::Connect(format!("audit schema: {error}")))?;

        Ok(Self {
            pool,
            actor: actor.to_string(),
        })
    }

    /// Append one entry. Returns `false` when the sink rejected the append;
    /// the failure is traced so it stays observable, but it is never allowed
    /// to fail the database operation it describes.
    pub async fn record(&self, record: AuditRecord) -> bool {
        let entry_id = Uuid::new_v4().to_string();
        let recorded_at = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO audit_entries
                 (entry_id, recorded_at, actor, phase, kind, target_table,
                  statement, allowed, reason, affected_rows, token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&entry_id)
        .bind(&recorded_at)
        .bind(&self.actor)
        .bind(record.phase.to_string())
        .bind(record.kind.to_string())
        .bind(&record.target_table)
        .bind(&record.statement)
        .bind(record.allowed)
        .bind(record.reason.to_string())
        .bind(record.affected_rows)
        .bind(&record.token)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(error) => {
                tracing::error!(
                    %error,
                    phase = %record.phase,
                    reason = %record.reason,
                    "audit append failed; continuing in degraded mode"
                );
                false
            }
        }
    }

    /// Read entries back, newest first.
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, ExecutionError> {
        let mut builder = QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT entry_id, recorded_at, actor, phase, kind, target_table,
                    statement, allowed, reason, affected_rows, token
             FROM audit_entries WHERE 1 = 1",
        );
        if let Some(phase) = filter.phase {
            builder.push(" AND phase = ").push_bind(phase.to_string());
        }
        if let Some(table) = &filter.target_table {
            builder
                .push(" AND target_table = ")
                .push_bind(table.to_ascii_lowercase());
        }
        if filter.denied_only {
            builder.push(" AND allowed = 0");
        }
        builder
            .push(" ORDER BY recorded_at DESC, entry_id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(100));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(AuditEntry {
                entry_id: row.try_get("entry_id")?,
                recorded_at: row.try_get("recorded_at")?,
                actor: row.try_get("actor")?,
                phase: row.try_get("phase")?,
                kind: row.try_get("kind")?,
                target_table: row.try_get("target_table")?,
                statement: row.try_get("statement")?,
                allowed: row.try_get("allowed")?,
                reason: row.try_get("reason")?,
                affected_rows: row.try_get("affected_rows")?,
                token: row.try_get("token")?,
            });
        }
        Ok(entries)
    }
}
