//! Two-phase write protocol: preview inside a rolled-back transaction, then
//! confirm with a single-use token bound to the exact statement text.
//!
//! Preview measures real impact (the statement runs and is rolled back), so
//! the row cap here is a post-hoc check on observed effect rather than a
//! prediction. Confirmation re-validates against the live configuration
//! before committing; a preview verdict is never trusted across the gap.

mod pending;

pub use pending::{PendingModification, PendingStore, statement_digest};

use crate::audit::{AuditLog, AuditPhase, AuditRecord};
use crate::classify::classify;
use crate::config::WardenConfig;
use crate::db::SessionManager;
use crate::error::WardenError;
use crate::policy::{AccessMode, ReasonCode, evaluate};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Successful preview: the token is the only way to turn this measurement
/// into a commit, and it stops working at `expires_at`.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutcome {
    pub token: String,
    pub affected_rows: u64,
    pub expires_at: DateTime<Utc>,
    /// The audit sink rejected the append for this phase. The operation
    /// itself still stands.
    pub audit_degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub affected_rows: u64,
    pub audit_degraded: bool,
}

#[derive(Debug)]
pub struct WriteCoordinator {
    config: Arc<ArcSwap<WardenConfig>>,
    sessions: Arc<SessionManager>,
    audit: Arc<AuditLog>,
    pending: PendingStore,
}

impl WriteCoordinator {
    pub(crate) fn new(
        config: Arc<ArcSwap<WardenConfig>>,
        sessions: Arc<SessionManager>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            config,
            sessions,
            audit,
            pending: PendingStore::new(),
        }
    }

    /// Dry-run a write: policy check, execute inside a transaction opened
    /// for measurement, roll back, and mint a confirmation token when the
    /// measured impact fits under the row cap. Denials create no token and
    /// leave no trace in the database.
    pub async fn preview(&self, sql: &str) -> Result<PreviewOutcome, WardenError> {
        let config = self.config.load_full();
        let classification = classify(sql);

        let verdict = evaluate(&classification, &config, AccessMode::Write);
        if !verdict.allowed {
            tracing::warn!(reason = %verdict.reason, "write preview denied");
            self.audit
                .record(AuditRecord::verdict(&classification, &verdict))
                .await;
            return Err(WardenError::Denied {
                reason: verdict.reason,
            });
        }

        let affected = match self.sessions.measure_rollback(sql).await {
            Ok(affected) => affected,
            Err(error) => {
                self.audit
                    .record(AuditRecord::denied(
                        AuditPhase::Preview,
                        &classification,
                        error.reason_code(),
                    ))
                    .await;
                return Err(error);
            }
        };

        if affected > config.max_write_rows {
            tracing::warn!(
                rows = affected,
                cap = config.max_write_rows,
                "write preview exceeded the row cap"
            );
            self.audit
                .record(
                    AuditRecord::denied(
                        AuditPhase::Preview,
                        &classification,
                        ReasonCode::RowLimitExceeded,
                    )
                    .with_affected(affected),
                )
                .await;
            return Err(WardenError::Denied {
                reason: ReasonCode::RowLimitExceeded,
            });
        }

        let entry = self.pending.mint(
            sql,
            classification.target_table.clone(),
            affected,
            config.token_ttl(),
        );
        let recorded = self
            .audit
            .record(
                AuditRecord::executed(AuditPhase::Preview, &classification, affected)
                    .with_token(entry.token.clone()),
            )
            .await;
        tracing::info!(
            rows = affected,
            table = entry.target_table.as_deref().unwrap_or("?"),
            "write previewed and rolled back"
        );

        Ok(PreviewOutcome {
            token: entry.token,
            affected_rows: affected,
            expires_at: entry.expires_at,
            audit_degraded: !recorded,
        })
    }

    /// Turn a previewed write into a real commit. The token claim is
    /// exactly-once and happens before anything else; after the claim a
    /// denial or failure burns the token rather than leaving it re-usable.
    pub async fn confirm(&self, token: &str, sql: &str) -> Result<CommitOutcome, WardenError> {
        let config = self.config.load_full();
        let classification = classify(sql);

        let entry = match self.pending.claim(token, sql) {
            Ok(entry) => entry,
            Err(token_error) => {
                tracing::warn!(reason = %token_error, "write confirmation rejected");
                self.audit
                    .record(
                        AuditRecord::denied(
                            AuditPhase::Commit,
                            &classification,
                            token_error.reason(),
                        )
                        .with_token(token.to_string()),
                    )
                    .await;
                return Err(token_error.into());
            }
        };

        // Whitelist and kill switch may have moved since the preview; the
        // stale verdict is never trusted.
        let verdict = evaluate(&classification, &config, AccessMode::Write);
        if !verdict.allowed {
            tracing::warn!(reason = %verdict.reason, "write confirmation denied on re-check");
            self.audit
                .record(
                    AuditRecord::denied(AuditPhase::Commit, &classification, verdict.reason)
                        .with_token(entry.token.clone()),
                )
                .await;
            return Err(WardenError::Denied {
                reason: verdict.reason,
            });
        }

        let affected = match self.sessions.execute_commit(sql).await {
            Ok(affected) => affected,
            Err(error) => {
                self.audit
                    .record(
                        AuditRecord::denied(
                            AuditPhase::Commit,
                            &classification,
                            error.reason_code(),
                        )
                        .with_token(entry.token.clone()),
                    )
                    .await;
                return Err(error);
            }
        };

        let recorded = self
            .audit
            .record(
                AuditRecord::executed(AuditPhase::Commit, &classification, affected)
                    .with_token(entry.token.clone()),
            )
            .await;
        tracing::info!(
            rows = affected,
            table = entry.target_table.as_deref().unwrap_or("?"),
            "write confirmed and committed"
        );

        Ok(CommitOutcome {
            affected_rows: affected,
            audit_degraded: !recorded,
        })
    }

    /// Drop expired unconsumed tokens. Returns how many were swept.
    pub fn purge_expired(&self) -> usize {
        self.pending.purge_expired()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
