//! Front door wiring the pipeline together: classify, evaluate, execute
//! reads, and run the two-phase write protocol. One `Warden` per process;
//! every operation takes an immutable config snapshot, so a hot reload never
//! tears a request in half.

use crate::audit::{AuditEntry, AuditFilter, AuditLog, AuditPhase, AuditRecord};
use crate::classify::Classification;
use crate::config::WardenConfig;
use crate::db::{JsonRow, SessionManager};
use crate::error::{Result, WardenError};
use crate::policy::{AccessMode, PolicyVerdict, evaluate};
use crate::writes::{CommitOutcome, PreviewOutcome, WriteCoordinator};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;

/// Result of an executed read.
#[derive(Debug, Clone, Serialize)]
pub struct ReadOutcome {
    pub rows: Vec<JsonRow>,
    /// The result cap cut the result short.
    pub truncated: bool,
    pub audit_degraded: bool,
}

/// The gateway surface exposed to the agent protocol layer.
#[derive(Debug)]
pub struct Warden {
    config: Arc<ArcSwap<WardenConfig>>,
    sessions: Arc<SessionManager>,
    audit: Arc<AuditLog>,
    writes: WriteCoordinator,
}

impl Warden {
    /// Validate the configuration and open every session. The only fatal
    /// path in the crate; per-request failures after this never tear the
    /// process down.
    pub async fn connect(config: WardenConfig) -> Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionManager::connect(&config).await?);
        let audit = Arc::new(AuditLog::connect(&config.audit_database_url, &config.actor).await?);
        let config = Arc::new(ArcSwap::from_pointee(config));
        let writes = WriteCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
            Arc::clone(&audit),
        );
        tracing::info!("gateway connected");
        Ok(Self {
            config,
            sessions,
            audit,
            writes,
        })
    }

    /// Inspect a statement without executing or logging anything.
    #[must_use]
    pub fn classify(&self, sql: &str) -> Classification {
        crate::classify::classify(sql)
    }

    /// Evaluate the read-path policy for a statement and log the verdict.
    pub async fn evaluate_read(&self, sql: &str) -> PolicyVerdict {
        let config = self.config.load_full();
        let classification = crate::classify::classify(sql);
        let verdict = evaluate(&classification, &config, AccessMode::Read);
        self.audit
            .record(AuditRecord::verdict(&classification, &verdict))
            .await;
        verdict
    }

    /// Run a read end to end: policy, bounded execution on the read-only
    /// session, result-cap truncation, audit.
    pub async fn run_read(&self, sql: &str) -> Result<ReadOutcome> {
        let config = self.config.load_full();
        let classification = crate::classify::classify(sql);

        let verdict = evaluate(&classification, &config, AccessMode::Read);
        if !verdict.allowed {
            tracing::warn!(reason = %verdict.reason, "read denied");
            self.audit
                .record(AuditRecord::verdict(&classification, &verdict))
                .await;
            return Err(WardenError::Denied {
                reason: verdict.reason,
            });
        }

        let limit = verdict.result_row_limit.unwrap_or(config.max_result_rows);
        let (rows, truncated) = match self.sessions.fetch_read(&verdict.statement, limit).await {
            Ok(fetched) => fetched,
            Err(error) => {
                self.audit
                    .record(AuditRecord::denied(
                        AuditPhase::Read,
                        &classification,
                        error.reason_code(),
                    ))
                    .await;
                return Err(error);
            }
        };

        let recorded = self
            .audit
            .record(AuditRecord::executed(
                AuditPhase::Read,
                &classification,
                rows.len() as u64,
            ))
            .await;

        Ok(ReadOutcome {
            rows,
            truncated,
            audit_degraded: !recorded,
        })
    }

    /// Measure a write inside a rolled-back transaction and mint a
    /// confirmation token. See [`WriteCoordinator::preview`].
    pub async fn preview_write(&self, sql: &str) -> Result<PreviewOutcome> {
        self.writes.preview(sql).await
    }

    /// Commit a previously previewed write. See [`WriteCoordinator::confirm`].
    pub async fn confirm_write(&self, token: &str, sql: &str) -> Result<CommitOutcome> {
        self.writes.confirm(token, sql).await
    }

    /// Read access to the audit trail.
    pub async fn audit_query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.query(filter).await?)
    }

    /// Previewed writes still waiting for confirmation.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.pending_count()
    }

    /// Sweep expired confirmation tokens.
    pub fn purge_expired(&self) -> usize {
        self.writes.purge_expired()
    }

    /// Swap in a new configuration snapshot. In-flight requests keep the
    /// snapshot they started with; the next request sees the new one.
    pub fn reload_config(&self, config: WardenConfig) -> Result<()> {
        config.validate()?;
        self.config.store(Arc::new(config));
        tracing::info!("configuration reloaded");
        Ok(())
    }
}
