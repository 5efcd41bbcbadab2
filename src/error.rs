use crate::policy::ReasonCode;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `sqlwarden`.
///
/// Each pipeline stage defines its own variant. Library callers match on
/// these to decide recovery strategy; protocol glue layered on top can fold
/// its ad-hoc `anyhow::Result` chains in through the fallthrough variant.
/// Per-request errors are always recoverable; only [`WardenError::Config`]
/// is fatal, and only at startup.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Classification or policy denial. Nothing was executed.
    #[error("denied: {reason}")]
    Denied { reason: ReasonCode },

    // ── Two-phase confirmation ───────────────────────────────────────────
    #[error("token: {0}")]
    Token(#[from] TokenError),

    // ── Database execution ───────────────────────────────────────────────
    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("query exceeded the {limit_secs}s bound and was cancelled")]
    Timeout { limit_secs: u64 },

    // ── Startup ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Reason label recorded in the audit trail for this failure.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Denied { reason } => *reason,
            Self::Token(token_error) => token_error.reason(),
            Self::Timeout { .. } => ReasonCode::QueryTimeout,
            Self::Execution(_) | Self::Config(_) | Self::Other(_) => ReasonCode::ExecutionFailed,
        }
    }
}

// ─── Token errors ────────────────────────────────────────────────────────────

/// Why a confirmation was refused. Consumed and missing tokens are reported
/// identically so a caller cannot probe which tokens ever existed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("confirmation token not found or already consumed")]
    NotFound,

    #[error("confirmation token expired")]
    Expired,

    #[error("statement does not match the previewed statement")]
    StatementMismatch,
}

impl TokenError {
    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::NotFound => ReasonCode::TokenNotFound,
            Self::Expired => ReasonCode::TokenExpired,
            Self::StatementMismatch => ReasonCode::StatementMismatch,
        }
    }
}

// ─── Execution errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ──────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_displays_its_reason_code() {
        let err = WardenError::Denied {
            reason: ReasonCode::MissingFilter,
        };
        assert!(err.to_string().contains("MISSING_FILTER"));
    }

    #[test]
    fn token_errors_map_to_reason_codes() {
        assert_eq!(TokenError::NotFound.reason(), ReasonCode::TokenNotFound);
        assert_eq!(TokenError::Expired.reason(), ReasonCode::TokenExpired);
        assert_eq!(
            TokenError::StatementMismatch.reason(),
            ReasonCode::StatementMismatch
        );
    }

    #[test]
    fn timeout_displays_its_bound() {
        let err = WardenError::Timeout { limit_secs: 30 };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn config_error_displays_correctly() {
        let err = WardenError::Config(ConfigError::Validation("missing url".into()));
        assert!(err.to_string().contains("validation failed"));
    }
}
