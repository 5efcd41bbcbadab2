//! Layered admission policy over classified statements.
//!
//! The engine is an ordered list of pure predicates over a configuration
//! snapshot plus a [`Classification`]; the first failing rule terminates the
//! evaluation with its own reason code. There is no hidden fallthrough: a
//! statement that survives every rule is allowed.

use crate::classify::{Classification, StatementKind};
use crate::config::WardenConfig;
use serde::{Deserialize, Serialize};

/// Whether the caller is on the read path or the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

/// Machine-readable outcome labels, shared by verdicts, denials, and the
/// audit trail so a caller can report precisely why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Allowed,
    DdlForbidden,
    AmbiguousStatement,
    ModeMismatch,
    WriteDisabled,
    ForbiddenFunction,
    QueryTooLong,
    TooComplex,
    MissingFilter,
    TableNotWhitelisted,
    RowLimitExceeded,
    TokenNotFound,
    TokenExpired,
    StatementMismatch,
    ExecutionFailed,
    QueryTimeout,
}

/// Admission decision for one request.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub reason: ReasonCode,
    /// The statement text the verdict applies to (trimmed).
    pub statement: String,
    /// Execution-time row cap for allowed reads. The session layer enforces
    /// it; the policy only annotates.
    pub result_row_limit: Option<i64>,
}

impl PolicyVerdict {
    fn deny(reason: ReasonCode, statement: String) -> Self {
        Self {
            allowed: false,
            reason,
            statement,
            result_row_limit: None,
        }
    }
}

type Rule = fn(&Classification, &WardenConfig, AccessMode) -> Option<ReasonCode>;

/// Rule order is load-bearing: the first refusal wins, and DDL must lose to
/// nothing else.
const RULES: &[Rule] = &[
    ddl_is_always_denied,
    ambiguity_is_denied,
    mode_must_match,
    write_kill_switch,
    dangerous_functions_are_denied,
    length_is_bounded,
    read_complexity_is_bounded,
    writes_require_filter,
    write_table_must_be_listed,
];

/// Evaluate one classified statement against a configuration snapshot.
#[must_use]
pub fn evaluate(
    classification: &Classification,
    config: &WardenConfig,
    mode: AccessMode,
) -> PolicyVerdict {
    let statement = classification.raw_text.trim().to_string();

    for rule in RULES {
        if let Some(reason) = rule(classification, config, mode) {
            return PolicyVerdict::deny(reason, statement);
        }
    }

    let result_row_limit = (classification.kind == StatementKind::Select)
        .then_some(config.max_result_rows);

    PolicyVerdict {
        allowed: true,
        reason: ReasonCode::Allowed,
        statement,
        result_row_limit,
    }
}

fn ddl_is_always_denied(
    classification: &Classification,
    _config: &WardenConfig,
    _mode: AccessMode,
) -> Option<ReasonCode> {
    (classification.kind == StatementKind::Ddl).then_some(ReasonCode::DdlForbidden)
}

/// Stacked statements, unrecognized syntax, and unterminated literals are
/// all refused as a group: none of them can be classified with confidence.
fn ambiguity_is_denied(
    classification: &Classification,
    _config: &WardenConfig,
    _mode: AccessMode,
) -> Option<ReasonCode> {
    let ambiguous = matches!(
        classification.kind,
        StatementKind::Multi | StatementKind::Unknown
    ) || classification.risk.unbalanced_quotes;
    ambiguous.then_some(ReasonCode::AmbiguousStatement)
}

fn mode_must_match(
    classification: &Classification,
    _config: &WardenConfig,
    mode: AccessMode,
) -> Option<ReasonCode> {
    let mismatch = match mode {
        AccessMode::Write => classification.kind == StatementKind::Select,
        AccessMode::Read => classification.kind != StatementKind::Select,
    };
    mismatch.then_some(ReasonCode::ModeMismatch)
}

fn write_kill_switch(
    _classification: &Classification,
    config: &WardenConfig,
    mode: AccessMode,
) -> Option<ReasonCode> {
    (mode == AccessMode::Write && !config.write_enabled).then_some(ReasonCode::WriteDisabled)
}

fn dangerous_functions_are_denied(
    classification: &Classification,
    _config: &WardenConfig,
    _mode: AccessMode,
) -> Option<ReasonCode> {
    classification
        .risk
        .forbidden_function
        .is_some()
        .then_some(ReasonCode::ForbiddenFunction)
}

fn length_is_bounded(
    classification: &Classification,
    config: &WardenConfig,
    _mode: AccessMode,
) -> Option<ReasonCode> {
    (classification.raw_text.len() > config.max_query_length).then_some(ReasonCode::QueryTooLong)
}

fn read_complexity_is_bounded(
    classification: &Classification,
    config: &WardenConfig,
    mode: AccessMode,
) -> Option<ReasonCode> {
    (mode == AccessMode::Read
        && (classification.risk.join_count > config.max_joins
            || classification.risk.union_count > config.max_unions))
        .then_some(ReasonCode::TooComplex)
}

fn writes_require_filter(
    classification: &Classification,
    _config: &WardenConfig,
    _mode: AccessMode,
) -> Option<ReasonCode> {
    (matches!(
        classification.kind,
        StatementKind::Update | StatementKind::Delete
    ) && !classification.has_filter_clause)
        .then_some(ReasonCode::MissingFilter)
}

/// With a non-empty whitelist, a write whose target could not be extracted
/// is refused too: an unknown target cannot be proven writable.
fn write_table_must_be_listed(
    classification: &Classification,
    config: &WardenConfig,
    mode: AccessMode,
) -> Option<ReasonCode> {
    if mode != AccessMode::Write || config.writable_tables.is_empty() {
        return None;
    }
    match &classification.target_table {
        Some(table) if config.is_table_writable(table) => None,
        _ => Some(ReasonCode::TableNotWhitelisted),
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessMode, ReasonCode, evaluate};
    use crate::classify::classify;
    use crate::config::WardenConfig;

    fn write_config() -> WardenConfig {
        WardenConfig {
            write_enabled: true,
            ..WardenConfig::default()
        }
    }

    #[test]
    fn ddl_is_denied_even_with_writes_enabled() {
        let config = write_config();
        for sql in ["DROP TABLE orders", "CREATE INDEX i ON t (x)", "TRUNCATE t"] {
            for mode in [AccessMode::Read, AccessMode::Write] {
                let verdict = evaluate(&classify(sql), &config, mode);
                assert!(!verdict.allowed);
                assert_eq!(verdict.reason, ReasonCode::DdlForbidden, "{sql}");
            }
        }
    }

    #[test]
    fn multi_and_unknown_are_ambiguous() {
        let config = write_config();
        let multi = evaluate(
            &classify("DELETE FROM t WHERE id = 1; SELECT 1"),
            &config,
            AccessMode::Write,
        );
        assert_eq!(multi.reason, ReasonCode::AmbiguousStatement);

        let unknown = evaluate(&classify("VACUUM"), &config, AccessMode::Read);
        assert_eq!(unknown.reason, ReasonCode::AmbiguousStatement);

        let unbalanced = evaluate(
            &classify("SELECT * FROM t WHERE name = 'open"),
            &config,
            AccessMode::Read,
        );
        assert_eq!(unbalanced.reason, ReasonCode::AmbiguousStatement);
    }

    #[test]
    fn read_mode_rejects_writes_and_vice_versa() {
        let config = write_config();
        let read = evaluate(
            &classify("DELETE FROM orders WHERE id = 1"),
            &config,
            AccessMode::Read,
        );
        assert_eq!(read.reason, ReasonCode::ModeMismatch);

        let write = evaluate(&classify("SELECT 1"), &config, AccessMode::Write);
        assert_eq!(write.reason, ReasonCode::ModeMismatch);
    }

    #[test]
    fn kill_switch_denies_all_writes() {
        let config = WardenConfig::default();
        let verdict = evaluate(
            &classify("DELETE FROM orders WHERE id = 1"),
            &config,
            AccessMode::Write,
        );
        assert_eq!(verdict.reason, ReasonCode::WriteDisabled);
    }

    #[test]
    fn forbidden_function_is_denied_on_the_read_path() {
        let verdict = evaluate(
            &classify("SELECT pg_sleep(10)"),
            &write_config(),
            AccessMode::Read,
        );
        assert_eq!(verdict.reason, ReasonCode::ForbiddenFunction);
    }

    #[test]
    fn oversized_statement_is_denied() {
        let config = write_config();
        let sql = format!("SELECT '{}'", "x".repeat(config.max_query_length + 1));
        let verdict = evaluate(&classify(&sql), &config, AccessMode::Read);
        assert_eq!(verdict.reason, ReasonCode::QueryTooLong);
    }

    #[test]
    fn runaway_joins_are_denied_for_reads_only() {
        let mut config = write_config();
        config.max_joins = 1;
        let sql = "SELECT * FROM a JOIN b ON 1 JOIN c ON 1";
        let read = evaluate(&classify(sql), &config, AccessMode::Read);
        assert_eq!(read.reason, ReasonCode::TooComplex);
    }

    #[test]
    fn unfiltered_update_and_delete_are_denied() {
        let config = write_config();
        for sql in ["UPDATE orders SET x = 1", "DELETE FROM orders"] {
            let verdict = evaluate(&classify(sql), &config, AccessMode::Write);
            assert_eq!(verdict.reason, ReasonCode::MissingFilter, "{sql}");
        }
    }

    #[test]
    fn filtered_write_on_listed_table_is_allowed() {
        let mut config = write_config();
        config.writable_tables = vec!["orders".into()];
        let verdict = evaluate(
            &classify("DELETE FROM orders WHERE status = 'cancelled'"),
            &config,
            AccessMode::Write,
        );
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, ReasonCode::Allowed);
    }

    #[test]
    fn unlisted_table_is_denied() {
        let mut config = write_config();
        config.writable_tables = vec!["orders".into()];
        let verdict = evaluate(
            &classify("UPDATE customers SET name = 'x' WHERE id = 1"),
            &config,
            AccessMode::Write,
        );
        assert_eq!(verdict.reason, ReasonCode::TableNotWhitelisted);
    }

    #[test]
    fn schema_qualified_target_matches_bare_whitelist_entry() {
        let mut config = write_config();
        config.writable_tables = vec!["orders".into()];
        let verdict = evaluate(
            &classify("DELETE FROM public.orders WHERE id = 1"),
            &config,
            AccessMode::Write,
        );
        assert!(verdict.allowed);
    }

    #[test]
    fn empty_whitelist_means_all_tables() {
        let config = write_config();
        let verdict = evaluate(
            &classify("DELETE FROM anything WHERE id = 1"),
            &config,
            AccessMode::Write,
        );
        assert!(verdict.allowed);
    }

    #[test]
    fn insert_needs_no_filter_clause() {
        let config = write_config();
        let verdict = evaluate(
            &classify("INSERT INTO orders (id) VALUES (1)"),
            &config,
            AccessMode::Write,
        );
        assert!(verdict.allowed);
    }

    #[test]
    fn allowed_select_carries_the_result_cap() {
        let config = write_config();
        let verdict = evaluate(&classify("SELECT * FROM orders"), &config, AccessMode::Read);
        assert!(verdict.allowed);
        assert_eq!(verdict.result_row_limit, Some(config.max_result_rows));
    }

    #[test]
    fn reason_codes_render_as_screaming_snake() {
        assert_eq!(ReasonCode::DdlForbidden.to_string(), "DDL_FORBIDDEN");
        assert_eq!(
            ReasonCode::TableNotWhitelisted.to_string(),
            "TABLE_NOT_WHITELISTED"
        );
        assert_eq!(ReasonCode::RowLimitExceeded.to_string(), "ROW_LIMIT_EXCEEDED");
    }
}
