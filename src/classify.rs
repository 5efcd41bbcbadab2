//! Lexical SQL statement classification.
//!
//! A lightweight scanner, not a parser: it reads just enough of the text to
//! name the statement kind, its target table, and the presence of a top-level
//! filter clause. Every ambiguity resolves toward the more restrictive
//! reading, so downstream policy can treat "can't tell" as "deny".

use serde::Serialize;

/// Statement categories the gateway distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Schema or privilege changes. Always denied downstream.
    Ddl,
    /// More than one statement in a single request.
    Multi,
    Unknown,
}

/// Lexical red flags collected while scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RiskFlags {
    /// First dangerous function referenced outside a string literal.
    pub forbidden_function: Option<String>,
    /// The text ends inside an unterminated literal or quoted identifier.
    pub unbalanced_quotes: bool,
    pub join_count: usize,
    pub union_count: usize,
}

/// Structured reading of one SQL request. Produced fresh per request,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub kind: StatementKind,
    /// Normalized (lowercased, quote-stripped) first table the statement
    /// touches, when one could be extracted.
    pub target_table: Option<String>,
    /// A `WHERE` was seen at parenthesis depth zero, outside literals and
    /// comments. Only meaningful for `Update` and `Delete`.
    pub has_filter_clause: bool,
    pub statement_count: usize,
    pub raw_text: String,
    pub risk: RiskFlags,
}

const DDL_KEYWORDS: &[&str] = &[
    "create", "alter", "drop", "truncate", "rename", "grant", "revoke",
];

/// Functions that reach the filesystem or the network, or stall the session.
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "pg_read_file",
    "pg_write_file",
    "pg_ls_dir",
    "pg_sleep",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
];

/// Words that may sit between a statement keyword and its table name
/// (conflict clauses, locking hints).
const TABLE_NOISE_WORDS: &[&str] = &[
    "only",
    "or",
    "rollback",
    "abort",
    "replace",
    "fail",
    "ignore",
    "low_priority",
    "quick",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    text: String,
    depth: usize,
    quoted: bool,
}

#[derive(Debug, Default)]
struct Scan {
    words: Vec<Word>,
    statement_count: usize,
    unterminated: bool,
}

/// Single pass over the text: skips comments and string literals, lowercases
/// word tokens, tracks parenthesis depth and statement boundaries.
fn scan(sql: &str) -> Scan {
    let chars: Vec<char> = sql.chars().collect();
    let mut scan = Scan::default();
    let mut depth = 0usize;
    let mut segment_has_content = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        if c == '\'' {
            segment_has_content = true;
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == '\'' {
                    // '' escapes a quote inside the literal
                    if chars.get(i + 1) == Some(&'\'') {
                        i += 2;
                        continue;
                    }
                    closed = true;
                    i += 1;
                    break;
                }
                i += 1;
            }
            if !closed {
                scan.unterminated = true;
            }
            continue;
        }

        if c == '"' || c == '`' {
            segment_has_content = true;
            let delim = c;
            i += 1;
            let mut ident = String::new();
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == delim {
                    if chars.get(i + 1) == Some(&delim) {
                        ident.push(delim);
                        i += 2;
                        continue;
                    }
                    closed = true;
                    i += 1;
                    break;
                }
                ident.push(chars[i]);
                i += 1;
            }
            if !closed {
                scan.unterminated = true;
            }
            if !ident.is_empty() {
                scan.words.push(Word {
                    text: ident.to_lowercase(),
                    depth,
                    quoted: true,
                });
            }
            continue;
        }

        match c {
            '(' => {
                depth += 1;
                segment_has_content = true;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                segment_has_content = true;
            }
            ';' => {
                if segment_has_content {
                    scan.statement_count += 1;
                    segment_has_content = false;
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect::<String>().to_lowercase();
                scan.words.push(Word {
                    text,
                    depth,
                    quoted: false,
                });
                segment_has_content = true;
                continue;
            }
            _ => {
                if !c.is_whitespace() {
                    segment_has_content = true;
                }
            }
        }
        i += 1;
    }

    if segment_has_content {
        scan.statement_count += 1;
    }
    scan
}

/// Classify one SQL request. Pure text inspection: never executes anything
/// and never fails; unrecognized input comes back as [`StatementKind::Unknown`].
#[must_use]
pub fn classify(sql: &str) -> Classification {
    let scan = scan(sql);

    let risk = RiskFlags {
        forbidden_function: scan.words.iter().filter(|w| !w.quoted).find_map(|w| {
            let tail = w.text.rsplit('.').next().unwrap_or(&w.text);
            FORBIDDEN_FUNCTIONS
                .iter()
                .find(|f| **f == tail)
                .map(|f| (*f).to_string())
        }),
        unbalanced_quotes: scan.unterminated,
        join_count: keyword_count(&scan, "join"),
        union_count: keyword_count(&scan, "union"),
    };

    let mut classification = Classification {
        kind: StatementKind::Unknown,
        target_table: None,
        has_filter_clause: false,
        statement_count: scan.statement_count,
        raw_text: sql.to_string(),
        risk,
    };

    // Stacked statements are never classified piecewise.
    if scan.statement_count > 1 {
        classification.kind = StatementKind::Multi;
        return classification;
    }

    let Some(first) = scan.words.first().filter(|w| !w.quoted) else {
        return classification;
    };

    classification.kind = match first.text.as_str() {
        "select" => StatementKind::Select,
        "insert" => StatementKind::Insert,
        "update" => StatementKind::Update,
        "delete" => StatementKind::Delete,
        "with" => kind_behind_cte(&scan),
        kw if DDL_KEYWORDS.contains(&kw) => StatementKind::Ddl,
        _ => StatementKind::Unknown,
    };

    classification.target_table = match classification.kind {
        StatementKind::Update => table_after(&scan, "update"),
        StatementKind::Insert => table_after(&scan, "into"),
        StatementKind::Delete | StatementKind::Select => table_after(&scan, "from"),
        _ => None,
    };

    if matches!(
        classification.kind,
        StatementKind::Update | StatementKind::Delete
    ) {
        classification.has_filter_clause = scan
            .words
            .iter()
            .any(|w| !w.quoted && w.depth == 0 && w.text == "where");
    }

    classification
}

/// A CTE prelude can wrap a write. Any embedded write keyword wins over
/// `SELECT`, so `WITH ... DELETE` classifies as a delete.
fn kind_behind_cte(scan: &Scan) -> StatementKind {
    for word in scan.words.iter().filter(|w| !w.quoted) {
        match word.text.as_str() {
            "insert" => return StatementKind::Insert,
            "update" => return StatementKind::Update,
            "delete" => return StatementKind::Delete,
            _ => {}
        }
    }
    if scan.words.iter().any(|w| !w.quoted && w.text == "select") {
        StatementKind::Select
    } else {
        StatementKind::Unknown
    }
}

/// The identifier following the first depth-zero `marker` keyword, skipping
/// conflict-clause noise. A marker whose operand sits inside parentheses
/// (derived table) yields `None`.
fn table_after(scan: &Scan, marker: &str) -> Option<String> {
    let position = scan
        .words
        .iter()
        .position(|w| !w.quoted && w.depth == 0 && w.text == marker)?;
    scan.words[position + 1..]
        .iter()
        .find(|w| w.quoted || !TABLE_NOISE_WORDS.contains(&w.text.as_str()))
        .filter(|w| w.depth == 0)
        .map(|w| w.text.clone())
}

fn keyword_count(scan: &Scan, keyword: &str) -> usize {
    scan.words
        .iter()
        .filter(|w| !w.quoted && w.text == keyword)
        .count()
}

/// Whether `keyword` appears at depth zero outside literals and comments.
/// Used by the session layer to decide whether a row cap still needs to be
/// injected.
pub(crate) fn has_top_level_keyword(sql: &str, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    scan(sql)
        .words
        .iter()
        .any(|w| !w.quoted && w.depth == 0 && w.text == keyword)
}

#[cfg(test)]
mod tests {
    use super::{StatementKind, classify, has_top_level_keyword};

    #[test]
    fn leading_keyword_decides_kind() {
        assert_eq!(classify("SELECT * FROM orders").kind, StatementKind::Select);
        assert_eq!(
            classify("insert into orders (id) values (1)").kind,
            StatementKind::Insert
        );
        assert_eq!(
            classify("UPDATE orders SET x = 1 WHERE id = 1").kind,
            StatementKind::Update
        );
        assert_eq!(
            classify("Delete From orders Where id = 1").kind,
            StatementKind::Delete
        );
    }

    #[test]
    fn schema_changes_classify_as_ddl() {
        for sql in [
            "CREATE TABLE t (id INTEGER)",
            "alter table t add column x",
            "DROP TABLE orders",
            "TRUNCATE orders",
            "GRANT ALL ON orders TO public",
        ] {
            assert_eq!(classify(sql).kind, StatementKind::Ddl, "{sql}");
        }
    }

    #[test]
    fn leading_comments_and_whitespace_are_skipped() {
        let c = classify("  -- cleanup\n  /* old rows */ DELETE FROM orders WHERE id = 1");
        assert_eq!(c.kind, StatementKind::Delete);
        assert_eq!(c.target_table.as_deref(), Some("orders"));
    }

    #[test]
    fn stacked_statements_are_multi() {
        let c = classify("SELECT 1; DELETE FROM orders");
        assert_eq!(c.kind, StatementKind::Multi);
        assert_eq!(c.statement_count, 2);
    }

    #[test]
    fn trailing_semicolon_is_a_single_statement() {
        let c = classify("SELECT 1;");
        assert_eq!(c.kind, StatementKind::Select);
        assert_eq!(c.statement_count, 1);
    }

    #[test]
    fn semicolon_inside_literal_does_not_split() {
        let c = classify("UPDATE t SET note = 'a; b' WHERE id = 1");
        assert_eq!(c.kind, StatementKind::Update);
        assert_eq!(c.statement_count, 1);
    }

    #[test]
    fn empty_and_garbage_input_are_unknown() {
        assert_eq!(classify("").kind, StatementKind::Unknown);
        assert_eq!(classify("   \n  ").kind, StatementKind::Unknown);
        assert_eq!(classify("-- nothing here").kind, StatementKind::Unknown);
        assert_eq!(classify("??!").kind, StatementKind::Unknown);
        assert_eq!(classify("EXPLAIN SELECT 1").kind, StatementKind::Unknown);
    }

    #[test]
    fn transaction_control_is_unknown() {
        assert_eq!(classify("BEGIN").kind, StatementKind::Unknown);
        assert_eq!(classify("COMMIT").kind, StatementKind::Unknown);
        assert_eq!(classify("CALL do_things()").kind, StatementKind::Unknown);
    }

    #[test]
    fn filter_clause_detected_at_top_level() {
        assert!(classify("DELETE FROM orders WHERE id = 1").has_filter_clause);
        assert!(classify("UPDATE orders SET x = 1 WHERE id IN (SELECT id FROM old)").has_filter_clause);
    }

    #[test]
    fn filter_inside_literal_or_comment_does_not_count() {
        assert!(!classify("UPDATE orders SET note = 'where needed'").has_filter_clause);
        assert!(!classify("DELETE FROM orders -- where id = 1").has_filter_clause);
        assert!(!classify("DELETE FROM orders /* where id = 1 */").has_filter_clause);
    }

    #[test]
    fn filter_only_inside_subquery_does_not_count() {
        let c = classify("DELETE FROM orders USING (SELECT id FROM old WHERE stale) s");
        assert!(!c.has_filter_clause);
    }

    #[test]
    fn target_table_extraction() {
        assert_eq!(
            classify("UPDATE orders SET x = 1 WHERE id = 1").target_table.as_deref(),
            Some("orders")
        );
        assert_eq!(
            classify("INSERT INTO public.orders (id) VALUES (1)").target_table.as_deref(),
            Some("public.orders")
        );
        assert_eq!(
            classify("DELETE FROM \"Orders\" WHERE id = 1").target_table.as_deref(),
            Some("orders")
        );
        assert_eq!(
            classify("SELECT * FROM customers c JOIN orders o ON o.cid = c.id")
                .target_table
                .as_deref(),
            Some("customers")
        );
        assert_eq!(classify("SELECT 1").target_table, None);
    }

    #[test]
    fn conflict_clause_noise_is_skipped() {
        assert_eq!(
            classify("UPDATE OR IGNORE orders SET x = 1 WHERE id = 1")
                .target_table
                .as_deref(),
            Some("orders")
        );
        assert_eq!(
            classify("INSERT OR REPLACE INTO orders (id) VALUES (1)")
                .target_table
                .as_deref(),
            Some("orders")
        );
    }

    #[test]
    fn derived_table_yields_no_target() {
        assert_eq!(classify("SELECT * FROM (SELECT 1)").target_table, None);
    }

    #[test]
    fn cte_wrapped_write_classifies_as_the_write() {
        let c = classify("WITH doomed AS (SELECT id FROM orders) DELETE FROM orders WHERE id IN (SELECT id FROM doomed)");
        assert_eq!(c.kind, StatementKind::Delete);
        assert!(c.has_filter_clause);
    }

    #[test]
    fn cte_wrapped_read_classifies_as_select() {
        let c = classify("WITH recent AS (SELECT * FROM orders) SELECT count(*) FROM recent");
        assert_eq!(c.kind, StatementKind::Select);
    }

    #[test]
    fn bare_cte_without_body_is_unknown() {
        assert_eq!(classify("WITH x AS (VALUES (1))").kind, StatementKind::Unknown);
    }

    #[test]
    fn forbidden_functions_are_flagged() {
        let c = classify("SELECT pg_sleep(10)");
        assert_eq!(c.risk.forbidden_function.as_deref(), Some("pg_sleep"));

        let qualified = classify("SELECT pg_catalog.pg_read_file('/etc/passwd')");
        assert_eq!(
            qualified.risk.forbidden_function.as_deref(),
            Some("pg_read_file")
        );
    }

    #[test]
    fn function_name_inside_literal_is_not_flagged() {
        let c = classify("SELECT * FROM docs WHERE body = 'mentions pg_sleep'");
        assert_eq!(c.risk.forbidden_function, None);
    }

    #[test]
    fn unbalanced_quote_is_flagged() {
        assert!(classify("SELECT * FROM t WHERE name = 'open").risk.unbalanced_quotes);
        assert!(!classify("SELECT 'it''s fine'").risk.unbalanced_quotes);
    }

    #[test]
    fn join_and_union_counts() {
        let c = classify("SELECT * FROM a JOIN b ON 1 LEFT JOIN c ON 1 UNION SELECT * FROM d");
        assert_eq!(c.risk.join_count, 2);
        assert_eq!(c.risk.union_count, 1);
    }

    #[test]
    fn top_level_keyword_probe() {
        assert!(has_top_level_keyword("SELECT 1 LIMIT 5", "limit"));
        assert!(!has_top_level_keyword("SELECT * FROM (SELECT 1 LIMIT 5)", "limit"));
        assert!(!has_top_level_keyword("SELECT 'limit'", "limit"));
    }
}
