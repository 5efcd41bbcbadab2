//! Row decoding and read-cap injection for the read path.

use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// One fetched row as a column-name to JSON-value map.
pub type JsonRow = Map<String, Value>;

/// Decode a row without knowing its shape up front. BLOBs come back
/// hex-encoded; NUMERIC falls back to float.
pub(crate) fn row_to_json(row: &SqliteRow) -> Result<JsonRow, sqlx::Error> {
    let mut out = Map::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "NUMERIC" => Value::from(row.try_get::<f64, _>(index)?),
                "BOOLEAN" => Value::from(row.try_get::<bool, _>(index)?),
                "BLOB" => Value::from(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
                _ => Value::from(row.try_get::<String, _>(index)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Append a row cap when the statement carries no top-level `LIMIT` of its
/// own. One extra row is requested so the caller can tell a full page from a
/// truncated one.
pub(crate) fn ensure_row_limit(sql: &str, cap: i64) -> String {
    if crate::classify::has_top_level_keyword(sql, "limit") {
        return sql.to_string();
    }
    let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{trimmed} LIMIT {}", cap.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::ensure_row_limit;

    #[test]
    fn injects_a_cap_when_absent() {
        assert_eq!(
            ensure_row_limit("SELECT * FROM orders", 100),
            "SELECT * FROM orders LIMIT 101"
        );
    }

    #[test]
    fn strips_a_trailing_semicolon_first() {
        assert_eq!(
            ensure_row_limit("SELECT * FROM orders; ", 10),
            "SELECT * FROM orders LIMIT 11"
        );
    }

    #[test]
    fn keeps_an_existing_top_level_limit() {
        let sql = "SELECT * FROM orders LIMIT 5";
        assert_eq!(ensure_row_limit(sql, 100), sql);
    }

    #[test]
    fn limit_inside_a_subquery_does_not_count() {
        let sql = "SELECT * FROM (SELECT id FROM orders LIMIT 5)";
        assert_eq!(
            ensure_row_limit(sql, 100),
            format!("{sql} LIMIT 101")
        );
    }
}
