//! SQL preprocessing ahead of the remote call.
//!
//! DynamoDB's PartiQL accepts neither `LIMIT` nor `OFFSET`, and spells
//! index access as `"table"."index"`. This module strips the former (the
//! stream re-imposes them client-side), normalizes the latter, and
//! classifies the statement so the executor can route it.

use std::sync::LazyLock;

use regex_lite::Captures;
use regex_lite::Regex;

use crate::error::DriverError;
use crate::error::Result;

pub const MAX_LIMIT: u64 = 1_000_000;
pub const MAX_OFFSET: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
    Replace,
    Other,
}

impl StatementKind {
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::Upsert
                | StatementKind::Replace
        )
    }
}

/// A statement ready for the wire, with the client-side clauses extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenQuery {
    pub clean_sql: String,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub kind: StatementKind,
    pub index_rewrites: u32,
}

static TRAILING_OFFSET_THEN_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?is)\s+OFFSET\s+(-?\d+)\s+LIMIT\s+(-?\d+)\s*;?\s*$"));
static TRAILING_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?is)\s+LIMIT\s+(-?\d+)(?:\s+OFFSET\s+(-?\d+))?\s*;?\s*$"));
static TRAILING_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?is)\s+OFFSET\s+(-?\d+)\s*;?\s*$"));
static DOTTED_INDEX: LazyLock<Regex> =
    LazyLock::new(|| compiled(r#"(?i)\b(FROM|JOIN)(\s+)"([^".]+)\.([^"]+)""#));
static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    compiled(r#"(?i)\b(?:FROM|INTO|UPDATE)\s+(?:"([^"]+)"|([A-Za-z_][A-Za-z0-9_.]*))"#)
});
static COMPLEX_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    compiled(r"(?i)\b(?:JOIN|GROUP\s+BY|UNION|HAVING)\b|\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(")
});

fn compiled(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => unreachable!("built-in pattern failed to compile: {err}"),
    }
}

/// Extract and strip trailing `LIMIT`/`OFFSET`, normalize dotted index
/// syntax, and classify the statement.
pub fn rewrite(sql: &str) -> Result<RewrittenQuery> {
    let kind = classify(sql);

    let mut limit = None;
    let mut offset = None;
    let mut clean = sql.trim_end().to_string();

    if let Some(caps) = TRAILING_OFFSET_THEN_LIMIT.captures(&clean) {
        offset = Some(parse_bound(&caps[1], "OFFSET", MAX_OFFSET)?);
        limit = Some(parse_bound(&caps[2], "LIMIT", MAX_LIMIT)?);
        clean = strip_match(&clean, &caps);
    } else if let Some(caps) = TRAILING_LIMIT.captures(&clean) {
        limit = Some(parse_bound(&caps[1], "LIMIT", MAX_LIMIT)?);
        if let Some(offset_text) = caps.get(2) {
            offset = Some(parse_bound(offset_text.as_str(), "OFFSET", MAX_OFFSET)?);
        }
        clean = strip_match(&clean, &caps);
    } else if let Some(caps) = TRAILING_OFFSET.captures(&clean) {
        offset = Some(parse_bound(&caps[1], "OFFSET", MAX_OFFSET)?);
        clean = strip_match(&clean, &caps);
    } else if let Some(stripped) = clean.strip_suffix(';') {
        clean = stripped.trim_end().to_string();
    }

    let mut index_rewrites = 0u32;
    let rewritten = DOTTED_INDEX.replace_all(&clean, |caps: &Captures| {
        index_rewrites += 1;
        let keyword = &caps[1];
        let spacing = &caps[2];
        let table = &caps[3];
        let index = &caps[4];
        if index.eq_ignore_ascii_case("PRIMARY") {
            // The primary index is the base table itself.
            format!("{keyword}{spacing}\"{table}\"")
        } else {
            format!("{keyword}{spacing}\"{table}\".\"{index}\"")
        }
    });

    Ok(RewrittenQuery {
        clean_sql: rewritten.into_owned(),
        limit,
        offset,
        kind,
        index_rewrites,
    })
}

/// First referenced table, for key-hint lookup and updatable result sets.
/// A dotted quoted name (`"table.index"`) resolves to its table part.
pub fn table_name(sql: &str) -> Option<String> {
    let caps = TABLE_REFERENCE.captures(sql)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())?;
    let table = raw.split('.').next().unwrap_or(raw);
    (!table.is_empty()).then(|| table.to_string())
}

/// Whether the statement is a plain single-table `SELECT`: no joins, no
/// grouping, no set operations, no aggregates. Only such statements are
/// eligible for updatable result sets.
pub fn is_simple_select(sql: &str) -> bool {
    classify(sql) == StatementKind::Select && !COMPLEX_SELECT.is_match(sql)
}

fn classify(sql: &str) -> StatementKind {
    match leading_keyword(sql).as_deref() {
        Some("SELECT") => StatementKind::Select,
        Some("INSERT") => StatementKind::Insert,
        Some("UPDATE") => StatementKind::Update,
        Some("DELETE") => StatementKind::Delete,
        Some("UPSERT") => StatementKind::Upsert,
        Some("REPLACE") => StatementKind::Replace,
        _ => StatementKind::Other,
    }
}

fn leading_keyword(sql: &str) -> Option<String> {
    let mut rest = sql.trim_start();
    while let Some(comment) = rest.strip_prefix("--") {
        rest = match comment.find('\n') {
            Some(end) => comment[end + 1..].trim_start(),
            None => "",
        };
    }
    let word: String = rest
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    (!word.is_empty()).then(|| word.to_ascii_uppercase())
}

fn strip_match(sql: &str, caps: &Captures) -> String {
    match caps.get(0) {
        Some(matched) => sql[..matched.start()].to_string(),
        None => sql.to_string(),
    }
}

fn parse_bound(text: &str, clause: &str, max: u64) -> Result<u64> {
    let value: i128 = text.parse().map_err(|_| DriverError::Validation {
        message: format!("{clause} value {text} is not a valid integer"),
    })?;
    if value < 0 {
        return Err(DriverError::Validation {
            message: format!("{clause} must not be negative: {value}"),
        });
    }
    if value as u128 > u128::from(max) {
        return Err(DriverError::Validation {
            message: format!("{clause} {value} exceeds the driver maximum of {max}"),
        });
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn strips_trailing_limit_and_offset() {
        let query = rewrite("SELECT * FROM \"t\" LIMIT 3 OFFSET 2").unwrap();
        assert_eq!(query.clean_sql, "SELECT * FROM \"t\"");
        assert_eq!(query.limit, Some(3));
        assert_eq!(query.offset, Some(2));
        assert_eq!(query.kind, StatementKind::Select);
    }

    #[test]
    fn accepts_offset_before_limit() {
        let query = rewrite("select * from \"t\" offset 10 limit 5;").unwrap();
        assert_eq!(query.clean_sql, "select * from \"t\"");
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, Some(10));
    }

    #[test]
    fn accepts_standalone_offset() {
        let query = rewrite("SELECT a FROM \"t\" OFFSET 7").unwrap();
        assert_eq!(query.clean_sql, "SELECT a FROM \"t\"");
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, Some(7));
    }

    #[test]
    fn extraction_round_trips_through_strip_and_reappend() {
        let original = "SELECT * FROM \"t\" WHERE a = 1 LIMIT 42 OFFSET 17";
        let first = rewrite(original).unwrap();
        let reappended = format!(
            "{} LIMIT {} OFFSET {}",
            first.clean_sql,
            first.limit.unwrap(),
            first.offset.unwrap()
        );
        let second = rewrite(&reappended).unwrap();
        assert_eq!(second.limit, first.limit);
        assert_eq!(second.offset, first.offset);
        assert_eq!(second.clean_sql, first.clean_sql);
    }

    #[test]
    fn rejects_negative_and_oversized_bounds() {
        assert_matches!(
            rewrite("SELECT * FROM \"t\" LIMIT -1"),
            Err(DriverError::Validation { .. })
        );
        assert_matches!(
            rewrite("SELECT * FROM \"t\" OFFSET -5"),
            Err(DriverError::Validation { .. })
        );
        assert_matches!(
            rewrite("SELECT * FROM \"t\" LIMIT 1000001"),
            Err(DriverError::Validation { .. })
        );
        assert_matches!(
            rewrite("SELECT * FROM \"t\" OFFSET 10000001"),
            Err(DriverError::Validation { .. })
        );
    }

    #[test]
    fn rewrites_dotted_index_to_qualified_form() {
        let query = rewrite("SELECT * FROM \"users.idx1\"").unwrap();
        assert_eq!(query.clean_sql, "SELECT * FROM \"users\".\"idx1\"");
        assert_eq!(query.index_rewrites, 1);
    }

    #[test]
    fn primary_pseudo_index_degrades_to_base_table() {
        let query = rewrite("SELECT * FROM \"users.PRIMARY\"").unwrap();
        assert_eq!(query.clean_sql, "SELECT * FROM \"users\"");
        assert_eq!(query.index_rewrites, 1);
    }

    #[test]
    fn join_clauses_get_the_same_rewrite() {
        let query =
            rewrite("SELECT * FROM \"a\" JOIN \"b.idx\" ON a.id = b.id").unwrap();
        assert_eq!(
            query.clean_sql,
            "SELECT * FROM \"a\" JOIN \"b\".\"idx\" ON a.id = b.id"
        );
    }

    #[test]
    fn classifies_dml_keywords() {
        for (sql, kind) in [
            ("INSERT INTO \"t\" VALUE {'a': 1}", StatementKind::Insert),
            ("update \"t\" set a = 1", StatementKind::Update),
            ("DELETE FROM \"t\" WHERE a = 1", StatementKind::Delete),
            ("UPSERT INTO \"t\" VALUE {'a': 1}", StatementKind::Upsert),
            ("REPLACE INTO \"t\" VALUE {'a': 1}", StatementKind::Replace),
            ("EXPLAIN SELECT 1", StatementKind::Other),
        ] {
            assert_eq!(rewrite(sql).unwrap().kind, kind, "for {sql}");
        }
    }

    #[test]
    fn classification_skips_line_comments() {
        let query = rewrite("-- leading note\n  SELECT * FROM \"t\"").unwrap();
        assert_eq!(query.kind, StatementKind::Select);
    }

    #[test]
    fn table_name_handles_quoted_bare_and_dotted_forms() {
        assert_eq!(
            table_name("SELECT * FROM \"orders\" WHERE x = 1"),
            Some("orders".to_string())
        );
        assert_eq!(table_name("SELECT * FROM items"), Some("items".to_string()));
        assert_eq!(
            table_name("SELECT * FROM \"orders.byDate\""),
            Some("orders".to_string())
        );
        assert_eq!(
            table_name("INSERT INTO \"orders\" VALUE {'id': 1}"),
            Some("orders".to_string())
        );
        assert_eq!(
            table_name("UPDATE \"orders\" SET a = 1"),
            Some("orders".to_string())
        );
        assert_eq!(table_name("VALUES (1)"), None);
    }

    #[test]
    fn simple_select_detection_excludes_aggregates_and_joins() {
        assert!(is_simple_select("SELECT * FROM \"t\" WHERE a = 1"));
        assert!(!is_simple_select("SELECT * FROM \"a\" JOIN \"b\" ON 1 = 1"));
        assert!(!is_simple_select("SELECT COUNT(*) FROM \"t\""));
        assert!(!is_simple_select("SELECT a FROM \"t\" GROUP BY a"));
        assert!(!is_simple_select("INSERT INTO \"t\" VALUE {'a': 1}"));
    }
}
