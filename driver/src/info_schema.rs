//! Recognition and synthesis of `information_schema` queries.
//!
//! These never reach the wire: the executor answers them from the schema
//! stack and DescribeTable, as in-memory result sets. Filtering is
//! equality-only, extracted from the statement text by pattern.

use std::sync::LazyLock;

use dynosql_client::AttributeValue;
use dynosql_client::Item;
use dynosql_client::TableDescription;
use regex_lite::Regex;

use crate::result::MemoryRows;
use crate::schema::ColumnMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoSchemaView {
    Tables,
    Columns,
    Indexes,
    IndexColumns,
}

/// A recognized metadata query with its extracted equality filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSchemaQuery {
    pub view: InfoSchemaView,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub index_name: Option<String>,
}

static VIEW: LazyLock<Regex> = LazyLock::new(|| {
    compiled(r"(?i)\binformation_schema\s*\.\s*(tables|columns|indexes|index_columns)\b")
});
static TABLE_FILTER: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\btable_name\s*=\s*'([^']*)'"));
static COLUMN_FILTER: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\bcolumn_name\s*=\s*'([^']*)'"));
static INDEX_FILTER: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\bindex_name\s*=\s*'([^']*)'"));

fn compiled(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => unreachable!("built-in pattern failed to compile: {err}"),
    }
}

/// Classify `sql` as an information-schema query, if it is one.
pub fn classify(sql: &str) -> Option<InfoSchemaQuery> {
    let caps = VIEW.captures(sql)?;
    let view = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "tables" => InfoSchemaView::Tables,
        "columns" => InfoSchemaView::Columns,
        "indexes" => InfoSchemaView::Indexes,
        "index_columns" => InfoSchemaView::IndexColumns,
        _ => return None,
    };
    Some(InfoSchemaQuery {
        view,
        table_name: extract(&TABLE_FILTER, sql),
        column_name: extract(&COLUMN_FILTER, sql),
        index_name: extract(&INDEX_FILTER, sql),
    })
}

fn extract(pattern: &Regex, sql: &str) -> Option<String> {
    pattern
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn s(text: impl Into<String>) -> AttributeValue {
    AttributeValue::S(text.into())
}

fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn tables_rows(table_names: &[String]) -> MemoryRows {
    let columns = vec!["table_name".to_string(), "table_type".to_string()];
    let rows = table_names
        .iter()
        .map(|name| {
            let mut row = Item::new();
            row.insert("table_name".to_string(), s(name.clone()));
            row.insert("table_type".to_string(), s("TABLE"));
            row
        })
        .collect();
    MemoryRows::new(columns, rows)
}

pub fn columns_rows(entries: &[(String, ColumnMap)], column_filter: Option<&str>) -> MemoryRows {
    let columns = vec![
        "table_name".to_string(),
        "column_name".to_string(),
        "data_type".to_string(),
        "is_nullable".to_string(),
        "column_size".to_string(),
        "decimal_digits".to_string(),
        "type_confidence".to_string(),
    ];
    let mut rows = Vec::new();
    for (table, column_map) in entries {
        for (name, metadata) in column_map {
            if let Some(filter) = column_filter
                && filter != name
            {
                continue;
            }
            let mut row = Item::new();
            row.insert("table_name".to_string(), s(table.clone()));
            row.insert("column_name".to_string(), s(name.clone()));
            row.insert("data_type".to_string(), s(metadata.type_name()));
            row.insert(
                "is_nullable".to_string(),
                s(if metadata.nullable() { "YES" } else { "NO" }),
            );
            row.insert("column_size".to_string(), n(metadata.column_size()));
            row.insert("decimal_digits".to_string(), n(metadata.decimal_digits()));
            row.insert(
                "type_confidence".to_string(),
                n(format!("{:.3}", metadata.type_confidence())),
            );
            rows.push(row);
        }
    }
    MemoryRows::new(columns, rows)
}

pub fn indexes_rows(descriptions: &[TableDescription], index_filter: Option<&str>) -> MemoryRows {
    let columns = vec![
        "table_name".to_string(),
        "index_name".to_string(),
        "index_type".to_string(),
    ];
    let mut rows = Vec::new();
    for description in descriptions {
        let mut push = |index_name: &str, index_type: &str| {
            if index_filter.is_some_and(|filter| filter != index_name) {
                return;
            }
            let mut row = Item::new();
            row.insert("table_name".to_string(), s(description.name.clone()));
            row.insert("index_name".to_string(), s(index_name));
            row.insert("index_type".to_string(), s(index_type));
            rows.push(row);
        };
        push("PRIMARY", "TABLE");
        for index in &description.secondary_indexes {
            push(&index.name, if index.global { "GSI" } else { "LSI" });
        }
    }
    MemoryRows::new(columns, rows)
}

pub fn index_columns_rows(
    descriptions: &[TableDescription],
    index_filter: Option<&str>,
    column_filter: Option<&str>,
) -> MemoryRows {
    let columns = vec![
        "table_name".to_string(),
        "index_name".to_string(),
        "column_name".to_string(),
        "key_role".to_string(),
        "ordinal_position".to_string(),
    ];
    let mut rows = Vec::new();
    for description in descriptions {
        let mut push = |index_name: &str, key_schema: &[dynosql_client::KeyElement]| {
            if index_filter.is_some_and(|filter| filter != index_name) {
                return;
            }
            for (ordinal, key) in key_schema.iter().enumerate() {
                if column_filter.is_some_and(|filter| filter != key.name) {
                    continue;
                }
                let mut row = Item::new();
                row.insert("table_name".to_string(), s(description.name.clone()));
                row.insert("index_name".to_string(), s(index_name));
                row.insert("column_name".to_string(), s(key.name.clone()));
                row.insert(
                    "key_role".to_string(),
                    s(match key.role {
                        dynosql_client::KeyRole::Hash => "HASH",
                        dynosql_client::KeyRole::Range => "RANGE",
                    }),
                );
                row.insert("ordinal_position".to_string(), n(ordinal + 1));
                rows.push(row);
            }
        };
        push("PRIMARY", &description.key_schema);
        for index in &description.secondary_indexes {
            push(&index.name, &index.key_schema);
        }
    }
    MemoryRows::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn recognizes_each_view() {
        for (sql, view) in [
            ("SELECT * FROM information_schema.tables", InfoSchemaView::Tables),
            (
                "select * from INFORMATION_SCHEMA.COLUMNS where table_name = 'users'",
                InfoSchemaView::Columns,
            ),
            (
                "SELECT * FROM information_schema.indexes",
                InfoSchemaView::Indexes,
            ),
            (
                "SELECT * FROM information_schema.index_columns",
                InfoSchemaView::IndexColumns,
            ),
        ] {
            assert_eq!(classify(sql).map(|q| q.view), Some(view), "for {sql}");
        }
        assert_eq!(classify("SELECT * FROM \"users\""), None);
    }

    #[test]
    fn extracts_equality_filters() {
        let query = classify(
            "SELECT * FROM information_schema.index_columns \
             WHERE table_name = 'users' AND index_name = 'byDate' AND column_name = 'id'",
        )
        .unwrap();
        assert_eq!(query.table_name.as_deref(), Some("users"));
        assert_eq!(query.index_name.as_deref(), Some("byDate"));
        assert_eq!(query.column_name.as_deref(), Some("id"));
    }

    #[test]
    fn tables_rows_expose_name_and_type() {
        let mut rows = tables_rows(&["a".to_string(), "b".to_string()]);
        assert!(rows.advance());
        assert_eq!(rows.get_string("table_name").unwrap().as_deref(), Some("a"));
        assert_eq!(rows.get_string("table_type").unwrap().as_deref(), Some("TABLE"));
    }
}
