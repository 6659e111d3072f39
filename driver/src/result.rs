//! The polymorphic result-set surface.
//!
//! Three origins share one forward-cursor contract: paged remote results,
//! in-memory rows synthesized for metadata queries, and an updatable
//! wrapper over a simple single-table `SELECT` that writes row edits back
//! through the executor.

use std::cell::Cell;
use std::sync::Arc;

use dynosql_client::AttributeValue;
use dynosql_client::Item;

use crate::error::DriverError;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::query::attribute_literal;
use crate::schema::TableKeyHint;
use crate::stream::PagedRows;

/// Fully materialized rows, used for information-schema answers.
#[derive(Debug)]
pub struct MemoryRows {
    columns: Vec<String>,
    rows: Vec<Item>,
    /// Index of the current row; `None` before the first `advance`.
    cursor: Option<usize>,
    done: bool,
    was_null: Cell<bool>,
}

impl MemoryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Item>) -> Self {
        Self {
            columns,
            rows,
            cursor: None,
            done: false,
            was_null: Cell::new(false),
        }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new())
    }

    pub fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        let next = self.cursor.map_or(0, |index| index + 1);
        if next >= self.rows.len() {
            self.cursor = None;
            self.done = true;
            return false;
        }
        self.cursor = Some(next);
        true
    }

    pub fn current_row(&self) -> Option<&Item> {
        self.cursor.and_then(|index| self.rows.get(index))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn close(&mut self) {
        self.cursor = None;
        self.done = true;
    }

    fn value(&self, column: &str) -> Option<&AttributeValue> {
        let value = self.current_row().and_then(|row| row.get(column));
        self.was_null
            .set(value.is_none_or(AttributeValue::is_null));
        value.filter(|value| !value.is_null())
    }

    pub fn get_string(&self, column: &str) -> Result<Option<String>> {
        match self.value(column) {
            None => Ok(None),
            Some(AttributeValue::S(text)) => Ok(Some(text.clone())),
            Some(AttributeValue::N(number)) => Ok(Some(number.clone())),
            Some(AttributeValue::Bool(flag)) => Ok(Some(flag.to_string())),
            Some(other) => Err(DriverError::validation(format!(
                "column {column} has tag {} and no string rendering",
                other.tag()
            ))),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.value(column) {
            None => Ok(None),
            Some(AttributeValue::N(number)) => number.parse().map(Some).map_err(|_| {
                DriverError::validation(format!(
                    "column {column} value {number:?} is not an integral number"
                ))
            }),
            Some(other) => Err(DriverError::validation(format!(
                "column {column} has tag {}, expected N",
                other.tag()
            ))),
        }
    }
}

/// Wraps a paged stream and synthesizes DML on write-back. Only built for
/// simple single-table selects with known primary-key metadata.
pub struct UpdatableRows {
    inner: PagedRows,
    executor: Arc<QueryExecutor>,
    table: String,
    key: TableKeyHint,
}

impl UpdatableRows {
    pub(crate) fn new(
        inner: PagedRows,
        executor: Arc<QueryExecutor>,
        table: String,
        key: TableKeyHint,
    ) -> Self {
        Self {
            inner,
            executor,
            table,
            key,
        }
    }

    pub async fn advance(&mut self) -> Result<bool> {
        self.inner.advance().await
    }

    pub fn rows(&self) -> &PagedRows {
        &self.inner
    }

    pub fn rows_mut(&mut self) -> &mut PagedRows {
        &mut self.inner
    }

    /// `UPDATE "t" SET … WHERE <key> = …` for the current row.
    pub async fn update_current(&mut self, changes: &[(String, AttributeValue)]) -> Result<u64> {
        if changes.is_empty() {
            return Err(DriverError::validation("no columns to update"));
        }
        let predicate = self.key_predicate()?;
        let mut statement = format!("UPDATE \"{}\"", self.table);
        for (column, value) in changes {
            statement.push_str(&format!(
                " SET \"{}\" = {}",
                column,
                attribute_literal(value)?
            ));
        }
        statement.push_str(&format!(" WHERE {predicate}"));
        self.executor.execute_update(&statement).await
    }

    /// `DELETE FROM "t" WHERE <key> = …` for the current row.
    pub async fn delete_current(&mut self) -> Result<u64> {
        let predicate = self.key_predicate()?;
        let statement = format!("DELETE FROM \"{}\" WHERE {predicate}", self.table);
        self.executor.execute_update(&statement).await
    }

    /// `INSERT INTO "t" VALUE {…}` for a caller-assembled row.
    pub async fn insert_row(&self, row: &Item) -> Result<u64> {
        let statement = format!(
            "INSERT INTO \"{}\" VALUE {}",
            self.table,
            attribute_literal(&AttributeValue::M(row.clone()))?
        );
        self.executor.execute_update(&statement).await
    }

    fn key_predicate(&self) -> Result<String> {
        let row = self
            .inner
            .current_row()
            .ok_or_else(|| DriverError::validation("cursor is not positioned on a row"))?;
        let mut clauses = Vec::new();
        for key in [&self.key.partition_key, &self.key.sort_key]
            .into_iter()
            .flatten()
        {
            let value = row.get(key).ok_or_else(|| {
                DriverError::validation(format!("current row is missing key attribute {key}"))
            })?;
            clauses.push(format!("\"{key}\" = {}", attribute_literal(value)?));
        }
        if clauses.is_empty() {
            return Err(DriverError::validation(
                "no primary-key metadata for write-back",
            ));
        }
        Ok(clauses.join(" AND "))
    }
}

/// A result set of any origin, exposing the shared cursor contract.
pub enum ResultSet {
    Paged(PagedRows),
    Memory(MemoryRows),
    Updatable(UpdatableRows),
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSet::Paged(_) => f.debug_tuple("Paged").finish(),
            ResultSet::Memory(rows) => f.debug_tuple("Memory").field(rows).finish(),
            ResultSet::Updatable(_) => f.debug_tuple("Updatable").finish(),
        }
    }
}

impl ResultSet {
    pub async fn advance(&mut self) -> Result<bool> {
        match self {
            ResultSet::Paged(rows) => rows.advance().await,
            ResultSet::Memory(rows) => Ok(rows.advance()),
            ResultSet::Updatable(rows) => rows.advance().await,
        }
    }

    pub fn current_row(&self) -> Option<&Item> {
        match self {
            ResultSet::Paged(rows) => rows.current_row(),
            ResultSet::Memory(rows) => rows.current_row(),
            ResultSet::Updatable(rows) => rows.rows().current_row(),
        }
    }

    pub fn columns(&mut self) -> Vec<String> {
        match self {
            ResultSet::Paged(rows) => rows.columns().to_vec(),
            ResultSet::Memory(rows) => rows.columns().to_vec(),
            ResultSet::Updatable(rows) => rows.rows_mut().columns().to_vec(),
        }
    }

    pub fn get_string(&self, column: &str) -> Result<Option<String>> {
        match self {
            ResultSet::Paged(rows) => rows.get_string(column),
            ResultSet::Memory(rows) => rows.get_string(column),
            ResultSet::Updatable(rows) => rows.rows().get_string(column),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<Option<i64>> {
        match self {
            ResultSet::Paged(rows) => rows.get_i64(column),
            ResultSet::Memory(rows) => rows.get_i64(column),
            ResultSet::Updatable(rows) => rows.rows().get_i64(column),
        }
    }

    /// Rows exposed so far; in-memory results count their cursor position.
    pub fn rows_returned(&self) -> u64 {
        match self {
            ResultSet::Paged(rows) => rows.rows_returned(),
            ResultSet::Memory(rows) => rows.cursor.map_or(0, |index| index as u64 + 1),
            ResultSet::Updatable(rows) => rows.rows().rows_returned(),
        }
    }

    pub fn as_updatable(&mut self) -> Option<&mut UpdatableRows> {
        match self {
            ResultSet::Updatable(rows) => Some(rows),
            _ => None,
        }
    }

    /// Make the cursor terminal; later `advance` calls return `false`.
    pub fn close(&mut self) {
        match self {
            ResultSet::Paged(rows) => rows.close(),
            ResultSet::Memory(rows) => rows.close(),
            ResultSet::Updatable(rows) => rows.rows_mut().close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use dynosql_client::AttributeValue;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::MemoryRows;

    #[test]
    fn memory_rows_iterate_in_insertion_order() {
        let mut rows = MemoryRows::new(
            vec!["table_name".to_string()],
            vec![
                hashmap! {"table_name".to_string() => AttributeValue::S("a".to_string())},
                hashmap! {"table_name".to_string() => AttributeValue::S("b".to_string())},
            ],
        );
        let mut seen = Vec::new();
        while rows.advance() {
            seen.push(rows.get_string("table_name").unwrap().unwrap());
        }
        assert_eq!(seen, vec!["a", "b"]);
        assert!(!rows.advance(), "terminal after exhaustion");
    }

    #[test]
    fn memory_rows_report_null_for_absent_columns() {
        let mut rows = MemoryRows::new(
            vec!["a".to_string(), "b".to_string()],
            vec![hashmap! {"a".to_string() => AttributeValue::N("1".to_string())}],
        );
        assert!(rows.advance());
        assert_eq!(rows.get_string("b").unwrap(), None);
        assert_eq!(rows.get_i64("a").unwrap(), Some(1));
    }
}
