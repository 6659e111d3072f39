//! Query execution: ties the rewriter, retry engine, offset cache, result
//! stream, and schema stack together behind `execute_query` /
//! `execute_update`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use dynosql_client::DynamoTransport;
use dynosql_client::StatementRequest;
use dynosql_client::TableDescription;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::error::DriverError;
use crate::error::Result;
use crate::error::SqlWarning;
use crate::error::Warnings;
use crate::info_schema;
use crate::info_schema::InfoSchemaQuery;
use crate::info_schema::InfoSchemaView;
use crate::offset_cache::OffsetTokenCache;
use crate::query;
use crate::query::StatementKind;
use crate::result::ResultSet;
use crate::result::UpdatableRows;
use crate::schema::SchemaCache;
use crate::schema::TableKeyHint;
use crate::stream::PagedRows;
use crate::stream::StreamParams;
use crate::stream::resolve_cached_offset;

/// Per-call execution options, resolved by the owning connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub max_rows: u64,
    pub fetch_size: u32,
    pub updatable: bool,
}

/// Outcome of one statement in a batch, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Updated(u64),
    Failed,
}

/// The batch-failure signal: every per-item outcome is still carried.
#[derive(Debug, Error)]
#[error("batch execution failed ({failed} of {submitted} statements)")]
pub struct BatchError {
    pub outcomes: Vec<BatchOutcome>,
    pub failed: usize,
    pub submitted: usize,
}

pub struct QueryExecutor {
    transport: Arc<dyn DynamoTransport>,
    config: ConnectionConfig,
    schema: Arc<SchemaCache>,
    offset_cache: Option<Arc<OffsetTokenCache>>,
    warnings: Warnings,
    key_hints: Mutex<HashMap<String, Option<TableKeyHint>>>,
}

impl QueryExecutor {
    pub fn new(
        transport: Arc<dyn DynamoTransport>,
        config: ConnectionConfig,
        schema: Arc<SchemaCache>,
        offset_cache: Option<Arc<OffsetTokenCache>>,
        warnings: Warnings,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            schema,
            offset_cache,
            warnings,
            key_hints: Mutex::new(HashMap::new()),
        })
    }

    /// Run a read statement and wrap the response in a result set.
    pub async fn execute_query(self: &Arc<Self>, sql: &str, opts: QueryOptions) -> Result<ResultSet> {
        if let Some(meta_query) = info_schema::classify(sql) {
            debug!(view = ?meta_query.view, "answering information_schema query locally");
            return self.execute_info_schema(meta_query).await;
        }

        let rewritten = query::rewrite(sql)?;
        if rewritten.kind.is_dml() {
            return Err(DriverError::validation(
                "DML statements must go through execute_update",
            ));
        }
        if rewritten.index_rewrites > 0 {
            debug!(count = rewritten.index_rewrites, "normalized index syntax");
        }

        let offset = rewritten.offset.unwrap_or(0);
        if offset > self.config.offset_warn_threshold {
            self.warnings
                .push(SqlWarning::large_offset(offset, self.config.offset_warn_threshold));
        }

        // A fetch-size-only caller with no LIMIT gets capped at one fetch
        // worth of rows; mirror the stream's safety cap when sizing the
        // first page.
        let effective_max_rows =
            if rewritten.limit.is_none() && opts.max_rows == 0 && opts.fetch_size > 0 {
                u64::from(opts.fetch_size)
            } else {
                opts.max_rows
            };
        let initial_limit = initial_page_limit(rewritten.limit, effective_max_rows, opts.fetch_size);

        let (offset_remaining, base_position, resume_token) = resolve_cached_offset(
            self.offset_cache.as_deref(),
            &rewritten.clean_sql,
            offset,
        );

        let request = StatementRequest::new(&rewritten.clean_sql)
            .with_next_token(resume_token)
            .with_limit(initial_limit);
        let page = self
            .config
            .retry
            .run("execute_statement", || {
                self.transport.execute_statement(request.clone())
            })
            .await?;
        if let Some(units) = page.consumed_read_units {
            debug!(units, "consumed read capacity");
        }

        let table = query::table_name(&rewritten.clean_sql);
        let key_hint = match (&table, rewritten.kind) {
            (Some(table), StatementKind::Select) => self.key_hint(table).await,
            _ => None,
        };

        let rows = PagedRows::new(
            self.transport.clone(),
            self.config.retry.clone(),
            rewritten.clean_sql.clone(),
            page,
            StreamParams {
                fetch_size: opts.fetch_size,
                limit: rewritten.limit,
                offset_remaining,
                base_position,
                max_rows: opts.max_rows,
                key_hint: key_hint.clone(),
                offset_cache: self.offset_cache.clone(),
            },
        );

        if opts.updatable {
            if let (Some(table), Some(key)) = (table, key_hint)
                && key.partition_key.is_some()
                && query::is_simple_select(sql)
            {
                return Ok(ResultSet::Updatable(UpdatableRows::new(
                    rows,
                    Arc::clone(self),
                    table,
                    key,
                )));
            }
            self.warnings.push(SqlWarning::query(
                "updatable result set unavailable; falling back to read-only",
            ));
        }
        Ok(ResultSet::Paged(rows))
    }

    /// Run one DML statement directly (no transaction involvement).
    /// Returns 1 on success: the service does not report row counts.
    pub async fn execute_update(&self, sql: &str) -> Result<u64> {
        let rewritten = query::rewrite(sql)?;
        if !rewritten.kind.is_dml() {
            return Err(DriverError::validation(
                "execute_update requires a DML statement",
            ));
        }
        let request = StatementRequest::new(&rewritten.clean_sql);
        self.config
            .retry
            .run("execute_update", || {
                self.transport.execute_statement(request.clone())
            })
            .await?;
        Ok(1)
    }

    /// Run queued DML statements in submission order, reporting every
    /// outcome. Failures do not stop the batch; they fail it at the end.
    pub async fn execute_batch(
        &self,
        statements: &[String],
    ) -> std::result::Result<Vec<BatchOutcome>, BatchError> {
        let mut outcomes = Vec::with_capacity(statements.len());
        let mut failed = 0usize;
        for statement in statements {
            match self.execute_update(statement).await {
                Ok(count) => outcomes.push(BatchOutcome::Updated(count)),
                Err(error) => {
                    warn!(statement, error = %error, "batch statement failed");
                    outcomes.push(BatchOutcome::Failed);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(BatchError {
                submitted: outcomes.len(),
                outcomes,
                failed,
            });
        }
        Ok(outcomes)
    }

    /// Commit an accumulated transaction through the remote transactional
    /// API.
    pub async fn execute_transaction(&self, statements: Vec<String>) -> Result<()> {
        let count = statements.len();
        self.config
            .retry
            .run("execute_transaction", || {
                self.transport.execute_transaction(statements.clone())
            })
            .await
            .map_err(|error| match error {
                DriverError::Remote {
                    source: source @ dynosql_client::TransportError::TransactionCanceled { .. },
                } => DriverError::Transaction {
                    message: source.to_string(),
                },
                other => other,
            })?;
        info!(statements = count, "transaction committed");
        Ok(())
    }

    /// All visible table names, honoring the configured table filter.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let names = self
            .config
            .retry
            .run("list_tables", || self.transport.list_tables())
            .await?;
        Ok(match &self.config.table_filter {
            Some(filter) => names
                .into_iter()
                .filter(|name| wildcard_match(filter, name))
                .collect(),
            None => names,
        })
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    /// Partition/sort key names for a table; failures are memoized as
    /// `None` so a missing table is not re-described on every query.
    async fn key_hint(&self, table: &str) -> Option<TableKeyHint> {
        if let Ok(hints) = self.key_hints.lock()
            && let Some(cached) = hints.get(table)
        {
            return cached.clone();
        }
        let hint = match self.describe(table).await {
            Ok(description) => Some(TableKeyHint::from_description(&description)),
            Err(error) => {
                debug!(table, error = %error, "no key hint available");
                None
            }
        };
        if let Ok(mut hints) = self.key_hints.lock() {
            hints.insert(table.to_string(), hint.clone());
        }
        hint
    }

    async fn describe(&self, table: &str) -> Result<TableDescription> {
        self.config
            .retry
            .run("describe_table", || self.transport.describe_table(table))
            .await
    }

    async fn execute_info_schema(&self, meta_query: InfoSchemaQuery) -> Result<ResultSet> {
        let rows = match meta_query.view {
            InfoSchemaView::Tables => {
                let mut names = self.table_names().await?;
                if let Some(filter) = &meta_query.table_name {
                    names.retain(|name| name == filter);
                }
                info_schema::tables_rows(&names)
            }
            InfoSchemaView::Columns => {
                let tables = self.target_tables(&meta_query).await?;
                let mut entries = Vec::with_capacity(tables.len());
                for table in tables {
                    match self.schema.column_metadata(&table).await {
                        Ok(columns) => entries.push((table, columns)),
                        Err(error) => {
                            warn!(table, error = %error, "omitting table from column metadata");
                        }
                    }
                }
                info_schema::columns_rows(&entries, meta_query.column_name.as_deref())
            }
            InfoSchemaView::Indexes => {
                let descriptions = self.target_descriptions(&meta_query).await?;
                info_schema::indexes_rows(&descriptions, meta_query.index_name.as_deref())
            }
            InfoSchemaView::IndexColumns => {
                let descriptions = self.target_descriptions(&meta_query).await?;
                info_schema::index_columns_rows(
                    &descriptions,
                    meta_query.index_name.as_deref(),
                    meta_query.column_name.as_deref(),
                )
            }
        };
        Ok(ResultSet::Memory(rows))
    }

    async fn target_tables(&self, meta_query: &InfoSchemaQuery) -> Result<Vec<String>> {
        match &meta_query.table_name {
            Some(table) => Ok(vec![table.clone()]),
            None => self.table_names().await,
        }
    }

    async fn target_descriptions(
        &self,
        meta_query: &InfoSchemaQuery,
    ) -> Result<Vec<TableDescription>> {
        let tables = self.target_tables(meta_query).await?;
        let mut descriptions = Vec::with_capacity(tables.len());
        for table in tables {
            match self.describe(&table).await {
                Ok(description) => descriptions.push(description),
                Err(error) => {
                    // Metadata enumeration degrades gracefully.
                    warn!(table, error = %error, "omitting table from index metadata");
                }
            }
        }
        Ok(descriptions)
    }
}

/// First-page limit: SQL `LIMIT` bounds the whole result, `maxRows` bounds
/// the statement, `fetchSize` bounds the page; the wire gets the minimum.
fn initial_page_limit(limit: Option<u64>, max_rows: u64, fetch_size: u32) -> Option<u32> {
    let mut effective: Option<u64> = None;
    let mut consider = |candidate: u64| {
        effective = Some(effective.map_or(candidate, |current| current.min(candidate)));
    };
    if let Some(limit) = limit {
        consider(limit);
    }
    if max_rows > 0 {
        consider(max_rows);
    }
    if fetch_size > 0 {
        consider(u64::from(fetch_size));
    }
    effective.map(|value| value.clamp(1, u64::from(u32::MAX)) as u32)
}

/// `*`-wildcard match, the only pattern syntax `tableFilter` supports.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let first = segments[0];
    if !name.starts_with(first) {
        return false;
    }
    let mut rest = &name[first.len()..];
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(position) => rest = &rest[position + segment.len()..],
            None => return false,
        }
    }
    let last = segments[segments.len() - 1];
    last.is_empty() || rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::initial_page_limit;
    use super::wildcard_match;

    #[test]
    fn initial_limit_takes_the_tightest_bound() {
        assert_eq!(initial_page_limit(Some(3), 0, 2), Some(2));
        assert_eq!(initial_page_limit(Some(3), 10, 0), Some(3));
        assert_eq!(initial_page_limit(None, 7, 25), Some(7));
        assert_eq!(initial_page_limit(None, 0, 0), None);
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("prod_*", "prod_users"));
        assert!(!wildcard_match("prod_*", "dev_users"));
        assert!(wildcard_match("*_logs", "app_logs"));
        assert!(!wildcard_match("*_logs", "app_metrics"));
        assert!(wildcard_match("users", "users"));
        assert!(!wildcard_match("users", "users2"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*c", "abc"));
        assert!(!wildcard_match("a*c", "abd"));
    }
}
