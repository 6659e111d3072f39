//! Forward-only cursor over paged `ExecuteStatement` responses.
//!
//! DynamoDB knows nothing of `LIMIT`, `OFFSET`, `maxRows`, or `fetchSize`;
//! this stream re-imposes all four client-side while pulling pages through
//! the retry engine. Rows come out in exactly the order the service
//! returned them across pages. The cursor is single-owner: all mutation
//! happens through `&mut self` on one logical reader.
//!
//! Consumed pages stay in the buffer for the cursor's lifetime, which keeps
//! the exposed position `total_rows_fetched - buffer.len() + index + 1`
//! coherent (the buffer never shrinks).

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::Arc;

use dynosql_client::AttributeValue;
use dynosql_client::DynamoTransport;
use dynosql_client::Item;
use dynosql_client::Page;
use dynosql_client::StatementRequest;
use tracing::debug;
use tracing::trace;

use crate::error::DriverError;
use crate::error::Result;
use crate::offset_cache::OffsetTokenCache;
use crate::retry::RetryPolicy;
use crate::schema::TableKeyHint;

/// Construction parameters for [`PagedRows`].
///
/// `offset_remaining` and `base_position` arrive pre-split by
/// [`resolve_cached_offset`]: when an offset-cache hit lets the scan resume
/// mid-stream, `base_position` is the absolute position of the resume point
/// and `offset_remaining` is only the residual left to discard.
#[derive(Default)]
pub struct StreamParams {
    pub fetch_size: u32,
    pub limit: Option<u64>,
    pub offset_remaining: u64,
    pub base_position: u64,
    pub max_rows: u64,
    pub key_hint: Option<TableKeyHint>,
    pub offset_cache: Option<Arc<OffsetTokenCache>>,
}

/// Consult the offset cache for a resume point at or below `offset`.
///
/// Returns `(offset_remaining, base_position, resume_token)`. The result
/// never under-skips: the residual plus the cached position always equals
/// the requested offset.
pub fn resolve_cached_offset(
    cache: Option<&OffsetTokenCache>,
    sql: &str,
    offset: u64,
) -> (u64, u64, Option<String>) {
    if offset == 0 {
        return (0, 0, None);
    }
    let Some(hit) = cache.and_then(|cache| cache.get(sql, offset)) else {
        return (offset, 0, None);
    };
    if hit.position == 0 || hit.position > offset {
        return (offset, 0, None);
    }
    debug!(
        offset,
        resume_at = hit.position,
        residual = offset - hit.position,
        "offset cache shortcut"
    );
    (offset - hit.position, hit.position, Some(hit.token))
}

pub struct PagedRows {
    transport: Arc<dyn DynamoTransport>,
    retry: RetryPolicy,
    sql: String,
    buffer: Vec<Item>,
    /// Next buffer slot to consume.
    index: usize,
    current: Option<usize>,
    next_token: Option<String>,
    rows_returned: u64,
    total_rows_fetched: u64,
    offset_remaining: u64,
    base_position: u64,
    limit: Option<u64>,
    max_rows: u64,
    fetch_size: u32,
    key_hint: Option<TableKeyHint>,
    offset_cache: Option<Arc<OffsetTokenCache>>,
    columns: Option<Vec<String>>,
    done: bool,
    was_null: Cell<bool>,
}

impl PagedRows {
    pub fn new(
        transport: Arc<dyn DynamoTransport>,
        retry: RetryPolicy,
        sql: impl Into<String>,
        initial_page: Page,
        params: StreamParams,
    ) -> Self {
        let StreamParams {
            fetch_size,
            limit,
            offset_remaining,
            base_position,
            mut max_rows,
            key_hint,
            offset_cache,
        } = params;

        // Safety cap: an unbounded cursor (no SQL LIMIT, no maxRows)
        // driven by a fetch-size-only caller must never scan past one
        // fetch worth of rows. The cap never loosens once set.
        if limit.is_none() && max_rows == 0 && fetch_size > 0 {
            max_rows = u64::from(fetch_size);
        }

        let mut rows = Self {
            transport,
            retry,
            sql: sql.into(),
            buffer: Vec::new(),
            index: 0,
            current: None,
            next_token: None,
            rows_returned: 0,
            total_rows_fetched: 0,
            offset_remaining,
            base_position,
            limit,
            max_rows,
            fetch_size,
            key_hint,
            offset_cache,
            columns: None,
            done: false,
            was_null: Cell::new(false),
        };
        rows.absorb_page(initial_page);
        rows
    }

    /// Move to the next exposable row. `Ok(false)` means the cursor is
    /// terminal; it stays terminal on every later call.
    pub async fn advance(&mut self) -> Result<bool> {
        self.current = None;
        self.was_null.set(false);
        if self.done {
            return Ok(false);
        }
        loop {
            if self.reached_row_cap() {
                self.done = true;
                return Ok(false);
            }
            if self.index >= self.buffer.len() {
                if self.next_token.is_none() {
                    self.done = true;
                    return Ok(false);
                }
                self.fetch_next_page().await?;
                continue;
            }
            if self.offset_remaining > 0 {
                self.offset_remaining -= 1;
                self.index += 1;
                continue;
            }
            self.current = Some(self.index);
            self.index += 1;
            self.rows_returned += 1;
            return Ok(true);
        }
    }

    pub fn current_row(&self) -> Option<&Item> {
        self.current.and_then(|index| self.buffer.get(index))
    }

    /// 1-based position of the current row within this stream's fetches.
    pub fn current_position(&self) -> Option<u64> {
        let index = self.current? as u64;
        Some(self.total_rows_fetched - self.buffer.len() as u64 + index + 1)
    }

    /// Column names for `SELECT *` projection: partition key first, then
    /// sort key, then the remaining observed attributes lexicographically.
    pub fn columns(&mut self) -> &[String] {
        if self.columns.is_none() {
            self.columns = Some(self.resolve_columns());
        }
        self.columns.as_deref().unwrap_or_default()
    }

    pub fn value(&self, column: &str) -> Option<&AttributeValue> {
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
            Some(AttributeValue::N(number) | AttributeValue::S(number)) => number
                .parse()
                .map(Some)
                .map_err(|_| {
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

    pub fn get_f64(&self, column: &str) -> Result<Option<f64>> {
        match self.value(column) {
            None => Ok(None),
            Some(AttributeValue::N(number) | AttributeValue::S(number)) => number
                .parse()
                .map(Some)
                .map_err(|_| {
                    DriverError::validation(format!(
                        "column {column} value {number:?} is not a number"
                    ))
                }),
            Some(other) => Err(DriverError::validation(format!(
                "column {column} has tag {}, expected N",
                other.tag()
            ))),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<Option<bool>> {
        match self.value(column) {
            None => Ok(None),
            Some(AttributeValue::Bool(flag)) => Ok(Some(*flag)),
            Some(other) => Err(DriverError::validation(format!(
                "column {column} has tag {}, expected BOOL",
                other.tag()
            ))),
        }
    }

    pub fn get_bytes(&self, column: &str) -> Result<Option<Vec<u8>>> {
        match self.value(column) {
            None => Ok(None),
            Some(AttributeValue::B(bytes)) => Ok(Some(bytes.clone())),
            Some(other) => Err(DriverError::validation(format!(
                "column {column} has tag {}, expected B",
                other.tag()
            ))),
        }
    }

    /// Whether the most recent column access observed SQL NULL.
    pub fn was_null(&self) -> bool {
        self.was_null.get()
    }

    pub fn rows_returned(&self) -> u64 {
        self.rows_returned
    }

    pub fn total_rows_fetched(&self) -> u64 {
        self.total_rows_fetched
    }

    pub fn offset_remaining(&self) -> u64 {
        self.offset_remaining
    }

    pub fn is_terminal(&self) -> bool {
        self.done
    }

    pub fn key_hint(&self) -> Option<&TableKeyHint> {
        self.key_hint.as_ref()
    }

    pub fn sql(&self) -> &str {
        self.sql.as_str()
    }

    pub fn close(&mut self) {
        self.done = true;
        self.current = None;
    }

    /// Per-fetch limit: `min(remaining limit, remaining maxRows,
    /// fetchSize)` over whichever bounds exist.
    fn page_limit(&self) -> Option<u32> {
        let mut effective: Option<u64> = None;
        let mut consider = |candidate: u64| {
            effective = Some(effective.map_or(candidate, |current| current.min(candidate)));
        };
        if let Some(limit) = self.limit {
            consider(limit.saturating_sub(self.rows_returned));
        }
        if self.max_rows > 0 {
            consider(self.max_rows.saturating_sub(self.rows_returned));
        }
        if self.fetch_size > 0 {
            consider(u64::from(self.fetch_size));
        }
        effective.map(|value| value.clamp(1, u64::from(u32::MAX)) as u32)
    }

    fn reached_row_cap(&self) -> bool {
        if let Some(limit) = self.limit
            && self.rows_returned >= limit
        {
            return true;
        }
        self.max_rows > 0 && self.rows_returned >= self.max_rows
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        let request = StatementRequest::new(&self.sql)
            .with_next_token(self.next_token.clone())
            .with_limit(self.page_limit());
        trace!(limit = request.limit, "fetching next page");
        let page = self
            .retry
            .run("fetch_page", || {
                self.transport.execute_statement(request.clone())
            })
            .await?;
        self.absorb_page(page);
        Ok(())
    }

    fn absorb_page(&mut self, page: Page) {
        self.total_rows_fetched += page.items.len() as u64;
        self.buffer.extend(page.items);
        self.next_token = page.next_token.filter(|token| !token.is_empty());

        if let (Some(cache), Some(token)) = (&self.offset_cache, &self.next_token) {
            // Tokens are only meaningful at page boundaries, so that is the
            // only granularity the cache ever stores.
            let position = self.base_position + self.total_rows_fetched;
            if cache.should_cache(position) {
                cache.put(&self.sql, position, token.clone());
            }
        }
    }

    fn resolve_columns(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .buffer
            .iter()
            .flat_map(|item| item.keys().cloned())
            .collect();
        let mut ordered = Vec::new();
        if let Some(hint) = &self.key_hint {
            for key in [&hint.partition_key, &hint.sort_key] {
                if let Some(key) = key
                    && names.remove(key)
                {
                    ordered.push(key.clone());
                }
            }
        }
        ordered.extend(names);
        ordered
    }
}
