//! Schema sampling: bounded scans that feed the type resolver.
//!
//! `AUTO` discovery works down a fallback chain: typed hints from the table
//! description first, then sampling, then metadata derived from declared
//! key attributes alone. Recoverable trouble mid-sample (throttling after
//! the retry budget, an empty table) degrades to partial or empty metadata;
//! a missing table or denied access bubbles up.

use std::sync::Arc;

use dynosql_client::DynamoTransport;
use dynosql_client::StatementRequest;
use dynosql_client::TableDescription;
use rand::Rng;
use tracing::debug;
use tracing::warn;

use crate::config::SampleStrategy;
use crate::config::SchemaConfig;
use crate::config::SchemaDiscoveryMode;
use crate::error::DriverError;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::schema::metadata::ColumnMap;
use crate::schema::metadata::ColumnMetadata;
use crate::schema::metadata::DiscoverySource;
use crate::schema::metadata::SqlType;
use crate::schema::metadata::TableSchemaBuilder;

/// Tables at least this many times larger than the sample get the random
/// strategy under `AUTO`.
const RANDOM_STRATEGY_RATIO: i64 = 10;
/// Random sampling splits the budget into this many scan segments.
const RANDOM_SEGMENTS: usize = 4;

pub struct SchemaSampler {
    transport: Arc<dyn DynamoTransport>,
    retry: RetryPolicy,
    config: SchemaConfig,
}

impl SchemaSampler {
    pub fn new(
        transport: Arc<dyn DynamoTransport>,
        retry: RetryPolicy,
        config: SchemaConfig,
    ) -> Self {
        Self {
            transport,
            retry,
            config,
        }
    }

    /// Column metadata for `table`, honoring the configured discovery mode.
    pub async fn column_metadata(&self, table: &str) -> Result<ColumnMap> {
        match self.config.discovery {
            SchemaDiscoveryMode::Disabled => Ok(ColumnMap::new()),
            SchemaDiscoveryMode::Hints => {
                let description = self.describe(table).await?;
                Ok(self.from_hints(table, &description))
            }
            SchemaDiscoveryMode::Sampling => self.from_sampling(table, None).await,
            SchemaDiscoveryMode::Auto => self.auto(table).await,
        }
    }

    async fn auto(&self, table: &str) -> Result<ColumnMap> {
        let description = self.describe(table).await?;

        let hinted = self.from_hints(table, &description);
        if !hinted.is_empty() {
            return Ok(hinted);
        }
        debug!(table, "no attribute definitions to hint from; sampling");
        let sampled = self.from_sampling(table, Some(&description)).await?;
        if !sampled.is_empty() {
            return Ok(sampled);
        }
        debug!(table, "sampling found nothing; falling back to key attributes");
        Ok(self.from_keys(table, &description))
    }

    /// Metadata from declared attribute definitions: every attribute that
    /// appears in the key schema of the table or any secondary index.
    fn from_hints(&self, table: &str, description: &TableDescription) -> ColumnMap {
        let mut columns = ColumnMap::new();
        for definition in &description.attribute_definitions {
            let mut metadata = ColumnMetadata::declared(
                table,
                definition.name.clone(),
                SqlType::from_scalar(definition.attribute_type),
                DiscoverySource::Hints,
            );
            if description
                .key_schema
                .iter()
                .any(|key| key.name == definition.name)
            {
                metadata.source = DiscoverySource::KeySchema;
            }
            columns.insert(definition.name.clone(), metadata);
        }
        columns
    }

    fn from_keys(&self, table: &str, description: &TableDescription) -> ColumnMap {
        let mut columns = ColumnMap::new();
        for key in &description.key_schema {
            let sql_type = description
                .attribute_type(&key.name)
                .map(SqlType::from_scalar)
                .unwrap_or(SqlType::Varchar);
            columns.insert(
                key.name.clone(),
                ColumnMetadata::declared(table, key.name.clone(), sql_type, DiscoverySource::KeySchema),
            );
        }
        columns
    }

    async fn from_sampling(
        &self,
        table: &str,
        description: Option<&TableDescription>,
    ) -> Result<ColumnMap> {
        let strategy = self.effective_strategy(description);
        let mut builder = TableSchemaBuilder::new(table, DiscoverySource::Sampling);
        let statement = format!("SELECT * FROM \"{table}\"");

        let outcome = match strategy {
            SampleStrategy::Sequential | SampleStrategy::Auto => {
                self.scan_into(&statement, self.config.sample_size, &mut builder, 0)
                    .await
            }
            SampleStrategy::Random => self.random_scan(&statement, &mut builder).await,
        };

        match outcome {
            Ok(()) => {}
            Err(error) if builder.items_observed() > 0 => {
                warn!(
                    table,
                    items = builder.items_observed(),
                    error = %error,
                    "sampling interrupted; returning partial metadata"
                );
            }
            Err(error @ (DriverError::Remote { .. } | DriverError::Validation { .. })) => {
                return Err(error);
            }
            Err(error) => {
                warn!(table, error = %error, "sampling failed; returning empty metadata");
            }
        }
        Ok(builder.finish())
    }

    /// Sequential scan of up to `budget` items, skipping `hop` pages
    /// between kept pages (0 keeps every page).
    async fn scan_into(
        &self,
        statement: &str,
        budget: usize,
        builder: &mut TableSchemaBuilder,
        hop: usize,
    ) -> Result<()> {
        let mut next_token: Option<String> = None;
        let mut remaining = budget;
        let mut skip = 0usize;
        while remaining > 0 {
            let request = StatementRequest::new(statement)
                .with_next_token(next_token.clone())
                .with_limit(Some(remaining.min(u32::MAX as usize) as u32));
            let page = self
                .retry
                .run("sample_scan", || {
                    self.transport.execute_statement(request.clone())
                })
                .await?;

            if skip == 0 {
                let kept = page.items.len().min(remaining);
                builder.observe_items(&page.items[..kept]);
                remaining -= kept;
                skip = hop;
            } else {
                skip -= 1;
            }

            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Segmented scan: several smaller sequential runs with random page
    /// hops in between, so the sample is not dominated by one key range.
    async fn random_scan(&self, statement: &str, builder: &mut TableSchemaBuilder) -> Result<()> {
        let per_segment = (self.config.sample_size / RANDOM_SEGMENTS).max(1);
        let hop = rand::rng().random_range(1..=3);
        self.scan_into(statement, per_segment * RANDOM_SEGMENTS, builder, hop)
            .await
    }

    fn effective_strategy(&self, description: Option<&TableDescription>) -> SampleStrategy {
        match self.config.sample_strategy {
            SampleStrategy::Auto => {
                let item_count = description.and_then(|d| d.item_count).unwrap_or(0);
                if item_count > self.config.sample_size as i64 * RANDOM_STRATEGY_RATIO {
                    SampleStrategy::Random
                } else {
                    SampleStrategy::Sequential
                }
            }
            configured => configured,
        }
    }

    async fn describe(&self, table: &str) -> Result<TableDescription> {
        self.retry
            .run("describe_table", || self.transport.describe_table(table))
            .await
    }
}
