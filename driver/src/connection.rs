//! The connection object: owns the transport handle, the schema stack, the
//! offset cache, the executor, and per-connection state (warnings, open
//! transaction, batch queue).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dynosql_client::AwsTransport;
use dynosql_client::DynamoTransport;
use tracing::debug;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::error::DriverError;
use crate::error::Result;
use crate::error::SqlWarning;
use crate::error::Warnings;
use crate::executor::BatchError;
use crate::executor::BatchOutcome;
use crate::executor::QueryExecutor;
use crate::executor::QueryOptions;
use crate::offset_cache::OffsetTokenCache;
use crate::query;
use crate::query::ParamValue;
use crate::result::ResultSet;
use crate::schema::ColumnMap;
use crate::schema::ConcurrentDiscovery;
use crate::schema::LazySchemaLoader;
use crate::schema::SchemaCache;
use crate::schema::SchemaCacheStats;
use crate::schema::SchemaSampler;

pub struct Connection {
    transport: Arc<dyn DynamoTransport>,
    config: ConnectionConfig,
    executor: Arc<QueryExecutor>,
    schema_cache: Arc<SchemaCache>,
    discovery: Arc<ConcurrentDiscovery>,
    warnings: Warnings,
    transaction: Mutex<Option<Vec<String>>>,
    batch: Mutex<Vec<String>>,
    closed: AtomicBool,
    fetch_size: AtomicU32,
    max_rows: AtomicU64,
    created_at: Instant,
}

impl Connection {
    /// Open a connection from a `dynosql:` connection string.
    pub async fn connect(url: &str) -> Result<Self> {
        let config = ConnectionConfig::from_url(url)?;
        let transport = AwsTransport::connect(&config.aws_options())
            .await
            .map_err(|source| DriverError::Remote { source })?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Assemble a connection over an arbitrary transport. Must be called
    /// from within a tokio runtime; the schema cache spawns its
    /// maintenance tasks here.
    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn DynamoTransport>) -> Self {
        let sampler = Arc::new(SchemaSampler::new(
            transport.clone(),
            config.retry.clone(),
            config.schema.clone(),
        ));
        let discovery = Arc::new(ConcurrentDiscovery::new(
            sampler,
            config.schema.concurrent_discovery,
            config.schema.max_concurrent,
            config.schema.discovery_timeout,
        ));
        let loader = Arc::new(LazySchemaLoader::new(
            discovery.clone(),
            config.schema.lazy_strategy,
            config.schema.lazy_cache_ttl,
            config.schema.lazy_max_cache_size,
        ));
        let schema_cache = SchemaCache::new(loader, discovery.clone(), &config.schema);
        if tokio::runtime::Handle::try_current().is_ok() {
            schema_cache.start();
        }

        let offset_cache = config
            .offset_cache
            .enabled
            .then(|| Arc::new(OffsetTokenCache::new(config.offset_cache.clone())));
        let warnings = Warnings::new();
        let executor = QueryExecutor::new(
            transport.clone(),
            config.clone(),
            schema_cache.clone(),
            offset_cache,
            warnings.clone(),
        );

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint,
            "connection ready"
        );
        Self {
            transport,
            fetch_size: AtomicU32::new(config.fetch_size),
            max_rows: AtomicU64::new(config.max_rows),
            config,
            executor,
            schema_cache,
            discovery,
            warnings,
            transaction: Mutex::new(None),
            batch: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    pub async fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        self.execute_query_with(sql, false).await
    }

    /// `updatable` requests an updatable result set; the executor degrades
    /// to read-only (with a warning) when the statement does not qualify.
    pub async fn execute_query_with(&self, sql: &str, updatable: bool) -> Result<ResultSet> {
        self.ensure_open()?;
        let opts = QueryOptions {
            max_rows: self.max_rows.load(Ordering::Relaxed),
            fetch_size: self.fetch_size.load(Ordering::Relaxed),
            updatable,
        };
        self.executor.execute_query(sql, opts).await
    }

    /// Execute DML. Inside an open transaction the statement is only
    /// accumulated; it reaches the service at commit.
    pub async fn execute_update(&self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let rewritten = query::rewrite(sql)?;
        if !rewritten.kind.is_dml() {
            return Err(DriverError::validation(
                "execute_update requires a DML statement",
            ));
        }
        {
            let mut transaction = self.lock_transaction()?;
            if let Some(statements) = transaction.as_mut() {
                debug!(queued = statements.len() + 1, "statement added to open transaction");
                statements.push(rewritten.clean_sql);
                return Ok(1);
            }
        }
        self.executor.execute_update(sql).await
    }

    pub async fn execute_prepared_query(
        &self,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<ResultSet> {
        let substituted = query::substitute_params(sql, params)?;
        self.execute_query(&substituted).await
    }

    pub async fn execute_prepared_update(&self, sql: &str, params: &[ParamValue]) -> Result<u64> {
        let substituted = query::substitute_params(sql, params)?;
        self.execute_update(&substituted).await
    }

    /// Start accumulating DML for an atomic commit.
    pub fn begin_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        let mut transaction = self.lock_transaction()?;
        if transaction.is_some() {
            return Err(DriverError::Transaction {
                message: "a transaction is already open".to_string(),
            });
        }
        *transaction = Some(Vec::new());
        Ok(())
    }

    /// Commit the accumulated statements atomically.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let statements = self
            .lock_transaction()?
            .take()
            .ok_or_else(|| DriverError::Transaction {
                message: "no transaction is open".to_string(),
            })?;
        if statements.is_empty() {
            return Ok(());
        }
        self.executor.execute_transaction(statements).await
    }

    /// Discard the accumulated statements.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let discarded = self
            .lock_transaction()?
            .take()
            .ok_or_else(|| DriverError::Transaction {
                message: "no transaction is open".to_string(),
            })?;
        debug!(discarded = discarded.len(), "transaction rolled back");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.lock_transaction()
            .map(|transaction| transaction.is_some())
            .unwrap_or(false)
    }

    /// Queue one DML statement for batch execution.
    pub fn add_batch(&self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        let rewritten = query::rewrite(sql)?;
        if !rewritten.kind.is_dml() {
            return Err(DriverError::validation("batches accept DML only"));
        }
        if let Ok(mut batch) = self.batch.lock() {
            batch.push(sql.to_string());
        }
        Ok(())
    }

    pub fn clear_batch(&self) {
        if let Ok(mut batch) = self.batch.lock() {
            batch.clear();
        }
    }

    /// Flush the batch queue, reporting per-statement outcomes in
    /// submission order.
    pub async fn execute_batch(&self) -> std::result::Result<Vec<BatchOutcome>, BatchError> {
        if self.is_closed() {
            return Err(BatchError {
                outcomes: Vec::new(),
                failed: 0,
                submitted: 0,
            });
        }
        let statements: Vec<String> = match self.batch.lock() {
            Ok(mut batch) => batch.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        self.executor.execute_batch(&statements).await
    }

    pub async fn tables(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.executor.table_names().await
    }

    pub async fn columns(&self, table: &str) -> Result<ColumnMap> {
        self.ensure_open()?;
        self.schema_cache.column_metadata(table).await
    }

    pub async fn discover_many(
        &self,
        tables: &[String],
    ) -> std::collections::HashMap<String, ColumnMap> {
        self.discovery.discover_many(tables).await
    }

    pub fn warnings(&self) -> Vec<SqlWarning> {
        self.warnings.peek()
    }

    pub fn clear_warnings(&self) {
        self.warnings.clear();
    }

    pub fn schema_stats(&self) -> SchemaCacheStats {
        self.schema_cache.stats()
    }

    pub fn set_fetch_size(&self, fetch_size: u32) {
        self.fetch_size.store(fetch_size, Ordering::Relaxed);
    }

    pub fn fetch_size(&self) -> u32 {
        self.fetch_size.load(Ordering::Relaxed)
    }

    pub fn set_max_rows(&self, max_rows: u64) {
        self.max_rows.store(max_rows, Ordering::Relaxed);
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Liveness probe bounded by the configured validation timeout.
    pub async fn validate(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::time::timeout(self.config.pool.validation_timeout, self.transport.healthy())
            .await
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop background tasks and mark the connection unusable. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.schema_cache.shutdown();
        self.discovery.shutdown().await;
        debug!("connection closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(())
    }

    fn lock_transaction(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<String>>>> {
        self.transaction
            .lock()
            .map_err(|_| DriverError::Transaction {
                message: "transaction state poisoned".to_string(),
            })
    }
}
