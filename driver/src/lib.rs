//! DynoSQL: a SQL-compatible client driver for Amazon DynamoDB.
//!
//! Callers speak SQL (PartiQL plus client-side `LIMIT`/`OFFSET`); the
//! driver speaks `ExecuteStatement`/`DescribeTable`/`ListTables` and
//! assembles relational-looking results on top: streaming forward cursors,
//! per-column type metadata inferred by sampling a schemaless store,
//! exponential-backoff retries, positional shortcuts for large offsets,
//! and a bounded connection pool.
//!
//! The main entry points are [`Connection`] for a single connection and
//! [`ConnectionPool`] for pooled use; both are configured through a
//! `dynosql:` connection string ([`ConnectionConfig`]).

mod config;
mod connection;
mod error;
mod executor;
mod info_schema;
mod offset_cache;
mod pool;
mod query;
mod result;
mod retry;
mod schema;
mod stream;
#[cfg(test)]
mod test_support;

pub use config::ConnectionConfig;
pub use config::LazyLoadingStrategy;
pub use config::SampleStrategy;
pub use config::SchemaConfig;
pub use config::SchemaDiscoveryMode;
pub use config::parse_connection_string;
pub use connection::Connection;
pub use error::DriverError;
pub use error::Result;
pub use error::SqlWarning;
pub use error::Warnings;
pub use executor::BatchError;
pub use executor::BatchOutcome;
pub use executor::QueryExecutor;
pub use executor::QueryOptions;
pub use info_schema::InfoSchemaQuery;
pub use info_schema::InfoSchemaView;
pub use offset_cache::CachedPosition;
pub use offset_cache::OffsetCacheConfig;
pub use offset_cache::OffsetTokenCache;
pub use pool::ConnectionFactory;
pub use pool::ConnectionPool;
pub use pool::PoolConfig;
pub use pool::PoolStatus;
pub use pool::PooledConnection;
pub use query::ParamValue;
pub use query::RewrittenQuery;
pub use query::StatementKind;
pub use query::rewrite;
pub use query::substitute_params;
pub use result::MemoryRows;
pub use result::ResultSet;
pub use result::UpdatableRows;
pub use retry::RetryMetricsSnapshot;
pub use retry::RetryPolicy;
pub use retry::retry_metrics;
pub use schema::ColumnMap;
pub use schema::ColumnMetadata;
pub use schema::ConcurrentDiscovery;
pub use schema::DiscoverySource;
pub use schema::LazySchemaLoader;
pub use schema::SchemaCache;
pub use schema::SchemaCacheStats;
pub use schema::SchemaSampler;
pub use schema::SqlType;
pub use schema::TableKeyHint;
pub use stream::PagedRows;
pub use stream::StreamParams;
pub use stream::resolve_cached_offset;
