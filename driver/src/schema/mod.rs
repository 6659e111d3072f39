pub mod cache;
pub mod discovery;
pub mod lazy;
pub mod metadata;
pub mod sampler;

pub use cache::SchemaCache;
pub use cache::SchemaCacheStats;
pub use discovery::ConcurrentDiscovery;
pub use lazy::LazySchemaLoader;
pub use metadata::ColumnMap;
pub use metadata::ColumnMetadata;
pub use metadata::DiscoverySource;
pub use metadata::SqlType;
pub use metadata::TableKeyHint;
pub use metadata::TableSchemaBuilder;
pub use sampler::SchemaSampler;
