//! Lazy schema loading strategies over a TTL- and size-bounded cache.
//!
//! `Immediate` discovers synchronously on a miss. `Background` answers
//! empty right away and fills the cache from a spawned task. `CachedOnly`
//! never discovers. `Predictive` behaves like `Immediate` and additionally
//! preloads a few frequently-requested tables that are not cached yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use crate::config::LazyLoadingStrategy;
use crate::error::Result;
use crate::schema::discovery::ConcurrentDiscovery;
use crate::schema::metadata::ColumnMap;

/// Predictive preloading picks at most this many tables per trigger.
const PRELOAD_LIMIT: usize = 3;
/// A table qualifies for preloading once it has been asked for this often.
const PRELOAD_ACCESS_THRESHOLD: u64 = 5;

#[derive(Debug, Clone)]
struct CachedSchemaEntry {
    columns: ColumnMap,
    created_at: Instant,
    last_access_at: Instant,
}

pub struct LazySchemaLoader {
    discovery: Arc<ConcurrentDiscovery>,
    strategy: LazyLoadingStrategy,
    ttl: Duration,
    max_cache_size: usize,
    cache: Mutex<HashMap<String, CachedSchemaEntry>>,
    access_counts: Mutex<HashMap<String, u64>>,
}

impl LazySchemaLoader {
    pub fn new(
        discovery: Arc<ConcurrentDiscovery>,
        strategy: LazyLoadingStrategy,
        ttl: Duration,
        max_cache_size: usize,
    ) -> Self {
        Self {
            discovery,
            strategy,
            ttl,
            max_cache_size: max_cache_size.max(1),
            cache: Mutex::new(HashMap::new()),
            access_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Schema for `table` per the configured strategy. `Background` and
    /// `CachedOnly` return an empty map on a miss rather than blocking.
    pub async fn schema(self: &Arc<Self>, table: &str) -> Result<ColumnMap> {
        self.bump_access(table);

        if let Some(columns) = self.cached(table) {
            return Ok(columns);
        }

        match self.strategy {
            LazyLoadingStrategy::CachedOnly => Ok(ColumnMap::new()),
            LazyLoadingStrategy::Background => {
                let loader = Arc::clone(self);
                let name = table.to_string();
                tokio::spawn(async move {
                    if let Err(error) = loader.load_and_store(&name).await {
                        warn!(table = name, error = %error, "background schema load failed");
                    }
                });
                Ok(ColumnMap::new())
            }
            LazyLoadingStrategy::Immediate => self.load_and_store(table).await,
            LazyLoadingStrategy::Predictive => {
                let columns = self.load_and_store(table).await?;
                self.spawn_preload();
                Ok(columns)
            }
        }
    }

    /// Replace the cached entry for `table` without consulting the
    /// strategy; used by the refresh layer above.
    pub fn store(&self, table: &str, columns: ColumnMap) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        let now = Instant::now();
        cache.insert(
            table.to_string(),
            CachedSchemaEntry {
                columns,
                created_at: now,
                last_access_at: now,
            },
        );
        if cache.len() > self.max_cache_size {
            Self::evict_lru(&mut cache);
        }
    }

    pub fn invalidate(&self, table: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(table);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn cached_tables(&self) -> Vec<String> {
        self.cache
            .lock()
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn access_count(&self, table: &str) -> u64 {
        self.access_counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(table).copied())
            .unwrap_or(0)
    }

    fn cached(&self, table: &str) -> Option<ColumnMap> {
        let mut cache = self.cache.lock().ok()?;
        let entry = cache.get_mut(table)?;
        if entry.created_at.elapsed() >= self.ttl {
            cache.remove(table);
            return None;
        }
        entry.last_access_at = Instant::now();
        Some(entry.columns.clone())
    }

    async fn load_and_store(self: &Arc<Self>, table: &str) -> Result<ColumnMap> {
        let columns = self.discovery.discover(table).await?;
        self.store(table, columns.clone());
        Ok(columns)
    }

    fn bump_access(&self, table: &str) {
        if let Ok(mut counts) = self.access_counts.lock() {
            *counts.entry(table.to_string()).or_insert(0) += 1;
        }
    }

    /// Kick off speculative loads for the hottest uncached tables.
    fn spawn_preload(self: &Arc<Self>) {
        let candidates = self.preload_candidates();
        if candidates.is_empty() {
            return;
        }
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            for table in candidates {
                debug!(table, "predictively preloading schema");
                if let Err(error) = loader.load_and_store(&table).await {
                    warn!(table, error = %error, "predictive preload failed");
                }
            }
        });
    }

    fn preload_candidates(&self) -> Vec<String> {
        let Ok(counts) = self.access_counts.lock() else {
            return Vec::new();
        };
        let Ok(cache) = self.cache.lock() else {
            return Vec::new();
        };
        let mut hot: Vec<(&String, u64)> = counts
            .iter()
            .filter(|(table, count)| {
                **count >= PRELOAD_ACCESS_THRESHOLD && !cache.contains_key(*table)
            })
            .map(|(table, count)| (table, *count))
            .collect();
        hot.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        hot.into_iter()
            .take(PRELOAD_LIMIT)
            .map(|(table, _)| table.clone())
            .collect()
    }

    fn evict_lru(cache: &mut HashMap<String, CachedSchemaEntry>) {
        let oldest = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_access_at)
            .map(|(table, _)| table.clone());
        if let Some(table) = oldest {
            debug!(table, "evicting least-recently-used schema entry");
            cache.remove(&table);
        }
    }
}
