//! Caller-facing schema cache with periodic background refresh.
//!
//! Two maps run in parallel: a basic one (resolved type per column, plus a
//! timestamp and a per-table `refreshing` flag) and an enhanced one holding
//! the full [`ColumnMap`]. A refresh task re-discovers every cached table
//! on an interval; a sweep task drops entries past their TTL. The
//! `refreshing` flag is a CAS gate, so two refreshes of the same table can
//! never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::config::SchemaConfig;
use crate::error::Result;
use crate::schema::discovery::ConcurrentDiscovery;
use crate::schema::lazy::LazySchemaLoader;
use crate::schema::metadata::ColumnMap;
use crate::schema::metadata::SqlType;

struct BasicEntry {
    column_types: HashMap<String, SqlType>,
    timestamp: Instant,
    refreshing: Arc<AtomicBool>,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemaCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub refreshes: u64,
    pub refresh_errors: u64,
}

pub struct SchemaCache {
    enabled: bool,
    ttl: Duration,
    refresh_interval: Duration,
    loader: Arc<LazySchemaLoader>,
    discovery: Arc<ConcurrentDiscovery>,
    basic: Mutex<HashMap<String, BasicEntry>>,
    enhanced: Mutex<HashMap<String, ColumnMap>>,
    stats: Stats,
    cancel: CancellationToken,
}

impl SchemaCache {
    pub fn new(
        loader: Arc<LazySchemaLoader>,
        discovery: Arc<ConcurrentDiscovery>,
        config: &SchemaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            enabled: config.cache_enabled,
            ttl: config.cache_ttl,
            refresh_interval: config.refresh_interval,
            loader,
            discovery,
            basic: Mutex::new(HashMap::new()),
            enhanced: Mutex::new(HashMap::new()),
            stats: Stats::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the refresh and expiration-sweep tasks. Idempotent callers
    /// should invoke this exactly once; a disabled cache spawns nothing.
    pub fn start(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }

        let refresher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(refresher.refresh_interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = refresher.cancel.cancelled() => return,
                    _ = ticks.tick() => refresher.refresh_all().await,
                }
            }
        });

        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let period = (sweeper.ttl / 4).max(Duration::from_millis(250));
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = sweeper.cancel.cancelled() => return,
                    _ = ticks.tick() => sweeper.sweep_expired(),
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Full column metadata for `table`: a cache hit when present and
    /// fresh, otherwise a synchronous detect-and-insert through the lazy
    /// loader. Pass-through when the cache is disabled.
    pub async fn column_metadata(&self, table: &str) -> Result<ColumnMap> {
        if !self.enabled {
            return self.loader.schema(table).await;
        }

        if let Some(columns) = self.lookup(table) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(columns);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let columns = self.loader.schema(table).await?;
        // An empty map usually means a Background-strategy miss that is
        // still being filled; caching it would pin the miss until TTL.
        if !columns.is_empty() {
            self.insert(table, &columns);
        }
        Ok(columns)
    }

    /// Resolved type per column, from the basic map.
    pub fn column_types(&self, table: &str) -> Option<HashMap<String, SqlType>> {
        let basic = self.basic.lock().ok()?;
        let entry = basic.get(table)?;
        (entry.timestamp.elapsed() < self.ttl).then(|| entry.column_types.clone())
    }

    pub fn cached_tables(&self) -> Vec<String> {
        self.basic
            .lock()
            .map(|basic| basic.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn invalidate(&self, table: &str) {
        if let Ok(mut basic) = self.basic.lock() {
            basic.remove(table);
        }
        if let Ok(mut enhanced) = self.enhanced.lock() {
            enhanced.remove(table);
        }
        self.loader.invalidate(table);
    }

    pub fn stats(&self) -> SchemaCacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        SchemaCacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            refreshes: self.stats.refreshes.load(Ordering::Relaxed),
            refresh_errors: self.stats.refresh_errors.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, table: &str) -> Option<ColumnMap> {
        let basic = self.basic.lock().ok()?;
        let entry = basic.get(table)?;
        if entry.timestamp.elapsed() >= self.ttl {
            return None;
        }
        drop(basic);
        let enhanced = self.enhanced.lock().ok()?;
        enhanced.get(table).cloned()
    }

    fn insert(&self, table: &str, columns: &ColumnMap) {
        let column_types = columns
            .iter()
            .map(|(name, metadata)| (name.clone(), metadata.resolved_type()))
            .collect();
        if let Ok(mut basic) = self.basic.lock() {
            let refreshing = basic
                .get(table)
                .map(|entry| Arc::clone(&entry.refreshing))
                .unwrap_or_default();
            basic.insert(
                table.to_string(),
                BasicEntry {
                    column_types,
                    timestamp: Instant::now(),
                    refreshing,
                },
            );
        }
        if let Ok(mut enhanced) = self.enhanced.lock() {
            enhanced.insert(table.to_string(), columns.clone());
        }
    }

    /// One refresh pass: every cached table whose `refreshing` CAS
    /// succeeds gets re-discovered and replaced.
    async fn refresh_all(&self) {
        let candidates: Vec<(String, Arc<AtomicBool>)> = match self.basic.lock() {
            Ok(basic) => basic
                .iter()
                .map(|(table, entry)| (table.clone(), Arc::clone(&entry.refreshing)))
                .collect(),
            Err(_) => return,
        };

        for (table, refreshing) in candidates {
            if refreshing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(table, "refresh already in progress; skipping");
                continue;
            }
            match self.discovery.discover(&table).await {
                Ok(columns) => {
                    self.insert(&table, &columns);
                    self.loader.store(&table, columns);
                    self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
                    debug!(table, "schema entry refreshed");
                }
                Err(error) => {
                    self.stats.refresh_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(table, error = %error, "schema refresh failed; keeping stale entry");
                }
            }
            refreshing.store(false, Ordering::Release);
        }
    }

    fn sweep_expired(&self) {
        let mut expired = Vec::new();
        if let Ok(mut basic) = self.basic.lock() {
            basic.retain(|table, entry| {
                let keep = entry.timestamp.elapsed() < self.ttl;
                if !keep {
                    expired.push(table.clone());
                }
                keep
            });
        }
        if expired.is_empty() {
            return;
        }
        debug!(count = expired.len(), "sweeping expired schema entries");
        if let Ok(mut enhanced) = self.enhanced.lock() {
            for table in &expired {
                enhanced.remove(table);
            }
        }
    }
}
