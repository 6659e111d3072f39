//! Positional cache of continuation tokens.
//!
//! DynamoDB paginates with opaque tokens, so `OFFSET 10_000` would normally
//! mean fetching and discarding ten thousand rows on every call. While a
//! stream scans forward it records the token observed at page boundaries;
//! a later query with a large OFFSET starts from the nearest recorded
//! boundary at or below its target and discards only the residual.
//!
//! Positions are recorded at *page boundaries only*, never at exact row
//! offsets, and [`OffsetTokenCache::get`] rounds down accordingly. Tokens
//! from different SQL texts never mix: the cleaned SQL is the fingerprint.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

pub const DEFAULT_CACHE_SIZE: usize = 100;
pub const DEFAULT_CACHE_INTERVAL: u64 = 100;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCacheConfig {
    pub enabled: bool,
    /// Total entry budget across all fingerprints.
    pub size: usize,
    /// Record a token only every `interval` rows.
    pub interval: u64,
    pub ttl: Duration,
}

impl Default for OffsetCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: DEFAULT_CACHE_SIZE,
            interval: DEFAULT_CACHE_INTERVAL,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// A hit: the stream may resume from `token`, which points just past row
/// `position` of the fingerprinted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPosition {
    pub position: u64,
    pub token: String,
}

#[derive(Debug)]
struct TokenEntry {
    token: String,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    by_sql: HashMap<String, BTreeMap<u64, TokenEntry>>,
    count: usize,
}

#[derive(Debug)]
pub struct OffsetTokenCache {
    config: OffsetCacheConfig,
    inner: Mutex<CacheInner>,
}

impl OffsetTokenCache {
    pub fn new(config: OffsetCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Largest recorded `position <= target` for this SQL, skipping (and
    /// dropping) entries past their TTL.
    pub fn get(&self, sql: &str, target: u64) -> Option<CachedPosition> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock().ok()?;
        let mut expired = Vec::new();
        let mut hit = None;
        {
            let positions = inner.by_sql.get_mut(sql)?;
            for (&position, entry) in positions.range(..=target).rev() {
                if entry.inserted_at.elapsed() > self.config.ttl {
                    expired.push(position);
                    continue;
                }
                hit = Some(CachedPosition {
                    position,
                    token: entry.token.clone(),
                });
                break;
            }
            for position in &expired {
                positions.remove(position);
            }
            if positions.is_empty() {
                inner.by_sql.remove(sql);
            }
        }
        inner.count -= expired.len();
        hit
    }

    /// Whether a token observed at `position` is worth recording.
    pub fn should_cache(&self, position: u64) -> bool {
        self.config.enabled && position > 0 && position % self.config.interval == 0
    }

    pub fn put(&self, sql: &str, position: u64, token: String) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let entry = TokenEntry {
            token,
            inserted_at: Instant::now(),
        };
        let replaced = inner
            .by_sql
            .entry(sql.to_string())
            .or_default()
            .insert(position, entry);
        if replaced.is_none() {
            inner.count += 1;
        }
        if inner.count > self.config.size {
            Self::evict_oldest(&mut inner);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.by_sql.clear();
            inner.count = 0;
        }
    }

    fn evict_oldest(inner: &mut CacheInner) {
        let mut oldest: Option<(String, u64, Instant)> = None;
        for (sql, positions) in &inner.by_sql {
            for (&position, entry) in positions {
                let is_older = oldest
                    .as_ref()
                    .is_none_or(|(_, _, at)| entry.inserted_at < *at);
                if is_older {
                    oldest = Some((sql.clone(), position, entry.inserted_at));
                }
            }
        }
        if let Some((sql, position, _)) = oldest {
            debug!(position, "evicting oldest offset-token entry");
            if let Some(positions) = inner.by_sql.get_mut(&sql) {
                positions.remove(&position);
                inner.count -= 1;
                if positions.is_empty() {
                    inner.by_sql.remove(&sql);
                }
            }
        }
    }
}

impl Default for OffsetTokenCache {
    fn default() -> Self {
        Self::new(OffsetCacheConfig::default())
    }
}
