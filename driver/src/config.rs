//! Connection-string parsing and driver configuration.
//!
//! A connection string looks like
//! `dynosql:region=us-east-1;schemaDiscovery=SAMPLING;pool.maxSize=8;`.
//! Unknown keys are ignored so callers can share property bags across
//! driver versions; malformed values fall back to their defaults with a
//! logged warning rather than failing the connection.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use dynosql_client::AwsCredentials;
use dynosql_client::AwsOptions;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::DriverError;
use crate::error::Result;
use crate::offset_cache::OffsetCacheConfig;
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;

pub const URL_PREFIX: &str = "dynosql:";

pub const DEFAULT_FETCH_SIZE: u32 = 100;
pub const DEFAULT_SAMPLE_SIZE: usize = 100;
pub const DEFAULT_SCHEMA_CACHE_TTL_SECS: u64 = 3_600;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LAZY_CACHE_TTL_SECS: u64 = 3_600;
pub const DEFAULT_LAZY_MAX_CACHE_SIZE: usize = 1_000;
pub const DEFAULT_OFFSET_WARN_THRESHOLD: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaDiscoveryMode {
    Auto,
    Hints,
    Sampling,
    Disabled,
}

impl FromStr for SchemaDiscoveryMode {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        match text.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(SchemaDiscoveryMode::Auto),
            "HINTS" => Ok(SchemaDiscoveryMode::Hints),
            "SAMPLING" => Ok(SchemaDiscoveryMode::Sampling),
            "DISABLED" => Ok(SchemaDiscoveryMode::Disabled),
            other => Err(format!("unknown schema discovery mode {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleStrategy {
    Random,
    Sequential,
    Auto,
}

impl FromStr for SampleStrategy {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        match text.to_ascii_uppercase().as_str() {
            "RANDOM" => Ok(SampleStrategy::Random),
            "SEQUENTIAL" => Ok(SampleStrategy::Sequential),
            "AUTO" => Ok(SampleStrategy::Auto),
            other => Err(format!("unknown sample strategy {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LazyLoadingStrategy {
    Immediate,
    Background,
    CachedOnly,
    Predictive,
}

impl FromStr for LazyLoadingStrategy {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        match text.to_ascii_uppercase().as_str() {
            "IMMEDIATE" => Ok(LazyLoadingStrategy::Immediate),
            "BACKGROUND" => Ok(LazyLoadingStrategy::Background),
            "CACHED_ONLY" | "CACHEDONLY" => Ok(LazyLoadingStrategy::CachedOnly),
            "PREDICTIVE" => Ok(LazyLoadingStrategy::Predictive),
            other => Err(format!("unknown lazy loading strategy {other}")),
        }
    }
}

/// Everything the schema stack needs: discovery mode, sampling policy, the
/// two cache layers, and concurrency bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConfig {
    pub discovery: SchemaDiscoveryMode,
    pub sample_size: usize,
    pub sample_strategy: SampleStrategy,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub refresh_interval: Duration,
    pub discovery_timeout: Duration,
    pub concurrent_discovery: bool,
    pub max_concurrent: usize,
    pub lazy_strategy: LazyLoadingStrategy,
    pub lazy_cache_ttl: Duration,
    pub lazy_max_cache_size: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            discovery: SchemaDiscoveryMode::Auto,
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_strategy: SampleStrategy::Auto,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(DEFAULT_SCHEMA_CACHE_TTL_SECS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            concurrent_discovery: true,
            max_concurrent: default_max_concurrent(),
            lazy_strategy: LazyLoadingStrategy::Immediate,
            lazy_cache_ttl: Duration::from_secs(DEFAULT_LAZY_CACHE_TTL_SECS),
            lazy_max_cache_size: DEFAULT_LAZY_MAX_CACHE_SIZE,
        }
    }
}

pub fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get() * 2)
        .unwrap_or(8)
}

/// Full driver configuration, assembled from a connection string or a
/// pre-parsed property map.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub credentials: AwsCredentials,
    pub api_call_timeout: Option<Duration>,
    pub api_call_attempt_timeout: Option<Duration>,
    pub fetch_size: u32,
    pub max_rows: u64,
    pub retry: RetryPolicy,
    pub schema: SchemaConfig,
    pub offset_cache: OffsetCacheConfig,
    pub offset_warn_threshold: u64,
    pub pool: PoolConfig,
    pub table_filter: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            credentials: AwsCredentials::Default,
            api_call_timeout: None,
            api_call_attempt_timeout: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: 0,
            retry: RetryPolicy::default(),
            schema: SchemaConfig::default(),
            offset_cache: OffsetCacheConfig::default(),
            offset_warn_threshold: DEFAULT_OFFSET_WARN_THRESHOLD,
            pool: PoolConfig::default(),
            table_filter: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_url(url: &str) -> Result<Self> {
        let properties = parse_connection_string(url)?;
        Ok(Self::from_properties(&properties))
    }

    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        config.region = props
            .get("region")
            .cloned()
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .or_else(|| std::env::var("AWS_REGION").ok());
        config.endpoint = props.get("endpoint").cloned();
        config.credentials = parse_credentials(props);
        config.api_call_timeout =
            optional(props, "apiCallTimeoutMs").map(Duration::from_millis);
        config.api_call_attempt_timeout =
            optional(props, "apiCallAttemptTimeoutMs").map(Duration::from_millis);

        config.fetch_size = parsed(props, "defaultFetchSize", DEFAULT_FETCH_SIZE);
        config.max_rows = parsed(props, "defaultMaxRows", 0u64);

        config.retry = RetryPolicy {
            max_attempts: parsed(props, "retryMaxAttempts", config.retry.max_attempts),
            base_delay: Duration::from_millis(parsed(
                props,
                "retryBaseDelayMs",
                config.retry.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(parsed(
                props,
                "retryMaxDelayMs",
                config.retry.max_delay.as_millis() as u64,
            )),
            jitter: parsed(props, "retryJitterEnabled", config.retry.jitter),
        };
        if config.retry.max_delay < config.retry.base_delay {
            warn!(
                base_ms = config.retry.base_delay.as_millis() as u64,
                max_ms = config.retry.max_delay.as_millis() as u64,
                "retryMaxDelayMs below retryBaseDelayMs; raising it to the base delay"
            );
            config.retry.max_delay = config.retry.base_delay;
        }

        let schema = &mut config.schema;
        schema.discovery = parsed(props, "schemaDiscovery", schema.discovery);
        schema.sample_size = parsed(props, "sampleSize", schema.sample_size);
        schema.sample_strategy = parsed(props, "sampleStrategy", schema.sample_strategy);
        schema.cache_enabled = parsed(props, "schemaCache", schema.cache_enabled);
        schema.cache_ttl = Duration::from_secs(parsed(
            props,
            "schemaCacheTTL",
            schema.cache_ttl.as_secs(),
        ));
        schema.refresh_interval = Duration::from_millis(parsed(
            props,
            "schemaCacheRefreshIntervalMs",
            schema.refresh_interval.as_millis() as u64,
        ));
        schema.concurrent_discovery =
            parsed(props, "concurrentSchemaDiscovery", schema.concurrent_discovery);
        schema.max_concurrent = parsed(
            props,
            "maxConcurrentSchemaDiscoveries",
            schema.max_concurrent,
        )
        .max(1);
        schema.lazy_strategy = parsed(props, "lazyLoadingStrategy", schema.lazy_strategy);
        if parsed(props, "predictiveSchemaLoading", false) {
            schema.lazy_strategy = LazyLoadingStrategy::Predictive;
        }
        schema.lazy_cache_ttl = Duration::from_secs(parsed(
            props,
            "lazyLoadingCacheTTL",
            schema.lazy_cache_ttl.as_secs(),
        ));
        schema.lazy_max_cache_size = parsed(
            props,
            "lazyLoadingMaxCacheSize",
            schema.lazy_max_cache_size,
        );

        config.offset_cache = OffsetCacheConfig {
            enabled: parsed(props, "offsetCacheEnabled", config.offset_cache.enabled),
            size: parsed(props, "offsetCacheSize", config.offset_cache.size),
            interval: parsed(props, "offsetCacheInterval", config.offset_cache.interval).max(1),
            ttl: Duration::from_secs(parsed(
                props,
                "offsetCacheTtlSeconds",
                config.offset_cache.ttl.as_secs(),
            )),
        };

        let pool = &mut config.pool;
        pool.min_size = parsed(props, "pool.minSize", pool.min_size);
        pool.max_size = parsed(props, "pool.maxSize", pool.max_size).max(1);
        pool.initial_size = parsed(props, "pool.initialSize", pool.initial_size);
        pool.idle_timeout = Duration::from_millis(parsed(
            props,
            "pool.idleTimeout",
            pool.idle_timeout.as_millis() as u64,
        ));
        pool.max_lifetime = Duration::from_millis(parsed(
            props,
            "pool.maxLifetime",
            pool.max_lifetime.as_millis() as u64,
        ));
        pool.test_on_borrow = parsed(props, "pool.testOnBorrow", pool.test_on_borrow);
        pool.test_on_return = parsed(props, "pool.testOnReturn", pool.test_on_return);
        pool.test_while_idle = parsed(props, "pool.testWhileIdle", pool.test_while_idle);

        config.table_filter = props.get("tableFilter").cloned();
        config
    }

    pub fn aws_options(&self) -> AwsOptions {
        AwsOptions {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            credentials: self.credentials.clone(),
            api_call_timeout: self.api_call_timeout,
            api_call_attempt_timeout: self.api_call_attempt_timeout,
        }
    }
}

/// Split `dynosql:k=v;k=v;` into a property map.
pub fn parse_connection_string(url: &str) -> Result<HashMap<String, String>> {
    let rest = url
        .strip_prefix(URL_PREFIX)
        .ok_or_else(|| DriverError::Validation {
            message: format!("connection string must start with {URL_PREFIX}"),
        })?;

    let mut properties = HashMap::new();
    for pair in rest.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                return Err(DriverError::Validation {
                    message: format!("malformed connection property {pair:?}, expected k=v"),
                });
            }
        }
    }
    Ok(properties)
}

fn parse_credentials(props: &HashMap<String, String>) -> AwsCredentials {
    match props
        .get("credentialsType")
        .map(|t| t.to_ascii_uppercase())
        .as_deref()
    {
        Some("STATIC") => {
            match (props.get("accessKey"), props.get("secretKey")) {
                (Some(access_key), Some(secret_key)) => AwsCredentials::Static {
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                    session_token: props.get("sessionToken").cloned(),
                },
                _ => {
                    warn!("credentialsType=STATIC without accessKey/secretKey; using default chain");
                    AwsCredentials::Default
                }
            }
        }
        Some("PROFILE") => match props.get("profileName") {
            Some(name) => AwsCredentials::Profile { name: name.clone() },
            None => {
                warn!("credentialsType=PROFILE without profileName; using default chain");
                AwsCredentials::Default
            }
        },
        Some("DEFAULT") | None => AwsCredentials::Default,
        Some(other) => {
            warn!(credentials_type = other, "unknown credentialsType; using default chain");
            AwsCredentials::Default
        }
    }
}

/// Parse an optional property, warning and falling back on malformed input.
fn parsed<T>(props: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match props.get(key) {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(err) => {
                warn!(key, value = raw.as_str(), %err, "malformed property; using default");
                default
            }
        },
    }
}

fn optional<T>(props: &HashMap<String, String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = props.get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = raw.as_str(), %err, "malformed property; ignoring");
            None
        }
    }
}
