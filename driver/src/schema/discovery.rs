//! Parallel schema discovery across tables.
//!
//! Concurrency is bounded by a semaphore; per-table work is de-duplicated
//! through a map of shared in-flight futures, so at most one sampling
//! operation per table runs at any moment no matter how many callers ask.
//! Entries leave the map when their work completes, succeed or fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::DriverError;
use crate::error::Result;
use crate::schema::metadata::ColumnMap;
use crate::schema::sampler::SchemaSampler;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

type SharedResult = std::result::Result<ColumnMap, Arc<DriverError>>;
type SharedDiscovery = Shared<BoxFuture<'static, SharedResult>>;

struct InFlight {
    future: SharedDiscovery,
    abort: AbortHandle,
}

pub struct ConcurrentDiscovery {
    sampler: Arc<SchemaSampler>,
    enabled: bool,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    cancel: CancellationToken,
}

impl ConcurrentDiscovery {
    pub fn new(
        sampler: Arc<SchemaSampler>,
        enabled: bool,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            sampler,
            enabled,
            timeout,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Discover one table, joining an in-flight discovery when present.
    pub async fn discover(&self, table: &str) -> Result<ColumnMap> {
        if !self.enabled {
            return match tokio::time::timeout(self.timeout, self.sampler.column_metadata(table))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(timeout_error(table, self.timeout)),
            };
        }

        let shared = self.join_or_spawn(table);
        shared.await.map_err(|error| DriverError::Discovery {
            table: table.to_string(),
            message: error.to_string(),
        })
    }

    /// Fan out discovery over `tables`. Per-table failures are logged and
    /// omitted from the result; the batch itself never fails.
    pub async fn discover_many(&self, tables: &[String]) -> HashMap<String, ColumnMap> {
        let lookups = tables.iter().map(|table| async move {
            (table.clone(), self.discover(table).await)
        });
        let mut discovered = HashMap::new();
        for (table, outcome) in futures::future::join_all(lookups).await {
            match outcome {
                Ok(columns) => {
                    discovered.insert(table, columns);
                }
                Err(error) => {
                    warn!(table, error = %error, "table omitted from batch discovery");
                }
            }
        }
        discovered
    }

    /// Abort the in-flight discovery for `table`, if any.
    pub fn cancel(&self, table: &str) {
        let removed = match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.remove(table),
            Err(_) => None,
        };
        if let Some(entry) = removed {
            debug!(table, "cancelling in-flight discovery");
            entry.abort.abort();
        }
    }

    /// How many discoveries are currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Cancel everything and wait (bounded) for in-flight work to drain;
    /// anything still running afterwards is aborted.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for (table, entry) in in_flight.drain() {
                warn!(table, "force-terminating discovery at shutdown");
                entry.abort.abort();
            }
        }
    }

    fn join_or_spawn(&self, table: &str) -> SharedDiscovery {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return ready_error(table, "discovery registry poisoned");
        };
        if let Some(existing) = in_flight.get(table) {
            debug!(table, "joining in-flight discovery");
            return existing.future.clone();
        }

        let sampler = self.sampler.clone();
        let semaphore = self.semaphore.clone();
        let registry = self.in_flight.clone();
        let cancel = self.cancel.clone();
        let timeout = self.timeout;
        let name = table.to_string();

        let task = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let result = if permit.is_err() || cancel.is_cancelled() {
                Err(cancelled_error(&name))
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => Err(cancelled_error(&name)),
                    outcome = tokio::time::timeout(timeout, sampler.column_metadata(&name)) => {
                        match outcome {
                            Ok(result) => result,
                            Err(_) => Err(timeout_error(&name, timeout)),
                        }
                    }
                }
            };
            if let Ok(mut in_flight) = registry.lock() {
                in_flight.remove(&name);
            }
            result.map_err(Arc::new)
        });

        let abort = task.abort_handle();
        let join_table = table.to_string();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(Arc::new(DriverError::Discovery {
                    table: join_table,
                    message: if join_error.is_cancelled() {
                        "discovery cancelled".to_string()
                    } else {
                        format!("discovery task panicked: {join_error}")
                    },
                })),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            table.to_string(),
            InFlight {
                future: future.clone(),
                abort,
            },
        );
        future
    }
}

fn cancelled_error(table: &str) -> DriverError {
    DriverError::Discovery {
        table: table.to_string(),
        message: "discovery cancelled".to_string(),
    }
}

fn timeout_error(table: &str, timeout: Duration) -> DriverError {
    DriverError::Discovery {
        table: table.to_string(),
        message: format!("discovery timed out after {}s", timeout.as_secs()),
    }
}

fn ready_error(table: &str, message: &str) -> SharedDiscovery {
    let error = Arc::new(DriverError::Discovery {
        table: table.to_string(),
        message: message.to_string(),
    });
    async move { Err(error) }.boxed().shared()
}
