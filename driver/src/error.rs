use std::sync::Arc;
use std::sync::Mutex;

use dynosql_client::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Driver-level error taxonomy.
///
/// `Transient` means the retry engine already exhausted its budget on a
/// retryable failure; `Remote` is a permanent service-side rejection.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid request: {message}")]
    Validation { message: String },

    #[error("remote call failed after {attempts} attempt(s)")]
    Transient {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("remote service rejected the request")]
    Remote {
        #[source]
        source: TransportError,
    },

    #[error("schema discovery failed for table {table}: {message}")]
    Discovery { table: String, message: String },

    #[error("connection pool exhausted ({active} active of {total} total)")]
    PoolExhausted { active: usize, total: usize },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("transaction failure: {message}")]
    Transaction { message: String },

    #[error("unsupported operation: {message}")]
    Unsupported { message: String },
}

impl DriverError {
    pub fn validation(message: impl Into<String>) -> Self {
        DriverError::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        DriverError::Unsupported {
            message: message.into(),
        }
    }
}

/// A non-fatal condition chained onto the owning connection or statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlWarning {
    pub code: &'static str,
    pub message: String,
}

impl SqlWarning {
    pub fn large_offset(offset: u64, threshold: u64) -> Self {
        SqlWarning {
            code: "LARGE_OFFSET",
            message: format!(
                "OFFSET {offset} exceeds {threshold}; the driver must fetch and discard \
                 every skipped row unless an offset-token cache entry applies"
            ),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        SqlWarning {
            code: "QUERY",
            message: message.into(),
        }
    }
}

/// Shared warning sink. Execution never aborts on a warning; callers drain
/// accumulated warnings through the owning connection.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    inner: Arc<Mutex<Vec<SqlWarning>>>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, warning: SqlWarning) {
        if let Ok(mut warnings) = self.inner.lock() {
            warnings.push(warning);
        }
    }

    pub fn drain(&self) -> Vec<SqlWarning> {
        match self.inner.lock() {
            Ok(mut warnings) => warnings.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn peek(&self) -> Vec<SqlWarning> {
        match self.inner.lock() {
            Ok(warnings) => warnings.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut warnings) = self.inner.lock() {
            warnings.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|w| w.is_empty()).unwrap_or(true)
    }
}
