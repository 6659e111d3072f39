use thiserror::Error;

/// Transport-level failure taxonomy.
///
/// The retry engine in the driver keys off [`TransportError::is_retryable`];
/// everything else about an error is carried along for diagnostics.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The service shed load: `ThrottlingException`,
    /// `ProvisionedThroughputExceededException`, `RequestLimitExceeded`, …
    #[error("throttled by service: {code}")]
    Throttled { code: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// A server-side fault the service itself labels transient.
    #[error("service internal error: {message}")]
    Internal { message: String },

    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("resource not found: {message}")]
    ResourceNotFound { message: String },

    /// The service rejected the request as malformed: PartiQL parse errors,
    /// `ValidationException`, condition-check failures.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("transaction canceled: {message}")]
    TransactionCanceled { message: String },

    /// Any other modeled service error, kept by code for diagnostics.
    #[error("service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("failed to build request: {0}")]
    Build(String),
}

impl TransportError {
    /// Whether the retry engine may re-issue the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Throttled { .. }
                | TransportError::Timeout
                | TransportError::Network(_)
                | TransportError::Internal { .. }
        )
    }

    pub fn is_throttling(&self) -> bool {
        matches!(self, TransportError::Throttled { .. })
    }
}
