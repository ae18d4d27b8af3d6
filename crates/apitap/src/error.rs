//! Error types for the telemetry agent.

/// Errors raised while constructing an agent.
///
/// These are the only errors the agent ever surfaces to the host
/// integrator; everything after construction degrades silently.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No application id was provided. The collector rejects anonymous
    /// traffic, so this is fatal at construction time.
    #[error("application id is required")]
    MissingApplicationId,

    /// The collector base URI override could not be parsed.
    #[error("invalid collector base uri: {0}")]
    InvalidBaseUri(String),

    /// The underlying HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Errors from calls to the collector service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector returned status {0}")]
    Status(u16),

    /// The collector response body could not be decoded.
    #[error("failed to decode collector response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result alias for collector calls.
pub type TransportResult<T> = Result<T, TransportError>;
