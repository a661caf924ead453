use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a market data source.
///
/// Transient and rate-limited failures are retried by the fetch scheduler
/// up to the configured retry budget; only then do they become terminal,
/// per-symbol outcomes. A batch is never aborted by one of these.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("rate limited by upstream, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient fetch failure: {reason}")]
    Transient { reason: String },

    #[error("symbol not found: {symbol}")]
    NotFound { symbol: String },
}

/// Configuration problems. These fail fast at startup and are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: String },

    #[error("invalid signal weights: {reason}")]
    InvalidWeights { reason: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}
