//! Error types for the stripe pool.

use thiserror::Error;

/// Boxed error carried by a [`TickError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unrecoverable failure reported by a stripe processor from a tick.
///
/// Returning this from [`TickableStripe::tick`](crate::TickableStripe::tick)
/// terminates the stripe's worker thread.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TickError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TickError {
    /// Create a tick error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a tick error wrapping an underlying error.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a stripe worker stopped before being asked to.
#[derive(Debug, Error)]
pub enum FailureKind {
    /// The processor returned an error from a tick.
    #[error("tick failed: {0}")]
    Tick(#[from] TickError),

    /// The processor panicked inside a tick.
    #[error("tick panicked: {0}")]
    Panic(String),
}

/// A stripe worker that terminated because its processor failed.
#[derive(Debug, Error)]
#[error("stripe {stripe}: {kind}")]
pub struct StripeFailure {
    /// Index of the failed stripe.
    pub stripe: usize,
    /// What went wrong.
    #[source]
    pub kind: FailureKind,
}

/// Stripe pool error type.
#[derive(Debug, Error)]
pub enum StripePoolError {
    /// The OS refused to spawn a stripe thread.
    #[error("failed to spawn thread for stripe {stripe}: {source}")]
    Spawn {
        stripe: usize,
        #[source]
        source: std::io::Error,
    },

    /// One or more stripes failed while the pool was running.
    #[error("{} stripe(s) failed", .0.len())]
    StripesFailed(Vec<StripeFailure>),
}

/// Result type for stripe pool operations.
pub type StripePoolResult<T> = Result<T, StripePoolError>;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON configuration.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
