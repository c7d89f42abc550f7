use thiserror::Error;

/// Centralized error types for the dispatch core
///
/// Storage, decoding and configuration failures are converted to this enum so
/// callers (webhook handler, worker loop, CLI) can decide uniformly whether a
/// failure is fatal, retryable or merely logged.
///
/// # Example
///
/// ```no_run
/// use relaycore::error::AppError;
///
/// fn report(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Queue or lock backend errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Envelope (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// One-time session setup with the messaging provider failed
    #[error("Session setup error: {0}")]
    Session(String),

    /// A routed handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Unknown bot, malformed arguments and similar caller mistakes
    #[error("Validation error: {0}")]
    Validation(String),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(Box::new(err))
    }
}
