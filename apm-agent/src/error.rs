//! Error type shared by the collection core, its collectors and the config loader.

use thiserror::Error;

pub type ApmResult<T> = Result<T, ApmError>;

#[derive(Debug, Error)]
pub enum ApmError {
    /// Stopping a measure that was never started (or was already stopped).
    #[error("Failed stopping measure '{0}' because it hasn't been started")]
    MeasureNotStarted(String),

    #[error("Transaction '{0}' not found")]
    TransactionNotFound(String),

    #[error("Transaction '{0}' has already been started")]
    DuplicateTransaction(String),

    /// Raised only when strict transaction ordering is enabled.
    #[error("Cannot stop transaction '{expected}': the innermost open transaction is '{found}'")]
    TransactionOrder { expected: String, found: String },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ApmError {
    /// Whether this error points at misplaced instrumentation rather than an
    /// environment or export problem.
    pub fn is_instrumentation_error(&self) -> bool {
        matches!(
            self,
            ApmError::MeasureNotStarted(_)
                | ApmError::TransactionOrder { .. }
                | ApmError::DuplicateTransaction(_)
        )
    }
}
