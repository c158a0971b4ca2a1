use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlTaskError {
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Input deserialization error: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Bulk copy error: {0}")]
    BulkCopyError(String),

    #[error("Value conversion error: {0}")]
    ConversionError(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl SqlTaskError {
    /// True when the call was stopped by its cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<deadpool::managed::PoolError<tiberius::error::Error>> for SqlTaskError {
    fn from(err: deadpool::managed::PoolError<tiberius::error::Error>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(e) => {
                SqlTaskError::ConnectionError(format!("SQL Server connection error: {e}"))
            }
            other => SqlTaskError::PoolError(other.to_string()),
        }
    }
}
