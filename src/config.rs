use std::env;
use std::time::Duration;

use crate::error::SqlTaskError;

/// Most rows a single multi-row `INSERT ... VALUES` may carry.
pub(crate) const MAX_STATEMENT_ROWS: usize = 1000;
/// Stay under SQL Server's 2100 parameter limit per RPC.
pub(crate) const MAX_STATEMENT_PARAMS: usize = 2000;

/// Process-level settings for [`SqlTasks`](crate::tasks::SqlTasks).
///
/// ```rust
/// use sql_tasks::TaskConfig;
/// use std::time::Duration;
///
/// let config = TaskConfig::default()
///     .with_pool_max_size(4)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(config.pool_max_size, 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Connections kept per distinct connection string.
    pub pool_max_size: usize,
    /// Bound on establishing a new connection; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Rows per statement on the statement bulk path (capped at 1000).
    pub bulk_chunk_rows: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            pool_max_size: 10,
            connect_timeout: Some(Duration::from_secs(30)),
            bulk_chunk_rows: MAX_STATEMENT_ROWS,
        }
    }
}

impl TaskConfig {
    pub const POOL_MAX_SIZE_VAR: &'static str = "SQL_TASKS_POOL_MAX_SIZE";
    pub const CONNECT_TIMEOUT_VAR: &'static str = "SQL_TASKS_CONNECT_TIMEOUT_SECS";
    pub const BULK_CHUNK_ROWS_VAR: &'static str = "SQL_TASKS_BULK_CHUNK_ROWS";

    #[must_use]
    pub fn with_pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    #[must_use]
    pub fn with_bulk_chunk_rows(mut self, rows: usize) -> Self {
        self.bulk_chunk_rows = rows.clamp(1, MAX_STATEMENT_ROWS);
        self
    }

    /// Defaults overridden by any of the `SQL_TASKS_*` environment variables that are set.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ConfigError` if a variable is set but not a non-negative integer.
    pub fn from_env() -> Result<Self, SqlTaskError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SqlTaskError> {
        let mut config = Self::default();
        if let Some(size) = parse_var(&lookup, Self::POOL_MAX_SIZE_VAR)? {
            config = config.with_pool_max_size(size);
        }
        if let Some(secs) = parse_var(&lookup, Self::CONNECT_TIMEOUT_VAR)? {
            config = config.with_connect_timeout(Duration::from_secs(secs as u64));
        }
        if let Some(rows) = parse_var(&lookup, Self::BULK_CHUNK_ROWS_VAR)? {
            config = config.with_bulk_chunk_rows(rows);
        }
        Ok(config)
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<usize>, SqlTaskError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|e| {
            SqlTaskError::ConfigError(format!("{key} must be a non-negative integer: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_environment_gives_defaults() {
        let config = TaskConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TaskConfig::default());
    }

    #[test]
    fn environment_overrides_and_clamps() {
        let config = TaskConfig::from_lookup(lookup(&[
            (TaskConfig::POOL_MAX_SIZE_VAR, "3"),
            (TaskConfig::CONNECT_TIMEOUT_VAR, "0"),
            (TaskConfig::BULK_CHUNK_ROWS_VAR, "5000"),
        ]))
        .unwrap();
        assert_eq!(config.pool_max_size, 3);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.bulk_chunk_rows, MAX_STATEMENT_ROWS);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err =
            TaskConfig::from_lookup(lookup(&[(TaskConfig::POOL_MAX_SIZE_VAR, "ten")])).unwrap_err();
        assert!(matches!(err, SqlTaskError::ConfigError(msg) if msg.contains("SQL_TASKS_POOL_MAX_SIZE")));
    }
}
