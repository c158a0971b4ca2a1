use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use super::client::connect;
use crate::config::TaskConfig;
use crate::conversion::SESSION_DEFAULT_ISOLATION;
use crate::error::SqlTaskError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Pool of connections sharing one connection string.
pub type MssqlPool = Pool<MssqlManager>;

/// Deadpool manager for one SQL Server connection string.
#[derive(Clone)]
pub struct MssqlManager {
    config: tiberius::Config,
    connect_timeout: Option<std::time::Duration>,
}

impl fmt::Debug for MssqlManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlManager")
            .field("addr", &self.config.get_addr())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl MssqlManager {
    /// Parse an ADO.NET style connection string into a manager.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ConfigError` if the connection string cannot be parsed.
    pub fn from_connection_string(
        connection_string: &str,
        task_config: &TaskConfig,
    ) -> Result<Self, SqlTaskError> {
        let config = tiberius::Config::from_ado_string(connection_string)
            .map_err(|e| SqlTaskError::ConfigError(format!("Invalid connection string: {e}")))?;
        Ok(Self {
            config,
            connect_timeout: task_config.connect_timeout,
        })
    }
}

impl Manager for MssqlManager {
    type Type = MssqlClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let connecting = connect(self.config.clone());
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| {
                tiberius::error::Error::Io {
                    kind: std::io::ErrorKind::TimedOut,
                    message: format!("connecting took longer than {}s", limit.as_secs()),
                }
            })?,
            None => connecting.await,
        }
    }

    async fn recycle(&self, client: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        // Undo whatever a dropped call left behind on the session.
        let reset = format!("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; {SESSION_DEFAULT_ISOLATION}");
        match client.simple_query(reset).await {
            Ok(stream) => stream.into_results().await.map(|_| ()).map_err(RecycleError::Backend),
            Err(e) => Err(RecycleError::Backend(e)),
        }
    }
}

/// Registry of pools, one per distinct connection string.
pub struct ConnectionPools {
    config: TaskConfig,
    pools: Mutex<HashMap<String, MssqlPool>>,
}

impl fmt::Debug for ConnectionPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.pools.lock().map(|p| p.len()).unwrap_or_default();
        f.debug_struct("ConnectionPools")
            .field("config", &self.config)
            .field("pools", &count)
            .finish()
    }
}

impl ConnectionPools {
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Pool for `connection_string`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ConfigError` for an unparsable connection string and
    /// `SqlTaskError::PoolError` if the pool cannot be built.
    pub fn pool_for(&self, connection_string: &str) -> Result<MssqlPool, SqlTaskError> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| SqlTaskError::PoolError("connection pool registry poisoned".into()))?;
        if let Some(pool) = pools.get(connection_string) {
            return Ok(pool.clone());
        }

        let manager = MssqlManager::from_connection_string(connection_string, &self.config)?;
        let pool = Pool::builder(manager)
            .max_size(self.config.pool_max_size)
            .build()
            .map_err(|e| SqlTaskError::PoolError(format!("Failed to create SQL Server pool: {e}")))?;
        tracing::debug!(max_size = self.config.pool_max_size, "created SQL Server connection pool");
        pools.insert(connection_string.to_string(), pool.clone());
        Ok(pool)
    }

    /// Close and forget every pool.
    pub fn clear(&self) {
        if let Ok(mut pools) = self.pools.lock() {
            for (_, pool) in pools.drain() {
                pool.close();
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().map(|p| p.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_shared_per_connection_string() {
        let pools = ConnectionPools::new(TaskConfig::default().with_pool_max_size(2));
        let a = "Server=tcp:localhost,1433;User Id=sa;Password=x;TrustServerCertificate=true";
        let b = "Server=tcp:localhost,1434;User Id=sa;Password=x;TrustServerCertificate=true";

        let first = pools.pool_for(a).unwrap();
        let again = pools.pool_for(a).unwrap();
        pools.pool_for(b).unwrap();

        assert_eq!(pools.len(), 2);
        assert_eq!(first.status().max_size, 2);
        assert_eq!(again.status().max_size, 2);

        pools.clear();
        assert!(pools.is_empty());
    }

    #[test]
    fn manager_debug_hides_credentials() {
        let manager = MssqlManager::from_connection_string(
            "Server=tcp:localhost,1433;User Id=sa;Password=hunter2",
            &TaskConfig::default(),
        )
        .unwrap();
        assert!(!format!("{manager:?}").contains("hunter2"));
    }
}
