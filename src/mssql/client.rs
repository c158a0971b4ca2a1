use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use super::config::MssqlClient;

/// Open one SQL Server connection for `config`.
///
/// Azure SQL may answer the login with a routing redirect; the redirect is
/// followed once.
///
/// # Errors
///
/// Returns the driver error if the TCP connect or the login fails.
pub async fn connect(mut config: Config) -> Result<MssqlClient, tiberius::error::Error> {
    let tcp = open_tcp(&config.get_addr()).await?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Err(tiberius::error::Error::Routing { host, port }) => {
            tracing::debug!(%host, port, "following SQL Server routing redirect");
            config.host(&host);
            config.port(port);
            let tcp = open_tcp(&config.get_addr()).await?;
            Client::connect(config, tcp.compat_write()).await
        }
        other => other,
    }
}

async fn open_tcp(addr: &str) -> Result<TcpStream, tiberius::error::Error> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| tiberius::error::Error::Io {
            kind: e.kind(),
            message: format!("TCP connection error: {e}"),
        })?;
    tcp.set_nodelay(true).ok();
    Ok(tcp)
}

/// Connect outside any pool, e.g. for a one-off administrative session.
///
/// # Errors
///
/// Returns `SqlTaskError::ConfigError` for an unparsable connection string and
/// `SqlTaskError::ConnectionError` if the connection fails.
pub async fn create_mssql_client(
    connection_string: &str,
) -> Result<MssqlClient, crate::error::SqlTaskError> {
    let config = Config::from_ado_string(connection_string).map_err(|e| {
        crate::error::SqlTaskError::ConfigError(format!("Invalid connection string: {e}"))
    })?;
    connect(config).await.map_err(|e| {
        crate::error::SqlTaskError::ConnectionError(format!("SQL Server connection error: {e}"))
    })
}
