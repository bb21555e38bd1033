use std::net::ToSocketAddrs;

use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::config::MssqlOptions;
use crate::error::SqlMapperError;

/// Type alias for the SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Open a new SQL Server client for `options`.
///
/// # Errors
/// Returns [`SqlMapperError::ConnectionError`] if the address cannot be resolved or the
/// connection fails.
pub async fn create_mssql_client(options: &MssqlOptions) -> Result<MssqlClient, SqlMapperError> {
    let mut config = tiberius::Config::new();

    config.host(&options.server);
    config.database(&options.database);
    config.authentication(tiberius::AuthMethod::sql_server(
        &options.user,
        &options.password,
    ));

    let port_val = options.port.unwrap_or(1433);
    config.port(port_val);

    if let Some(instance) = &options.instance_name {
        config.instance_name(instance);
    }

    if options.trust_cert {
        config.trust_cert();
    }

    let server_addr = (options.server.as_str(), port_val)
        .to_socket_addrs()
        .map_err(|e| {
            SqlMapperError::ConnectionError(format!("Failed to resolve server address: {e}"))
        })?
        .next()
        .ok_or_else(|| {
            SqlMapperError::ConnectionError(format!(
                "No valid address found for {}",
                options.server
            ))
        })?;

    let tcp = TcpStream::connect(server_addr)
        .await
        .map_err(|e| SqlMapperError::ConnectionError(format!("TCP connection error: {e}")))?;
    tcp.set_nodelay(true)
        .map_err(|e| SqlMapperError::ConnectionError(format!("TCP configuration error: {e}")))?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| SqlMapperError::ConnectionError(format!("SQL Server connection error: {e}")))
}
