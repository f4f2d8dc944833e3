use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

/// Error type for SOCKS5 connection operations
#[derive(Debug, thiserror::Error)]
pub enum SocksError {
    #[error("SOCKS5 connection to {target} failed: {source}")]
    ConnectionFailed {
        target: String,
        #[source]
        source: tokio_socks::Error,
    },
}

/// Result type for SOCKS5 operations
pub type SocksResult<T> = Result<T, SocksError>;

/// Stream to a target reached through the SOCKS5 server
pub type SocksStream = Socks5Stream<TcpStream>;

/// Dials targets through the configured SOCKS5 server.
///
/// Anonymous only: the greeting offers the no-auth method and nothing else.
/// Domain names are handed to the SOCKS5 server unresolved.
#[derive(Debug, Clone)]
pub struct SocksConnector {
    socks_addr: SocketAddr,
}

impl SocksConnector {
    pub fn new(socks_addr: SocketAddr) -> Self {
        Self { socks_addr }
    }

    /// Open a SOCKS5 stream to `target_addr` (`host:port`, port required)
    pub async fn connect(&self, target_addr: &str) -> SocksResult<SocksStream> {
        Socks5Stream::connect(self.socks_addr, target_addr)
            .await
            .map_err(|source| SocksError::ConnectionFailed {
                target: target_addr.to_owned(),
                source,
            })
    }

    /// Get the SOCKS5 server address
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }
}
