use crate::auth::{Credentials, InvalidCredentials};
use clap::Parser;
use std::net::SocketAddr;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "HTTP proxy relaying through an upstream SOCKS5 server",
    long_about = "http-socks-relay accepts HTTP proxy clients (plain requests and CONNECT tunnels) and forwards every connection through an upstream SOCKS5 server.\n\nFeatures:\n- Keep-alive preserved on a single SOCKS5 connection per client connection\n- Raw CONNECT tunnels\n- Optional HTTP Basic proxy authentication (--cred)\n"
)]
pub struct Cli {
    /// Address to accept HTTP proxy clients on (":PORT" binds every interface)
    #[arg(short, long, default_value = ":5555", value_name = "HOST:PORT")]
    pub bind: String,

    /// Upstream SOCKS5 server address or hostname:port (required)
    #[arg(short, long, value_name = "HOST:PORT")]
    pub socks: Option<String>,

    /// Credentials HTTP clients must authenticate with, in the format "user:passwd"
    #[arg(short, long, value_name = "USER:PASS")]
    pub cred: Option<String>,
}

/// Startup-time configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("socks flag is required")]
    MissingSocksAddress,

    #[error(transparent)]
    InvalidCredentials(#[from] InvalidCredentials),

    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddress(String),
}

/// Relay configuration derived from CLI arguments. Immutable once built.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub socks_addr: SocketAddr,
    pub credentials: Option<Credentials>,
}

impl ProxyConfig {
    /// Validate CLI arguments and resolve both addresses
    pub async fn from_cli(args: Cli) -> Result<Self, ConfigError> {
        let socks_address = args
            .socks
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSocksAddress)?;

        let credentials = args
            .cred
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<Credentials>())
            .transpose()?;

        let listen_addr = resolve(&bind_address(&args.bind)).await?;
        let socks_addr = resolve(&socks_address).await?;

        Ok(Self {
            listen_addr,
            socks_addr,
            credentials,
        })
    }
}

/// Expand the ":PORT" shorthand to the unspecified IPv4 address
fn bind_address(bind: &str) -> String {
    if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_owned()
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, ConfigError> {
    let mut addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|source| ConfigError::Resolve {
            addr: addr.to_owned(),
            source,
        })?;
    addrs
        .next()
        .ok_or_else(|| ConfigError::NoAddress(addr.to_owned()))
}
