//! SOCKS5 proxy support.
//!
//! Attach a [`Socks5Config`] to [`crate::Config`] (or to a
//! [`crate::TcpConnector`]) and every data center connection is tunnelled
//! through the proxy.
//!
//! # Example
//! ```rust,no_run
//! use tgwire_client::{Config, Socks5Config};
//!
//! let cfg = Config {
//!     socks5: Some(Socks5Config::with_auth("127.0.0.1:1080", "user", "hunter2")),
//!     ..Default::default()
//! };
//! ```

use std::io;

use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

/// SOCKS5 proxy configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Socks5Config {
    /// Host:port of the SOCKS5 proxy server.
    pub proxy_addr: String,
    /// Optional username and password for proxy authentication.
    pub auth: Option<(String, String)>,
}

impl Socks5Config {
    /// Create an unauthenticated SOCKS5 config.
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self { proxy_addr: proxy_addr.into(), auth: None }
    }

    /// Create a SOCKS5 config with username/password authentication.
    pub fn with_auth(
        proxy_addr: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { proxy_addr: proxy_addr.into(), auth: Some((username.into(), password.into())) }
    }

    /// Open a TCP stream to `target` through the proxy.
    pub async fn connect(&self, target: &str) -> io::Result<TcpStream> {
        tracing::info!("[socks5] connecting via {} to {target}", self.proxy_addr);
        let stream = match &self.auth {
            None => Socks5Stream::connect(self.proxy_addr.as_str(), target).await,
            Some((user, pass)) => {
                Socks5Stream::connect_with_password(self.proxy_addr.as_str(), target, user.as_str(), pass.as_str())
                    .await
            }
        }
        .map_err(io::Error::other)?;
        tracing::debug!("[socks5] tunnel to {target} established");
        Ok(stream.into_inner())
    }
}
