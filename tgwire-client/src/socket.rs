//! Where connections get their byte streams from.
//!
//! A [`Connector`] turns a `host:port` into any async byte stream. The
//! default [`TcpConnector`] dials TCP, optionally through a SOCKS5 proxy;
//! tests plug in in-memory pipes instead.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::socks5::Socks5Config;

/// A connected, bidirectional byte stream.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Socket for T {}

pub type BoxSocket = Box<dyn Socket>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opens byte streams to data centers.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<BoxSocket>>;
}

/// Plain TCP, or TCP tunnelled through SOCKS5.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    pub socks5: Option<Socks5Config>,
}

impl TcpConnector {
    pub fn new(socks5: Option<Socks5Config>) -> Self {
        Self { socks5 }
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<BoxSocket>> {
        Box::pin(async move {
            let stream = match &self.socks5 {
                Some(proxy) => proxy.connect(addr).await?,
                None => TcpStream::connect(addr).await?,
            };
            stream.set_nodelay(true)?;
            // Idle NAT mappings drop silently; TCP keepalive notices first.
            let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
            Ok(Box::new(stream) as BoxSocket)
        })
    }
}
