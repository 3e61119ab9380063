use std::{future::Future, time::Duration};

use monoio::net::TcpStream;

use super::{http_connect, socks, ProxyDescriptor, ProxyScheme};
use crate::{
    connectors::{
        delegate_io, within, Connector, TcpConnector, TcpTlsAddr, TlsConnector, TlsStream,
        TransportConnMeta, TransportConnMetadata,
    },
    Error, Result,
};

/// Opens tunnels to targets through one proxy.
///
/// `http` and `https` proxies get a CONNECT request, `socks4`/`socks5`
/// proxies a SOCKS handshake. For `https` proxies the hop to the proxy is
/// TLS itself; the proxy is not what we want to trust, so its certificate is
/// not checked.
#[derive(Clone, Debug)]
pub struct ProxyConnector {
    proxy: ProxyDescriptor,
    tcp: TcpConnector,
    proxy_tls: TlsConnector<TcpConnector>,
    timeout: Option<Duration>,
}

impl ProxyConnector {
    pub fn new(proxy: ProxyDescriptor) -> Self {
        let tcp = TcpConnector::new();
        Self {
            proxy,
            tcp,
            proxy_tls: TlsConnector::new_insecure(tcp, Some(vec!["http/1.1"])),
            timeout: None,
        }
    }

    /// Bound the whole connect + handshake sequence.
    #[inline]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn proxy(&self) -> &ProxyDescriptor {
        &self.proxy
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Connect to the proxy itself, without asking it for anything yet.
    pub async fn open_hop(&self) -> Result<ProxyStream> {
        within(self.timeout, async {
            let stream = self.connect_proxy().await?;
            self.hop_over(stream).await
        })
        .await
    }

    /// Run the tunnel handshake over a stream already connected to the proxy.
    pub async fn tunnel_over(&self, stream: TcpStream, target: &TcpTlsAddr) -> Result<ProxyStream> {
        self.bounded(target, self.handshake_over(stream, target)).await
    }

    /// Connect to the proxy and open the tunnel, with no deadline of its own.
    /// Callers running more steps on the tunnel bound the whole sequence.
    pub(crate) async fn establish(&self, target: &TcpTlsAddr) -> Result<ProxyStream> {
        let stream = self.connect_proxy().await?;
        self.handshake_over(stream, target).await
    }

    async fn handshake_over(&self, stream: TcpStream, target: &TcpTlsAddr) -> Result<ProxyStream> {
        match self.proxy.scheme() {
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => socks::handshake(stream, &self.proxy, target)
                .await
                .map(ProxyStream::Tcp),
            ProxyScheme::Http | ProxyScheme::Https => {
                let hop = self.hop_over(stream).await?;
                http_connect::connect_tunnel(hop, &self.proxy, &target.authority()).await
            }
        }
    }

    async fn connect_proxy(&self) -> Result<TcpStream> {
        Ok(self
            .tcp
            .connect((self.proxy.host(), self.proxy.port()))
            .await?)
    }

    async fn hop_over(&self, stream: TcpStream) -> Result<ProxyStream> {
        match self.proxy.scheme() {
            ProxyScheme::Https => {
                let hop = TcpTlsAddr::new(self.proxy.host(), self.proxy.port())?;
                let tls = self.proxy_tls.handshake(&hop, stream).await?;
                Ok(ProxyStream::Tls(tls))
            }
            _ => Ok(ProxyStream::Tcp(stream)),
        }
    }

    async fn bounded<F>(&self, target: &TcpTlsAddr, fut: F) -> Result<ProxyStream>
    where
        F: Future<Output = Result<ProxyStream>>,
    {
        let res = within(self.timeout, fut).await;
        #[cfg(feature = "logging")]
        {
            if matches!(res, Err(Error::Timeout)) {
                tracing::warn!(
                    "tunnel to {} through {} timed out after {:?}",
                    target.authority(),
                    self.proxy,
                    self.timeout
                );
            }
        }
        #[cfg(not(feature = "logging"))]
        let _ = target;
        res
    }
}

impl<'a> Connector<&'a TcpTlsAddr> for ProxyConnector {
    type Connection = ProxyStream;
    type Error = Error;

    #[inline]
    async fn connect(&self, key: &'a TcpTlsAddr) -> Result<Self::Connection> {
        self.bounded(key, self.establish(key)).await
    }
}

/// How a probe or request reaches its destination.
#[derive(Clone, Debug)]
pub enum Route {
    Direct(TcpConnector),
    Proxy(ProxyConnector),
}

impl Route {
    pub fn new(proxy: Option<ProxyDescriptor>, timeout: Option<Duration>) -> Self {
        match proxy {
            Some(proxy) => Route::Proxy(ProxyConnector::new(proxy).with_timeout(timeout)),
            None => Route::Direct(TcpConnector::new()),
        }
    }
}

impl Default for Route {
    fn default() -> Self {
        Route::Direct(TcpConnector::new())
    }
}

impl<'a> Connector<&'a TcpTlsAddr> for Route {
    type Connection = ProxyStream;
    type Error = Error;

    #[inline]
    async fn connect(&self, key: &'a TcpTlsAddr) -> Result<Self::Connection> {
        match self {
            Route::Direct(tcp) => Ok(ProxyStream::Tcp(tcp.connect(key).await?)),
            Route::Proxy(proxy) => proxy.connect(key).await,
        }
    }
}

/// A connected stream through (or to) a proxy.
#[derive(Debug)]
pub enum ProxyStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl TransportConnMetadata for ProxyStream {
    type Metadata = TransportConnMeta;

    // The proxy hop's ALPN says nothing about the target.
    fn get_conn_metadata(&self) -> Self::Metadata {
        TransportConnMeta::default()
    }
}

delegate_io!(ProxyStream { Tcp, Tls });
