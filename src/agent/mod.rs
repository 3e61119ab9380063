//! Proxy-aware connection acquisition for an HTTP client.
//!
//! An agent turns a [`ConnectTarget`] into an [`AgentStream`] and gets a say
//! in the request written on it. Plaintext requests through an HTTP proxy
//! are relayed ([`RelayAgent`]); everything else through a proxy goes through
//! a tunnel ([`TunnelAgent`]). A target carrying a local socket path skips
//! the proxy entirely.
mod relay;
mod stream;
mod tunnel;

use std::{future::Future, path::PathBuf, time::Duration};

use http::{uri::PathAndQuery, Request, Uri};
pub use relay::RelayAgent;
use smol_str::SmolStr;
pub use stream::AgentStream;
pub use tunnel::TunnelAgent;

use crate::{
    config::NegotiationConfig,
    connectors::{
        client_config, format_authority, strip_brackets, within, Connector, TcpConnector,
        TcpTlsAddr, TlsConnector, UnifiedL4Addr, UnifiedL4Connector,
    },
    proxy::{ProxyConnector, ProxyDescriptor},
    Error, Result,
};

/// Where a request goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub tls: bool,
    pub host: SmolStr,
    pub port: u16,
    /// Local socket to use instead of the network; set, it bypasses proxies.
    pub socket_path: Option<PathBuf>,
    /// ALPN candidates for the target handshake. Empty leaves it to the agent.
    pub alpn: Vec<SmolStr>,
}

impl ConnectTarget {
    pub fn new(tls: bool, host: &str, port: u16) -> Self {
        Self {
            tls,
            host: SmolStr::from(strip_brackets(host)),
            port,
            socket_path: None,
            alpn: Vec::new(),
        }
    }

    #[inline]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn with_alpn<I, S>(mut self, alpn: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.alpn = alpn.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn bypasses_proxy(&self) -> bool {
        self.socket_path.is_some()
    }

    #[inline]
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    #[inline]
    pub fn authority(&self) -> String {
        format_authority(&self.host, self.port)
    }

    pub fn tls_addr(&self) -> Result<TcpTlsAddr> {
        Ok(TcpTlsAddr::new(&self.host, self.port)?.with_alpn(self.alpn.iter().cloned()))
    }

    /// `host[:port]`, the port left out when it is the scheme's default.
    /// This is what goes into `Host`.
    pub fn origin_authority(&self) -> String {
        let mut authority = self.authority();
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            if let Some((host, _)) = authority.rsplit_once(':') {
                authority = host.to_string();
            }
        }
        authority
    }

    /// `scheme://` + [`ConnectTarget::origin_authority`] + `path`.
    pub fn absolute_uri(&self, path: Option<&PathAndQuery>) -> Result<Uri> {
        let path = path.map(PathAndQuery::as_str).unwrap_or("/");
        Ok(Uri::builder()
            .scheme(self.scheme())
            .authority(self.origin_authority())
            .path_and_query(path)
            .build()?)
    }
}

impl TryFrom<&Uri> for ConnectTarget {
    type Error = Error;

    fn try_from(uri: &Uri) -> Result<Self> {
        let host = uri.host().ok_or(Error::NoAuthority)?;
        let tls = uri.scheme() != Some(&http::uri::Scheme::HTTP);
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Ok(ConnectTarget::new(tls, host, port))
    }
}

/// The surface an HTTP client delegates connection handling to.
pub trait ProxyAgent {
    /// Adjust `request` before it is written to a connection made for `target`.
    fn prepare_request<B>(&self, request: &mut Request<B>, target: &ConnectTarget) -> Result<()>;

    fn create_connection(&self, target: &ConnectTarget)
        -> impl Future<Output = Result<AgentStream>>;
}

pub(crate) fn target_tls(config: &NegotiationConfig) -> TlsConnector<UnifiedL4Connector> {
    TlsConnector::new(
        UnifiedL4Connector::new(TcpConnector::new()),
        client_config(config.verify_certificates, &config.alpn()),
    )
}

/// Connect the way a client without any proxy would. `timeout` bounds the
/// connect and the TLS handshake together.
pub(crate) async fn connect_direct(
    tls: &TlsConnector<UnifiedL4Connector>,
    target: &ConnectTarget,
    timeout: Option<Duration>,
) -> Result<AgentStream> {
    let l4 = match &target.socket_path {
        Some(path) => UnifiedL4Addr::Unix(path.clone()),
        None => UnifiedL4Addr::Tcp(target.host.clone(), target.port),
    };
    within(timeout, async {
        let io = tls.inner_connector().connect(&l4).await?;
        if !target.tls {
            return Ok(AgentStream::Direct(io));
        }
        let addr = target.tls_addr()?;
        Ok::<_, Error>(AgentStream::DirectTls(tls.handshake(&addr, io).await?))
    })
    .await
}

/// Open a tunnel to `target` and, for TLS targets, run the target handshake
/// inside it. The proxy's timeout covers the tunnel and the handshake.
pub(crate) async fn open_tunnel(
    proxy: &ProxyConnector,
    tls: &TlsConnector<UnifiedL4Connector>,
    target: &ConnectTarget,
) -> Result<AgentStream> {
    let addr = target.tls_addr()?;
    let res = within(proxy.timeout(), async {
        let stream = proxy.establish(&addr).await?;
        if !target.tls {
            return Ok(AgentStream::Proxied(stream));
        }
        Ok::<_, Error>(AgentStream::Tunneled(tls.handshake(&addr, stream).await?))
    })
    .await;
    #[cfg(feature = "logging")]
    {
        if matches!(res, Err(Error::Timeout)) {
            tracing::warn!(
                "connection to {} through {} timed out after {:?}",
                target.authority(),
                proxy.proxy(),
                proxy.timeout()
            );
        }
    }
    res
}

/// No proxy at all.
#[derive(Clone, Debug)]
pub struct DirectAgent {
    tls: TlsConnector<UnifiedL4Connector>,
    timeout: Option<Duration>,
}

impl DirectAgent {
    pub fn new(config: &NegotiationConfig) -> Self {
        Self {
            tls: target_tls(config),
            timeout: config.connect_timeout,
        }
    }
}

impl ProxyAgent for DirectAgent {
    #[inline]
    fn prepare_request<B>(&self, _request: &mut Request<B>, _target: &ConnectTarget) -> Result<()> {
        Ok(())
    }

    #[inline]
    async fn create_connection(&self, target: &ConnectTarget) -> Result<AgentStream> {
        connect_direct(&self.tls, target, self.timeout).await
    }
}

/// Picks the agent matching the proxy.
///
/// HTTP(S) proxies relay plaintext requests and tunnel TLS ones, unless
/// `connect_only` asks for tunnels everywhere. SOCKS proxies always tunnel.
#[derive(Clone, Debug)]
pub enum ProxyAwareAgent {
    Direct(DirectAgent),
    Relay(RelayAgent),
    Tunnel(TunnelAgent),
}

impl ProxyAwareAgent {
    pub fn new(proxy: Option<ProxyDescriptor>, config: &NegotiationConfig) -> Self {
        Self::with_mode(proxy, config, false)
    }

    pub fn with_mode(
        proxy: Option<ProxyDescriptor>,
        config: &NegotiationConfig,
        connect_only: bool,
    ) -> Self {
        let Some(proxy) = proxy else {
            return ProxyAwareAgent::Direct(DirectAgent::new(config));
        };
        if connect_only || proxy.scheme().is_socks() {
            ProxyAwareAgent::Tunnel(TunnelAgent::new(proxy, config))
        } else {
            ProxyAwareAgent::Relay(RelayAgent::new(proxy, config))
        }
    }
}

impl Default for ProxyAwareAgent {
    fn default() -> Self {
        ProxyAwareAgent::new(None, &NegotiationConfig::default())
    }
}

impl ProxyAgent for ProxyAwareAgent {
    fn prepare_request<B>(&self, request: &mut Request<B>, target: &ConnectTarget) -> Result<()> {
        match self {
            ProxyAwareAgent::Direct(agent) => agent.prepare_request(request, target),
            ProxyAwareAgent::Relay(agent) => agent.prepare_request(request, target),
            ProxyAwareAgent::Tunnel(agent) => agent.prepare_request(request, target),
        }
    }

    async fn create_connection(&self, target: &ConnectTarget) -> Result<AgentStream> {
        match self {
            ProxyAwareAgent::Direct(agent) => agent.create_connection(target).await,
            ProxyAwareAgent::Relay(agent) => agent.create_connection(target).await,
            ProxyAwareAgent::Tunnel(agent) => agent.create_connection(target).await,
        }
    }
}
