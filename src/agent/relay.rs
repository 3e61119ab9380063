use http::{header::PROXY_AUTHORIZATION, HeaderValue, Request};

use super::{connect_direct, open_tunnel, target_tls, AgentStream, ConnectTarget, ProxyAgent};
use crate::{
    config::NegotiationConfig,
    connectors::{TlsConnector, UnifiedL4Connector},
    proxy::{ProxyConnector, ProxyDescriptor},
    Result,
};

/// Sends plaintext requests to the proxy with an absolute-form target and
/// lets it forward them. TLS targets, and any target when the proxy is
/// SOCKS, go through a tunnel instead.
#[derive(Clone, Debug)]
pub struct RelayAgent {
    proxy: ProxyConnector,
    tls: TlsConnector<UnifiedL4Connector>,
}

impl RelayAgent {
    pub fn new(proxy: ProxyDescriptor, config: &NegotiationConfig) -> Self {
        Self {
            proxy: ProxyConnector::new(proxy).with_timeout(config.connect_timeout),
            tls: target_tls(config),
        }
    }

    #[inline]
    pub fn proxy(&self) -> &ProxyDescriptor {
        self.proxy.proxy()
    }

    #[inline]
    fn relays(&self, target: &ConnectTarget) -> bool {
        !target.tls && !target.bypasses_proxy() && !self.proxy.proxy().scheme().is_socks()
    }
}

impl ProxyAgent for RelayAgent {
    fn prepare_request<B>(&self, request: &mut Request<B>, target: &ConnectTarget) -> Result<()> {
        if !self.relays(target) {
            return Ok(());
        }
        *request.uri_mut() = target.absolute_uri(request.uri().path_and_query())?;
        if let Some(basic) = self.proxy.proxy().basic_auth() {
            let value = HeaderValue::from_str(&basic).map_err(http::Error::from)?;
            request.headers_mut().insert(PROXY_AUTHORIZATION, value);
        }
        #[cfg(feature = "logging")]
        tracing::debug!("relaying {} through {}", request.uri(), self.proxy.proxy());
        Ok(())
    }

    async fn create_connection(&self, target: &ConnectTarget) -> Result<AgentStream> {
        if target.bypasses_proxy() {
            return connect_direct(&self.tls, target, self.proxy.timeout()).await;
        }
        if !self.relays(target) {
            return open_tunnel(&self.proxy, &self.tls, target).await;
        }
        Ok(AgentStream::Proxied(self.proxy.open_hop().await?))
    }
}
