use crate::{
    connectors::{
        delegate_io, TlsStream, TransportConnMeta, TransportConnMetadata, UnifiedL4Stream,
    },
    proxy::ProxyStream,
};

/// A connection handed to the HTTP layer by an agent.
#[derive(Debug)]
pub enum AgentStream {
    /// Plaintext, straight to the target or a local socket.
    Direct(UnifiedL4Stream),
    DirectTls(TlsStream<UnifiedL4Stream>),
    /// Plaintext through a proxy: a relay hop or a raw tunnel.
    Proxied(ProxyStream),
    /// Target TLS session inside a proxy tunnel.
    Tunneled(TlsStream<ProxyStream>),
}

impl AgentStream {
    /// Whether the bytes reach the target through a proxy.
    #[inline]
    pub fn is_proxied(&self) -> bool {
        matches!(self, AgentStream::Proxied(_) | AgentStream::Tunneled(_))
    }
}

impl TransportConnMetadata for AgentStream {
    type Metadata = TransportConnMeta;

    fn get_conn_metadata(&self) -> Self::Metadata {
        match self {
            AgentStream::DirectTls(tls) => tls.get_conn_metadata(),
            AgentStream::Tunneled(tls) => tls.get_conn_metadata(),
            AgentStream::Direct(_) | AgentStream::Proxied(_) => TransportConnMeta::default(),
        }
    }
}

delegate_io!(AgentStream {
    Direct,
    DirectTls,
    Proxied,
    Tunneled,
});
