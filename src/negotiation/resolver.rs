use std::{rc::Rc, time::Duration};

use super::{NegotiationContext, NegotiationKey, Reservation};
use crate::{
    config::NegotiationConfig,
    connectors::{
        client_config, Alpn, Connector, ConnectorExt, TcpTlsAddr, TlsConnector,
        TransportConnMeta, TransportConnMetadata,
    },
    proxy::{ProxyDescriptor, Route},
    Error, SharedError,
};

/// TLS over a direct or proxied route: what a probe normally runs on.
pub type ProbeConnector = TlsConnector<Route>;

/// Result of a resolution.
///
/// `stream` is the probe connection when this call ran the probe itself. A
/// cache hit or a joined negotiation carries no stream.
#[derive(Debug)]
pub struct Resolved<S> {
    pub protocol: Alpn,
    pub stream: Option<S>,
}

/// Finds out which protocol a TLS destination speaks, probing each
/// destination at most once at a time.
///
/// The candidate protocols are the target's `alpn` list.
#[derive(Clone, Debug)]
pub struct ProtocolResolver<C> {
    connector: C,
    context: NegotiationContext,
    timeout: Option<Duration>,
}

impl<C> ProtocolResolver<C> {
    /// Resolver backed by this thread's default context.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            context: NegotiationContext::global(),
            timeout: None,
        }
    }

    #[inline]
    pub fn with_context(mut self, context: NegotiationContext) -> Self {
        self.context = context;
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    #[inline]
    pub fn context(&self) -> &NegotiationContext {
        &self.context
    }

    #[inline]
    pub async fn resolve<'a, S>(&self, target: &'a TcpTlsAddr) -> Result<Resolved<S>, SharedError>
    where
        C: Connector<&'a TcpTlsAddr, Connection = S, Error = Error>,
        S: TransportConnMetadata<Metadata = TransportConnMeta>,
    {
        self.resolve_with_timeout(target, self.timeout).await
    }

    /// Like [`ProtocolResolver::resolve`] with a deadline for this call only.
    ///
    /// A joiner whose deadline passes stops waiting; the probe it joined
    /// keeps running for everyone else. An owner's deadline bounds the probe
    /// and its timeout is what the joiners get.
    pub async fn resolve_with_timeout<'a, S>(
        &self,
        target: &'a TcpTlsAddr,
        timeout: Option<Duration>,
    ) -> Result<Resolved<S>, SharedError>
    where
        C: Connector<&'a TcpTlsAddr, Connection = S, Error = Error>,
        S: TransportConnMetadata<Metadata = TransportConnMeta>,
    {
        self.resolve_in(&self.context, target, timeout).await
    }

    /// Resolve against `context` instead of the resolver's own, for callers
    /// keeping negotiation memory per session.
    pub async fn resolve_in<'a, S>(
        &self,
        context: &NegotiationContext,
        target: &'a TcpTlsAddr,
        timeout: Option<Duration>,
    ) -> Result<Resolved<S>, SharedError>
    where
        C: Connector<&'a TcpTlsAddr, Connection = S, Error = Error>,
        S: TransportConnMetadata<Metadata = TransportConnMeta>,
    {
        let key = NegotiationKey::from(target);
        if let Some(protocol) = context.lookup(&key) {
            return Ok(Resolved {
                protocol,
                stream: None,
            });
        }

        let guard = match context.reserve(&key) {
            Reservation::Owner(guard) => guard,
            Reservation::Joined(waiter) => {
                #[cfg(feature = "logging")]
                tracing::debug!("joining pending negotiation {}", key);
                let outcome = match timeout {
                    Some(timeout) => monoio::time::timeout(timeout, waiter.join())
                        .await
                        .unwrap_or_else(|_| Err(Rc::new(Error::Timeout))),
                    None => waiter.join().await,
                };
                return outcome.map(|protocol| Resolved {
                    protocol,
                    stream: None,
                });
            }
        };

        #[cfg(feature = "logging")]
        tracing::debug!("probing {}", key);
        let res = match timeout {
            Some(timeout) => self
                .connector
                .connect_with_timeout(target, timeout)
                .await
                .unwrap_or_else(|_| Err(Error::Timeout)),
            None => self.connector.connect(target).await,
        };

        match res {
            Ok(stream) => {
                let protocol = stream.get_conn_metadata().alpn().negotiated();
                guard.settle(Ok(protocol));
                Ok(Resolved {
                    protocol,
                    stream: Some(stream),
                })
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::warn!("probing {} failed: {}", key, e);
                let e = Rc::new(e);
                guard.settle(Err(e.clone()));
                Err(e)
            }
        }
    }
}

impl ProtocolResolver<ProbeConnector> {
    /// Resolver probing directly or through `proxy`, on this thread's
    /// default context.
    pub fn from_config(proxy: Option<ProxyDescriptor>, config: &NegotiationConfig) -> Self {
        let route = Route::new(proxy, config.connect_timeout);
        let tls = client_config(config.verify_probe_certificates, &config.alpn());
        ProtocolResolver::new(TlsConnector::new(route, tls)).with_timeout(config.connect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Clone)]
    struct FakeConnector {
        probes: Rc<Cell<usize>>,
        alpn: Option<&'static [u8]>,
        fail: bool,
        delay: Duration,
    }

    impl FakeConnector {
        fn new(alpn: Option<&'static [u8]>) -> Self {
            Self {
                probes: Rc::new(Cell::new(0)),
                alpn,
                fail: false,
                delay: Duration::from_millis(20),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(None)
            }
        }
    }

    #[derive(Debug)]
    struct FakeStream(Option<&'static [u8]>);

    impl TransportConnMetadata for FakeStream {
        type Metadata = TransportConnMeta;

        fn get_conn_metadata(&self) -> Self::Metadata {
            let mut meta = TransportConnMeta::default();
            meta.set_alpn(self.0.map(|p| p.to_vec()));
            meta
        }
    }

    impl<'a> Connector<&'a TcpTlsAddr> for FakeConnector {
        type Connection = FakeStream;
        type Error = Error;

        async fn connect(&self, _key: &'a TcpTlsAddr) -> Result<Self::Connection, Self::Error> {
            self.probes.set(self.probes.get() + 1);
            monoio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::ProxyAuth { status: 407 });
            }
            Ok(FakeStream(self.alpn))
        }
    }

    fn target() -> TcpTlsAddr {
        TcpTlsAddr::new("example.com", 443)
            .unwrap()
            .with_alpn(["h2", "http/1.1"])
    }

    fn resolver(connector: FakeConnector) -> Rc<ProtocolResolver<FakeConnector>> {
        Rc::new(ProtocolResolver::new(connector).with_context(NegotiationContext::new(16)))
    }

    #[monoio::test(enable_timer = true)]
    async fn concurrent_resolves_share_one_probe() {
        let connector = FakeConnector::new(Some(&b"h2"[..]));
        let probes = connector.probes.clone();
        let resolver = resolver(connector);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let resolver = resolver.clone();
                monoio::spawn(async move { resolver.resolve(&target()).await })
            })
            .collect();

        let mut with_stream = 0;
        for handle in handles {
            let resolved = handle.await.unwrap();
            assert_eq!(resolved.protocol, Alpn::HTTP2);
            with_stream += resolved.stream.is_some() as usize;
        }
        assert_eq!(probes.get(), 1);
        assert_eq!(with_stream, 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn cache_hit_skips_probe() {
        let connector = FakeConnector::new(None);
        let probes = connector.probes.clone();
        let resolver = resolver(connector);

        let first = resolver.resolve(&target()).await.unwrap();
        // no ALPN selected means HTTP/1.1
        assert_eq!(first.protocol, Alpn::HTTP11);
        assert!(first.stream.is_some());

        let second = resolver.resolve(&target()).await.unwrap();
        assert_eq!(second.protocol, Alpn::HTTP11);
        assert!(second.stream.is_none());
        assert_eq!(probes.get(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn failures_are_not_cached() {
        let connector = FakeConnector::failing();
        let probes = connector.probes.clone();
        let resolver = resolver(connector);

        assert!(resolver.resolve(&target()).await.unwrap_err().is_auth());
        assert!(resolver.resolve(&target()).await.unwrap_err().is_auth());
        assert_eq!(probes.get(), 2);
        assert_eq!(resolver.context().cached_len(), 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn joiners_share_the_same_error() {
        let connector = FakeConnector::failing();
        let resolver = resolver(connector);

        let a = {
            let resolver = resolver.clone();
            monoio::spawn(async move { resolver.resolve(&target()).await })
        };
        let b = {
            let resolver = resolver.clone();
            monoio::spawn(async move { resolver.resolve(&target()).await })
        };
        let (a, b) = (a.await.unwrap_err(), b.await.unwrap_err());
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[monoio::test(enable_timer = true)]
    async fn joiner_timeout_does_not_cancel_probe() {
        let mut connector = FakeConnector::new(Some(&b"h2"[..]));
        connector.delay = Duration::from_millis(100);
        let probes = connector.probes.clone();
        let resolver = resolver(connector);

        let owner = {
            let resolver = resolver.clone();
            monoio::spawn(async move { resolver.resolve(&target()).await })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        assert!(resolver.context().is_pending(&NegotiationKey::from(&target())));

        let err = resolver
            .resolve_with_timeout(&target(), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let resolved = owner.await.unwrap();
        assert_eq!(resolved.protocol, Alpn::HTTP2);
        assert_eq!(probes.get(), 1);
        assert_eq!(
            resolver.context().lookup(&NegotiationKey::from(&target())),
            Some(Alpn::HTTP2)
        );
    }

    #[monoio::test(enable_timer = true)]
    async fn owner_timeout_reaches_joiners() {
        let mut connector = FakeConnector::new(Some(&b"h2"[..]));
        connector.delay = Duration::from_millis(200);
        let resolver = resolver(connector);

        let owner = {
            let resolver = resolver.clone();
            monoio::spawn(async move {
                resolver
                    .resolve_with_timeout(&target(), Some(Duration::from_millis(20)))
                    .await
            })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        let joined = resolver.resolve(&target()).await.unwrap_err();
        let owned = owner.await.unwrap_err();
        assert!(joined.is_timeout());
        assert!(Rc::ptr_eq(&joined, &owned));
    }

    #[monoio::test(enable_timer = true)]
    async fn session_context_is_isolated() {
        let connector = FakeConnector::new(Some(&b"h2"[..]));
        let probes = connector.probes.clone();
        let resolver = resolver(connector);
        let session = NegotiationContext::new(4);

        resolver.resolve_in(&session, &target(), None).await.unwrap();
        assert_eq!(session.cached_len(), 1);
        assert_eq!(resolver.context().cached_len(), 0);

        let again = resolver.resolve(&target()).await.unwrap();
        assert!(again.stream.is_some());
        assert_eq!(probes.get(), 2);
    }

    #[monoio::test(enable_timer = true)]
    async fn probe_through_silent_proxy_times_out() {
        let listener = monoio::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        monoio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            monoio::time::sleep(Duration::from_secs(2)).await;
            drop(conn);
        });

        let config = NegotiationConfig {
            connect_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let proxy = ProxyDescriptor::parse(&format!("http://{addr}")).unwrap();
        let resolver = ProtocolResolver::from_config(Some(proxy), &config)
            .with_context(NegotiationContext::new(4));

        let err = resolver.resolve(&target()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(resolver.context().cached_len(), 0);
        assert_eq!(resolver.context().pending_len(), 0);
    }
}
