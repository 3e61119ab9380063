use http::Request;

use super::{connect_direct, open_tunnel, target_tls, AgentStream, ConnectTarget, ProxyAgent};
use crate::{
    config::NegotiationConfig,
    connectors::{TlsConnector, UnifiedL4Connector},
    proxy::{ProxyConnector, ProxyDescriptor},
    Result,
};

/// Reaches every target through a CONNECT or SOCKS tunnel. Requests are
/// written unchanged; the proxy never sees them.
#[derive(Clone, Debug)]
pub struct TunnelAgent {
    proxy: ProxyConnector,
    tls: TlsConnector<UnifiedL4Connector>,
}

impl TunnelAgent {
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
}

impl ProxyAgent for TunnelAgent {
    #[inline]
    fn prepare_request<B>(&self, _request: &mut Request<B>, _target: &ConnectTarget) -> Result<()> {
        Ok(())
    }

    async fn create_connection(&self, target: &ConnectTarget) -> Result<AgentStream> {
        if target.bypasses_proxy() {
            return connect_direct(&self.tls, target, self.proxy.timeout()).await;
        }
        open_tunnel(&self.proxy, &self.tls, target).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use monoio::{
        io::{AsyncReadRent, AsyncReadRentExt, AsyncWriteRentExt},
        net::TcpListener,
    };

    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn plaintext_target_uses_raw_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = monoio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                let (res, buf) = conn.read(Vec::with_capacity(1024)).await;
                let n = res.unwrap();
                assert!(n > 0);
                head.extend_from_slice(&buf[..n]);
            }
            let seen = String::from_utf8(head).unwrap();
            let (res, _) = conn
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n".as_slice())
                .await;
            res.unwrap();
            let (res, buf) = conn.read_exact(vec![0u8; 4]).await;
            res.unwrap();
            let (res, _) = conn.write_all(buf).await;
            res.unwrap();
            seen
        });

        let proxy = ProxyDescriptor::parse(&format!("http://{addr}")).unwrap();
        let agent = TunnelAgent::new(proxy, &NegotiationConfig::default());
        let target = ConnectTarget::new(false, "example.com", 80);

        let mut request = Request::get("/").body(()).unwrap();
        agent.prepare_request(&mut request, &target).unwrap();
        assert_eq!(request.uri(), "/");

        let mut stream = agent.create_connection(&target).await.unwrap();
        assert!(matches!(stream, AgentStream::Proxied(_)));
        let (res, _) = stream.write_all(b"ping".to_vec()).await;
        res.unwrap();
        let (res, buf) = stream.read_exact(vec![0u8; 4]).await;
        res.unwrap();
        assert_eq!(buf, b"ping");

        let seen = server.await;
        assert!(seen.starts_with("CONNECT example.com:80 HTTP/1.1\r\n"));
    }

    #[monoio::test(enable_timer = true)]
    async fn stalled_target_handshake_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        monoio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let (res, _) = conn.read(Vec::with_capacity(1024)).await;
            res.unwrap();
            let (res, _) = conn.write_all(b"HTTP/1.1 200 OK\r\n\r\n".as_slice()).await;
            res.unwrap();
            // the tunnel is up but the target never answers the ClientHello
            monoio::time::sleep(Duration::from_secs(2)).await;
            drop(conn);
        });

        let proxy = ProxyDescriptor::parse(&format!("http://{addr}")).unwrap();
        let config = NegotiationConfig {
            connect_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let agent = TunnelAgent::new(proxy, &config);
        let target = ConnectTarget::new(true, "example.com", 443);
        let res = monoio::time::timeout(Duration::from_secs(1), agent.create_connection(&target))
            .await
            .expect("connect_timeout not applied to the target handshake");
        assert!(res.unwrap_err().is_timeout());
    }

    #[monoio::test(enable_timer = true)]
    async fn refused_tunnel_surfaces_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        monoio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let (res, _) = conn.read(Vec::with_capacity(1024)).await;
            res.unwrap();
            let (res, _) = conn
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\ndenied".as_slice())
                .await;
            res.unwrap();
        });

        let proxy = ProxyDescriptor::parse(&format!("http://{addr}")).unwrap();
        let agent = TunnelAgent::new(proxy, &NegotiationConfig::default());
        let target = ConnectTarget::new(true, "example.com", 443);
        match agent.create_connection(&target).await {
            Err(crate::Error::ProxyTunnel { status, .. }) => assert_eq!(status, 403),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
