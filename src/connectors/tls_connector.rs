use std::{fmt::Debug, net::ToSocketAddrs, sync::Arc};

use http::Uri;
use monoio::io::{AsyncReadRent, AsyncWriteRent};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use service_async::Param;
use smol_str::SmolStr;

use super::{Connector, TransportConnMeta, TransportConnMetadata};

pub type TlsStream<C> = monoio_rustls::ClientTlsStream<C>;

pub use monoio_rustls::{TlsConnector as MonoioTlsConnector, TlsError};

pub type ServerName<'a> = rustls::pki_types::ServerName<'a>;

impl<S> TransportConnMetadata for TlsStream<S> {
    type Metadata = TransportConnMeta;

    fn get_conn_metadata(&self) -> Self::Metadata {
        let mut meta = TransportConnMeta::default();
        meta.set_alpn(self.alpn_protocol());
        meta
    }
}

/// Build a client config advertising `alpn`.
///
/// With `verify_certificates` off the peer certificate is accepted as is,
/// which is what a proxy hop or a protocol probe needs.
pub fn client_config(verify_certificates: bool, alpn: &[&str]) -> rustls::ClientConfig {
    let mut cfg = if verify_certificates {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification::default()))
            .with_no_client_auth()
    };
    cfg.alpn_protocols = alpn.iter().map(|a| a.as_bytes().to_vec()).collect();
    cfg
}

#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl Default for NoCertificateVerification {
    fn default() -> Self {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        Self(provider)
    }
}

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A connector for establishing TLS connections over an inner connector.
///
/// This connector wraps another connector (a TCP connector, or a proxy
/// tunnel) and adds TLS encryption to the connection. When the target
/// carries its own ALPN candidates they replace the ones in the config for
/// that handshake only.
#[derive(Clone)]
pub struct TlsConnector<C> {
    inner_connector: C,
    config: Arc<rustls::ClientConfig>,
    tls_connector: MonoioTlsConnector,
}

impl<C: Debug> std::fmt::Debug for TlsConnector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsConnector, inner: {:?}", self.inner_connector)
    }
}

impl<C> TlsConnector<C> {
    pub fn new(inner_connector: C, config: rustls::ClientConfig) -> Self {
        let tls_connector = MonoioTlsConnector::from(config.clone());
        Self {
            inner_connector,
            config: Arc::new(config),
            tls_connector,
        }
    }

    // Create a new `TlsConnector` with custom ALPN protocols.
    #[inline]
    pub fn new_with_tls_default(inner_connector: C, alpn: Option<Vec<&str>>) -> Self {
        let alpn = alpn.unwrap_or_default();
        TlsConnector::new(inner_connector, client_config(true, &alpn))
    }

    /// Same as [`TlsConnector::new_with_tls_default`] but accepts any peer certificate.
    #[inline]
    pub fn new_insecure(inner_connector: C, alpn: Option<Vec<&str>>) -> Self {
        let alpn = alpn.unwrap_or_default();
        TlsConnector::new(inner_connector, client_config(false, &alpn))
    }

    #[inline]
    pub fn inner_connector(&self) -> &C {
        &self.inner_connector
    }

    #[inline]
    pub fn tls_connector(&self) -> &MonoioTlsConnector {
        &self.tls_connector
    }

    /// Swap the inner connector, keeping the TLS settings.
    #[inline]
    pub fn with_inner<C2>(&self, inner_connector: C2) -> TlsConnector<C2> {
        TlsConnector {
            inner_connector,
            config: self.config.clone(),
            tls_connector: self.tls_connector.clone(),
        }
    }

    fn tls_connector_for(&self, alpn: &[SmolStr]) -> MonoioTlsConnector {
        if alpn.is_empty() {
            return self.tls_connector.clone();
        }
        let mut cfg = (*self.config).clone();
        cfg.alpn_protocols = alpn.iter().map(|a| a.as_bytes().to_vec()).collect();
        MonoioTlsConnector::from(cfg)
    }

    /// Run the client handshake over an already established stream.
    pub async fn handshake<IO>(&self, key: &TcpTlsAddr, stream: IO) -> crate::Result<TlsStream<IO>>
    where
        IO: AsyncReadRent + AsyncWriteRent,
    {
        let tls_connector = self.tls_connector_for(&key.alpn);
        Ok(tls_connector.connect(key.sn.clone(), stream).await?)
    }
}

impl<C: Default> Default for TlsConnector<C> {
    /// Create a new `TlsConnector` with the default inner connector.
    /// Additionally, the default ALPN protocols are set to `h2` and `http/1.1`.
    #[inline]
    fn default() -> Self {
        let alpn = Some(vec!["h2", "http/1.1"]);
        TlsConnector::new_with_tls_default(Default::default(), alpn)
    }
}

impl<'a, C, CN> Connector<&'a TcpTlsAddr> for TlsConnector<C>
where
    C: Connector<&'a TcpTlsAddr, Connection = CN>,
    C::Error: Into<crate::Error>,
    CN: AsyncReadRent + AsyncWriteRent,
{
    type Connection = TlsStream<CN>;
    type Error = crate::Error;

    #[inline]
    async fn connect(&self, key: &'a TcpTlsAddr) -> Result<Self::Connection, Self::Error> {
        let stream = self.inner_connector.connect(key).await.map_err(Into::into)?;
        self.handshake(key, stream).await
    }
}

/// A TLS destination: where to connect, what name to verify and which
/// protocols to offer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TcpTlsAddr {
    pub host: SmolStr,
    pub port: u16,
    pub sn: ServerName<'static>,
    /// Candidate ALPN protocols. Empty means the connector config decides.
    pub alpn: Vec<SmolStr>,
}

impl TcpTlsAddr {
    pub fn new(host: &str, port: u16) -> crate::Result<Self> {
        let host = strip_brackets(host);
        let sn = ServerName::try_from(host.to_string())?;
        Ok(Self {
            host: SmolStr::from(host),
            port,
            sn,
            alpn: Vec::new(),
        })
    }

    pub fn with_alpn<I, S>(mut self, alpn: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.alpn = alpn.into_iter().map(Into::into).collect();
        self
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        format_authority(&self.host, self.port)
    }
}

#[inline]
pub(crate) fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

pub(crate) fn format_authority(host: &str, port: u16) -> String {
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl Param<ServerName<'static>> for TcpTlsAddr {
    #[inline]
    fn param(&self) -> ServerName<'static> {
        self.sn.clone()
    }
}

impl AsRef<ServerName<'static>> for TcpTlsAddr {
    #[inline]
    fn as_ref(&self) -> &ServerName<'static> {
        &self.sn
    }
}

impl ToSocketAddrs for TcpTlsAddr {
    type Iter = <(&'static str, u16) as ToSocketAddrs>::Iter;

    #[inline]
    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

impl TryFrom<&Uri> for TcpTlsAddr {
    type Error = crate::Error;

    #[inline]
    fn try_from(uri: &Uri) -> Result<Self, Self::Error> {
        let host = uri.host().ok_or(crate::Error::NoAuthority)?;
        let default_port = match uri.scheme() {
            Some(scheme) if scheme == &http::uri::Scheme::HTTP => 80,
            _ => 443,
        };
        TcpTlsAddr::new(host, uri.port_u16().unwrap_or(default_port))
    }
}

impl TryFrom<Uri> for TcpTlsAddr {
    type Error = crate::Error;

    #[inline]
    fn try_from(value: Uri) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}
