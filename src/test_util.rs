//! Fixtures for the socket tests.
use std::sync::Arc;

use monoio::io::AsyncReadRent;
use monoio_rustls::TlsAcceptor;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Server side of a TLS session with a self-signed certificate for
/// `localhost` and `127.0.0.1`. No root store trusts it.
pub(crate) fn self_signed_acceptor() -> TlsAcceptor {
    let cert = CertificateDer::from(include_bytes!("../testdata/localhost.cert.der").to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        include_bytes!("../testdata/localhost.key.der").to_vec(),
    ));
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Read up to and including the blank line ending a request head.
pub(crate) async fn read_head<IO: AsyncReadRent>(conn: &mut IO) -> String {
    let mut seen = Vec::new();
    while !seen.ends_with(b"\r\n\r\n") {
        let (res, buf) = conn.read(Vec::with_capacity(1024)).await;
        let n = res.unwrap();
        assert!(n > 0, "peer closed before finishing the request head");
        seen.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(seen).unwrap()
}
