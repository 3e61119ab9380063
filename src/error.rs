use std::rc::Rc;

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("proxy rejected credentials with status {status}")]
    ProxyAuth { status: u16 },
    #[error("proxy responded with {status}: {excerpt}")]
    ProxyTunnel { status: u16, excerpt: String },
    #[error("socks handshake error {0}")]
    SocksHandshake(#[from] tokio_socks::Error),
    #[error("negotiation timed out")]
    Timeout,
    #[error("tls error {0}")]
    Tls(#[from] monoio_rustls::TlsError),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid proxy url {0}")]
    InvalidProxyUrl(#[from] ProxyUrlError),
    #[error("invalid dns name {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),
    #[error("negotiation cancelled before it settled")]
    Cancelled,
    #[error("http header error {0}")]
    Http(#[from] http::Error),
    #[error("http codec error {0}")]
    HttpCodec(#[from] monoio_http::common::error::HttpError),
    #[error("missing authority in uri")]
    NoAuthority,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error shared by every waiter of one negotiation.
pub type SharedError = Rc<Error>;

impl Error {
    /// Whether the proxy refused us because of credentials.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::ProxyAuth { .. })
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<monoio::time::error::Elapsed> for Error {
    #[inline]
    fn from(_: monoio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

#[derive(ThisError, Debug)]
pub enum ProxyUrlError {
    #[error("parse error {0}")]
    Parse(#[from] url::ParseError),
    #[error("scheme {0} not supported")]
    UnsupportedScheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("invalid percent encoding in credentials")]
    InvalidEncoding,
}
