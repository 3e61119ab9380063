/// Implements the monoio IO traits and `Split` for an enum of streams by
/// forwarding to the variant it holds.
macro_rules! delegate_io {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl monoio::io::AsyncReadRent for $ty {
            #[inline]
            async fn read<T: monoio::buf::IoBufMut>(
                &mut self,
                buf: T,
            ) -> monoio::BufResult<usize, T> {
                match self {
                    $($ty::$variant(inner) => monoio::io::AsyncReadRent::read(inner, buf).await,)+
                }
            }

            #[inline]
            async fn readv<T: monoio::buf::IoVecBufMut>(
                &mut self,
                buf: T,
            ) -> monoio::BufResult<usize, T> {
                match self {
                    $($ty::$variant(inner) => monoio::io::AsyncReadRent::readv(inner, buf).await,)+
                }
            }
        }

        impl monoio::io::AsyncWriteRent for $ty {
            #[inline]
            async fn write<T: monoio::buf::IoBuf>(
                &mut self,
                buf: T,
            ) -> monoio::BufResult<usize, T> {
                match self {
                    $($ty::$variant(inner) => monoio::io::AsyncWriteRent::write(inner, buf).await,)+
                }
            }

            #[inline]
            async fn writev<T: monoio::buf::IoVecBuf>(
                &mut self,
                buf_vec: T,
            ) -> monoio::BufResult<usize, T> {
                match self {
                    $($ty::$variant(inner) => {
                        monoio::io::AsyncWriteRent::writev(inner, buf_vec).await
                    })+
                }
            }

            #[inline]
            async fn flush(&mut self) -> std::io::Result<()> {
                match self {
                    $($ty::$variant(inner) => monoio::io::AsyncWriteRent::flush(inner).await,)+
                }
            }

            #[inline]
            async fn shutdown(&mut self) -> std::io::Result<()> {
                match self {
                    $($ty::$variant(inner) => monoio::io::AsyncWriteRent::shutdown(inner).await,)+
                }
            }
        }

        // Every variant is a full-duplex socket or a TLS session over one.
        unsafe impl monoio::io::Split for $ty {}
    };
}
pub(crate) use delegate_io;

mod l4_connector;
mod tls_connector;

use std::{future::Future, time::Duration};

pub use l4_connector::*;
pub use tls_connector::*;

pub trait Connector<K> {
    type Connection;
    type Error;

    fn connect(&self, key: K) -> impl Future<Output = Result<Self::Connection, Self::Error>>;
}

pub trait ConnectorExt<K>: Connector<K> {
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>;
}

impl<K, T: Connector<K>> ConnectorExt<K> for T {
    #[inline]
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>
    {
        monoio::time::timeout(timeout, self.connect(key))
    }
}

/// Run `fut` under `timeout`, when there is one.
///
/// Expiry drops `fut` together with any socket it owns.
pub(crate) async fn within<T, E, F>(timeout: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<monoio::time::error::Elapsed>,
{
    match timeout {
        Some(timeout) => monoio::time::timeout(timeout, fut).await?,
        None => fut.await,
    }
}

/// `TransportConnMetadata` is a trait that provides additional information about the connection.
/// This is useful for transport connectors like TLS, TCP, UDS etc.
///
/// The protocol resolver reads the negotiated ALPN through it once the
/// handshake finished.
pub trait TransportConnMetadata {
    type Metadata;

    /// Retrieves the metadata from the connection.
    fn get_conn_metadata(&self) -> Self::Metadata;
}

/// Application protocol selected during the TLS handshake.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Alpn {
    HTTP2,
    HTTP11,
    #[default]
    None,
}

impl Alpn {
    pub const H2: &'static str = "h2";
    pub const HTTP_11: &'static str = "http/1.1";

    #[inline]
    pub fn from_protocol(protocol: &[u8]) -> Self {
        match protocol {
            b"h2" => Alpn::HTTP2,
            b"http/1.1" => Alpn::HTTP11,
            _ => Alpn::None,
        }
    }

    /// Protocol as recorded in the negotiation cache.
    ///
    /// A handshake that completed without any selection speaks HTTP/1.1.
    #[inline]
    pub fn negotiated(self) -> Self {
        match self {
            Alpn::None => Alpn::HTTP11,
            other => other,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Alpn::HTTP2 => Self::H2,
            Alpn::HTTP11 | Alpn::None => Self::HTTP_11,
        }
    }

    #[inline]
    pub fn is_h2(&self) -> bool {
        matches!(self, Alpn::HTTP2)
    }
}

impl std::fmt::Display for Alpn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `TransportConnMeta` is a struct that holds metadata for a transport connection.
/// It currently only holds the `Alpn` protocol.
#[derive(Default, Copy, Clone, Debug)]
pub struct TransportConnMeta {
    alpn: Alpn,
}

impl TransportConnMeta {
    pub fn set_alpn(&mut self, alpn: Option<Vec<u8>>) {
        self.alpn = match alpn {
            Some(p) => Alpn::from_protocol(&p),
            None => Alpn::None,
        }
    }

    #[inline]
    pub fn alpn(&self) -> Alpn {
        self.alpn
    }

    pub fn is_alpn_h2(&self) -> bool {
        self.alpn.is_h2()
    }
}
