use std::{
    io,
    net::ToSocketAddrs,
    path::{Path, PathBuf},
};

use monoio::net::{TcpStream, UnixStream};
use smol_str::SmolStr;

use super::{delegate_io, Connector, TransportConnMeta, TransportConnMetadata};

/// Plain TCP. Every resolved address is tried in order, the last failure
/// is reported if none accepts.
#[derive(Clone, Copy, Debug)]
pub struct TcpConnector {
    pub no_delay: bool,
}

impl TcpConnector {
    #[inline]
    pub const fn new() -> Self {
        Self { no_delay: true }
    }
}

impl Default for TcpConnector {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToSocketAddrs> Connector<T> for TcpConnector {
    type Connection = TcpStream;
    type Error = io::Error;

    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        let mut last_err = None;
        for addr in key.to_socket_addrs()? {
            match TcpStream::connect_addr(addr).await {
                Ok(io) => {
                    if self.no_delay {
                        // nodelay failing is not worth losing the connection
                        let _ = io.set_nodelay(true);
                    }
                    return Ok(io);
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
        }))
    }
}

/// Local stream sockets, used for targets that bypass the network.
#[derive(Default, Clone, Copy, Debug)]
pub struct UnixConnector;

impl<P: AsRef<Path>> Connector<P> for UnixConnector {
    type Connection = UnixStream;
    type Error = io::Error;

    #[inline]
    async fn connect(&self, key: P) -> Result<Self::Connection, Self::Error> {
        UnixStream::connect(key).await
    }
}

/// Connects either to a host over TCP or to a local socket path.
#[derive(Default, Clone, Copy, Debug)]
pub struct UnifiedL4Connector {
    tcp: TcpConnector,
    unix: UnixConnector,
}

impl UnifiedL4Connector {
    #[inline]
    pub const fn new(tcp: TcpConnector) -> Self {
        Self {
            tcp,
            unix: UnixConnector,
        }
    }
}

/// A host name is kept unresolved until connect time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnifiedL4Addr {
    Tcp(SmolStr, u16),
    Unix(PathBuf),
}

impl AsRef<UnifiedL4Addr> for UnifiedL4Addr {
    #[inline]
    fn as_ref(&self) -> &UnifiedL4Addr {
        self
    }
}

impl std::fmt::Display for UnifiedL4Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnifiedL4Addr::Tcp(host, port) => f.write_str(&super::format_authority(host, *port)),
            UnifiedL4Addr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl<T: AsRef<UnifiedL4Addr>> Connector<T> for UnifiedL4Connector {
    type Connection = UnifiedL4Stream;
    type Error = io::Error;

    #[inline]
    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        match key.as_ref() {
            UnifiedL4Addr::Tcp(host, port) => self
                .tcp
                .connect((host.as_str(), *port))
                .await
                .map(UnifiedL4Stream::Tcp),
            UnifiedL4Addr::Unix(path) => self.unix.connect(path).await.map(UnifiedL4Stream::Unix),
        }
    }
}

#[derive(Debug)]
pub enum UnifiedL4Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

delegate_io!(UnifiedL4Stream { Tcp, Unix });

// Plain sockets negotiate nothing.
macro_rules! no_metadata {
    ($($ty:ty),+) => {
        $(
            impl TransportConnMetadata for $ty {
                type Metadata = TransportConnMeta;

                #[inline]
                fn get_conn_metadata(&self) -> Self::Metadata {
                    TransportConnMeta::default()
                }
            }
        )+
    };
}

no_metadata!(TcpStream, UnixStream, UnifiedL4Stream);
