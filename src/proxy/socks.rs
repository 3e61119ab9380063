use monoio::net::TcpStream;
use monoio_compat::StreamWrapper;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

use super::{ProxyDescriptor, ProxyScheme};
use crate::{connectors::TcpTlsAddr, Result};

/// Run the SOCKS CONNECT handshake for `target` over `stream`.
///
/// Framing is left to `tokio-socks`. The compat wrapper may read ahead of
/// the reply, so only client-first protocols (TLS, HTTP) go through here.
pub(crate) async fn handshake(
    stream: TcpStream,
    proxy: &ProxyDescriptor,
    target: &TcpTlsAddr,
) -> Result<TcpStream> {
    let socket = StreamWrapper::new(stream);
    let dest = (target.host.as_str(), target.port);

    let socket = match proxy.scheme() {
        ProxyScheme::Socks4 => match proxy.username() {
            Some(user_id) => Socks4Stream::connect_with_userid_and_socket(socket, dest, user_id)
                .await?
                .into_inner(),
            None => Socks4Stream::connect_with_socket(socket, dest)
                .await?
                .into_inner(),
        },
        _ => match (proxy.username(), proxy.password()) {
            (Some(user), password) => Socks5Stream::connect_with_password_and_socket(
                socket,
                dest,
                user,
                password.unwrap_or_default(),
            )
            .await?
            .into_inner(),
            (None, _) => Socks5Stream::connect_with_socket(socket, dest)
                .await?
                .into_inner(),
        },
    };

    #[cfg(feature = "logging")]
    tracing::debug!("socks tunnel to {} established through {}", target.authority(), proxy);
    Ok(socket.into_inner())
}
