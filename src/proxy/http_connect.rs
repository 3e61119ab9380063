use std::io;

use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt};

use super::ProxyDescriptor;
use crate::{Error, Result};

const READ_BUF_SIZE: usize = 4 * 1024;
const MAX_RESPONSE_HEAD: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;
const EXCERPT_LEN: usize = 100;

pub(crate) fn connect_request(authority: &str, basic_auth: Option<&str>) -> String {
    let mut req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(basic) = basic_auth {
        req.push_str("Proxy-Authorization: ");
        req.push_str(basic);
        req.push_str("\r\nAuthorization: ");
        req.push_str(basic);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req
}

/// Decide on a complete CONNECT response head.
///
/// `trailing` is whatever the proxy sent after the blank line. A tunnel must
/// start clean, so any byte there fails the handshake even with a 200.
pub(crate) fn check_response(status: u16, trailing: &[u8]) -> Result<()> {
    if status == 200 && trailing.is_empty() {
        return Ok(());
    }
    if status == 401 || status == 407 {
        return Err(Error::ProxyAuth { status });
    }
    let excerpt = &trailing[..trailing.len().min(EXCERPT_LEN)];
    Err(Error::ProxyTunnel {
        status,
        excerpt: String::from_utf8_lossy(excerpt).into_owned(),
    })
}

/// Issue `CONNECT authority` on `io` and wait for the proxy's answer.
///
/// On success the stream is returned positioned at the first tunnelled
/// byte. On any failure the stream is closed before the error is returned.
pub async fn connect_tunnel<IO>(mut io: IO, proxy: &ProxyDescriptor, authority: &str) -> Result<IO>
where
    IO: AsyncReadRent + AsyncWriteRent,
{
    let basic = proxy.basic_auth();
    let request = connect_request(authority, basic.as_deref());
    let (res, _) = io.write_all(request.into_bytes()).await;
    res?;

    let ResponseHead {
        status,
        content_length,
        mut trailing,
    } = read_response_head(&mut io).await?;
    if status != 200 {
        read_excerpt(&mut io, content_length, &mut trailing).await;
    }
    if let Err(e) = check_response(status, &trailing) {
        #[cfg(feature = "logging")]
        tracing::warn!(
            "proxy {} refused CONNECT {}: status {}, {} trailing bytes",
            proxy,
            authority,
            status,
            trailing.len()
        );
        drop(io);
        return Err(e);
    }

    #[cfg(feature = "logging")]
    tracing::debug!("tunnel to {} established through {}", authority, proxy);
    Ok(io)
}

struct ResponseHead {
    status: u16,
    content_length: Option<usize>,
    /// Bytes received past the blank line.
    trailing: Vec<u8>,
}

async fn read_response_head<IO: AsyncReadRent>(io: &mut IO) -> Result<ResponseHead> {
    let mut head = Vec::with_capacity(READ_BUF_SIZE);
    let mut buf = Vec::with_capacity(READ_BUF_SIZE);
    loop {
        let (res, b) = io.read(buf).await;
        buf = b;
        let n = res?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed the connection before answering CONNECT",
            )
            .into());
        }
        head.extend_from_slice(&buf[..n]);
        buf.clear();

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&head) {
            Ok(httparse::Status::Complete(len)) => {
                let status = response.code.unwrap_or_default();
                let content_length = response
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse().ok());
                return Ok(ResponseHead {
                    status,
                    content_length,
                    trailing: head.split_off(len),
                });
            }
            Ok(httparse::Status::Partial) if head.len() < MAX_RESPONSE_HEAD => continue,
            Ok(httparse::Status::Partial) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "proxy CONNECT response head too large",
                )
                .into())
            }
            Err(e) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e).into());
            }
        }
    }
}

/// Top up `body` to the excerpt length from a refusal's announced body.
///
/// Only a `Content-Length` body is waited for; without one the proxy may
/// never send more. Read errors end the excerpt early.
async fn read_excerpt<IO: AsyncReadRent>(
    io: &mut IO,
    content_length: Option<usize>,
    body: &mut Vec<u8>,
) {
    let want = content_length.unwrap_or(0).min(EXCERPT_LEN);
    while body.len() < want {
        let (res, buf) = io.read(Vec::with_capacity(want - body.len())).await;
        match res {
            Ok(n) if n > 0 => body.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }
}
