//! Per-destination ALPN negotiation memory.
//!
//! A destination is probed at most once at a time: the first caller for a
//! [`NegotiationKey`] runs the TLS handshake, later callers join its outcome.
//! Successful outcomes land in a bounded LRU [`ProtocolCache`]; failures
//! only wake the joiners and are forgotten.
mod cache;
mod context;
mod pending;
mod resolver;

use std::fmt;

pub use cache::ProtocolCache;
pub use context::{NegotiationContext, PendingGuard, Reservation, Waiter};
pub use pending::{Outcome, PendingRegistry};
pub use resolver::{ProbeConnector, ProtocolResolver, Resolved};
use smol_str::SmolStr;

use crate::connectors::TcpTlsAddr;

pub(crate) use cache::DEFAULT_CACHE_CAPACITY;

/// Identifies one negotiation slot: `host:port:` followed by the sorted
/// candidate protocols joined with `,`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NegotiationKey(SmolStr);

impl NegotiationKey {
    pub fn new<S: AsRef<str>>(host: &str, port: u16, alpn: &[S]) -> Self {
        let mut protocols: Vec<&str> = alpn.iter().map(AsRef::as_ref).collect();
        protocols.sort_unstable();
        Self(SmolStr::from(format!(
            "{}:{}:{}",
            host,
            port,
            protocols.join(",")
        )))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&TcpTlsAddr> for NegotiationKey {
    #[inline]
    fn from(addr: &TcpTlsAddr) -> Self {
        NegotiationKey::new(&addr.host, addr.port, &addr.alpn)
    }
}

impl fmt::Display for NegotiationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_candidate_order() {
        let a = NegotiationKey::new("example.com", 443, &["h2", "http/1.1"]);
        let b = NegotiationKey::new("example.com", 443, &["http/1.1", "h2"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "example.com:443:h2,http/1.1");

        let other_port = NegotiationKey::new("example.com", 8443, &["h2", "http/1.1"]);
        assert_ne!(a, other_port);
        let fewer = NegotiationKey::new("example.com", 443, &["http/1.1"]);
        assert_ne!(a, fewer);
    }

    #[test]
    fn key_from_addr() {
        let addr = TcpTlsAddr::new("example.com", 443)
            .unwrap()
            .with_alpn(["http/1.1", "h2"]);
        assert_eq!(NegotiationKey::from(&addr).to_string(), "example.com:443:h2,http/1.1");
    }
}
