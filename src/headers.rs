//! Browser-like request headers picked by negotiated HTTP version.
//!
//! Header generation itself is pluggable ([`HeaderGenerator`]). This module
//! decides which version to generate for, remembers per-session header sets
//! and merges caller overrides on top.
use std::{cell::RefCell, collections::HashMap, rc::Rc};

use http::Uri;

use crate::{
    config::NegotiationConfig,
    connectors::{Alpn, Connector, TcpTlsAddr, TransportConnMeta, TransportConnMetadata},
    negotiation::{NegotiationContext, ProtocolResolver},
    Error, SharedError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    Http1,
    Http2,
}

impl HttpVersion {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http1 => "1",
            HttpVersion::Http2 => "2",
        }
    }
}

impl From<Alpn> for HttpVersion {
    #[inline]
    fn from(alpn: Alpn) -> Self {
        if alpn.is_h2() {
            HttpVersion::Http2
        } else {
            HttpVersion::Http1
        }
    }
}

/// Ordered header name/value pairs.
pub type HeaderList = Vec<(String, String)>;

pub trait HeaderGenerator {
    type Options;

    fn get_headers(&self, version: HttpVersion, options: &Self::Options) -> HeaderList;
}

/// Merge `overrides` into `original`, comparing names case-insensitively.
///
/// An override replaces the value and the name text of the header it
/// matches, at that header's position; unmatched overrides are appended. An
/// override with no value removes the header.
pub fn merge_headers<I, K, V>(original: &[(String, String)], overrides: I) -> HeaderList
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut merged: Vec<(String, Option<String>)> = Vec::with_capacity(original.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(original.len());

    let mut set = |name: String, value: Option<String>| {
        let lower = name.to_ascii_lowercase();
        match index.get(&lower) {
            Some(&i) => merged[i] = (name, value),
            None => {
                index.insert(lower, merged.len());
                merged.push((name, value));
            }
        }
    };

    for (name, value) in original {
        set(name.clone(), Some(value.clone()));
    }
    for (name, value) in overrides {
        set(name.into(), value.map(Into::into));
    }

    merged
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
}

struct StoredHeaders {
    h1: HeaderList,
    h2: HeaderList,
}

/// Headers generated once for a session, one set per HTTP version, so every
/// request of the session presents the same browser.
#[derive(Default)]
pub struct SessionHeaders {
    stored: RefCell<Option<StoredHeaders>>,
}

impl SessionHeaders {
    pub fn get_or_generate<G: HeaderGenerator>(
        &self,
        generator: &G,
        options: &G::Options,
        version: HttpVersion,
    ) -> HeaderList {
        let mut stored = self.stored.borrow_mut();
        let stored = stored.get_or_insert_with(|| StoredHeaders {
            h1: generator.get_headers(HttpVersion::Http1, options),
            h2: generator.get_headers(HttpVersion::Http2, options),
        });
        match version {
            HttpVersion::Http1 => stored.h1.clone(),
            HttpVersion::Http2 => stored.h2.clone(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stored.borrow().is_none()
    }

    /// Drop the stored sets. Returns whether there were any.
    pub fn remove(&self) -> bool {
        self.stored.borrow_mut().take().is_some()
    }
}

/// One logical browsing session: its own negotiation memory and its own
/// generated headers. [`Session::end`] releases both; so does dropping it.
pub struct Session {
    context: NegotiationContext,
    headers: SessionHeaders,
}

impl Session {
    pub fn new(config: &NegotiationConfig) -> Self {
        Self::with_context(config.new_context())
    }

    pub fn with_context(context: NegotiationContext) -> Self {
        Self {
            context,
            headers: SessionHeaders::default(),
        }
    }

    #[inline]
    pub fn context(&self) -> &NegotiationContext {
        &self.context
    }

    #[inline]
    pub fn headers(&self) -> &SessionHeaders {
        &self.headers
    }

    pub fn end(&self) {
        self.headers.remove();
        self.context.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&NegotiationConfig::default())
    }
}

/// Generates headers matching the protocol a destination will speak.
pub struct BrowserHeaders<G: HeaderGenerator> {
    generator: G,
    options: G::Options,
}

impl<G: HeaderGenerator> BrowserHeaders<G> {
    pub fn new(generator: G, options: G::Options) -> Self {
        Self { generator, options }
    }

    /// Headers for a request to `uri`, `overrides` merged on top.
    ///
    /// HTTPS destinations are resolved first (candidates `h2`, `http/1.1`)
    /// and get HTTP/2 headers iff they pick `h2`; anything else gets
    /// HTTP/1 headers. With a `session`, both its negotiation memory and its
    /// stored headers are used.
    pub async fn headers_for<C, S, I, K, V>(
        &self,
        uri: &Uri,
        overrides: I,
        resolver: &ProtocolResolver<C>,
        session: Option<&Session>,
    ) -> Result<HeaderList, SharedError>
    where
        C: for<'a> Connector<&'a TcpTlsAddr, Connection = S, Error = Error>,
        S: TransportConnMetadata<Metadata = TransportConnMeta>,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let version = if uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
            let target = TcpTlsAddr::try_from(uri)
                .map_err(Rc::new)?
                .with_alpn([Alpn::H2, Alpn::HTTP_11]);
            let context = session.map_or(resolver.context(), Session::context);
            let resolved = resolver.resolve_in(context, &target, None).await?;
            HttpVersion::from(resolved.protocol)
        } else {
            HttpVersion::Http1
        };

        let generated = match session {
            Some(session) => {
                session
                    .headers()
                    .get_or_generate(&self.generator, &self.options, version)
            }
            None => self.generator.get_headers(version, &self.options),
        };
        Ok(merge_headers(&generated, overrides))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct FakeGenerator {
        calls: Cell<usize>,
    }

    impl HeaderGenerator for FakeGenerator {
        type Options = String;

        fn get_headers(&self, version: HttpVersion, options: &String) -> HeaderList {
            self.calls.set(self.calls.get() + 1);
            vec![
                (
                    "User-Agent".to_string(),
                    format!("{options}/{}", version.as_str()),
                ),
                ("X-Test".to_string(), "a".to_string()),
            ]
        }
    }

    struct H2Stream;

    impl TransportConnMetadata for H2Stream {
        type Metadata = TransportConnMeta;

        fn get_conn_metadata(&self) -> Self::Metadata {
            let mut meta = TransportConnMeta::default();
            meta.set_alpn(Some(b"h2".to_vec()));
            meta
        }
    }

    struct H2Connector {
        probes: Cell<usize>,
    }

    impl<'a> Connector<&'a TcpTlsAddr> for H2Connector {
        type Connection = H2Stream;
        type Error = Error;

        async fn connect(&self, _key: &'a TcpTlsAddr) -> Result<Self::Connection, Self::Error> {
            self.probes.set(self.probes.get() + 1);
            Ok(H2Stream)
        }
    }

    fn resolver() -> ProtocolResolver<H2Connector> {
        ProtocolResolver::new(H2Connector {
            probes: Cell::new(0),
        })
        .with_context(NegotiationContext::new(8))
    }

    #[test]
    fn merge_is_case_insensitive() {
        let original = vec![("X-Test".to_string(), "a".to_string())];
        let merged = merge_headers(&original, [("x-test", Some("b"))]);
        assert_eq!(merged, vec![("x-test".to_string(), "b".to_string())]);
    }

    #[test]
    fn merge_keeps_position_appends_and_removes() {
        let original = vec![
            ("Accept".to_string(), "*/*".to_string()),
            ("User-Agent".to_string(), "ua".to_string()),
            ("Accept-Language".to_string(), "en".to_string()),
        ];
        let merged = merge_headers(
            &original,
            [
                ("user-agent", Some("custom")),
                ("accept-language", None),
                ("X-Extra", Some("1")),
            ],
        );
        assert_eq!(
            merged,
            vec![
                ("Accept".to_string(), "*/*".to_string()),
                ("user-agent".to_string(), "custom".to_string()),
                ("X-Extra".to_string(), "1".to_string()),
            ]
        );
    }

    #[monoio::test]
    async fn plain_http_skips_resolution() {
        let headers = BrowserHeaders::new(FakeGenerator::default(), "chrome".to_string());
        let resolver = resolver();
        let uri: Uri = "http://example.com/".parse().unwrap();
        let list = headers
            .headers_for(&uri, [("x-test", Some("b"))], &resolver, None)
            .await
            .unwrap();

        assert_eq!(resolver.connector().probes.get(), 0);
        assert_eq!(
            list,
            vec![
                ("User-Agent".to_string(), "chrome/1".to_string()),
                ("x-test".to_string(), "b".to_string()),
            ]
        );
    }

    #[monoio::test]
    async fn https_uses_negotiated_version() {
        let headers = BrowserHeaders::new(FakeGenerator::default(), "chrome".to_string());
        let resolver = resolver();
        let uri: Uri = "https://example.com/".parse().unwrap();
        let no_overrides: [(&str, Option<&str>); 0] = [];

        let list = headers
            .headers_for(&uri, no_overrides, &resolver, None)
            .await
            .unwrap();
        assert_eq!(list[0].1, "chrome/2");
        assert_eq!(resolver.connector().probes.get(), 1);
    }

    #[monoio::test]
    async fn session_reuses_headers_until_ended() {
        let headers = BrowserHeaders::new(FakeGenerator::default(), "chrome".to_string());
        let resolver = resolver();
        let session = Session::with_context(NegotiationContext::new(8));
        let https: Uri = "https://example.com/".parse().unwrap();
        let http: Uri = "http://example.com/".parse().unwrap();
        let none: [(&str, Option<&str>); 0] = [];

        let h2 = headers
            .headers_for(&https, none, &resolver, Some(&session))
            .await
            .unwrap();
        let h1 = headers
            .headers_for(&http, none, &resolver, Some(&session))
            .await
            .unwrap();
        assert_eq!(h2[0].1, "chrome/2");
        assert_eq!(h1[0].1, "chrome/1");
        // both versions generated once, up front
        assert_eq!(headers.generator.calls.get(), 2);
        assert_eq!(session.context().cached_len(), 1);
        assert_eq!(resolver.context().cached_len(), 0);

        session.end();
        assert!(session.headers().is_empty());
        assert_eq!(session.context().cached_len(), 0);
    }
}
