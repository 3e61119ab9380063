use http::{header::HOST, HeaderValue, Response};
use monoio::io::{
    sink::{Sink, SinkExt},
    stream::Stream,
    AsyncReadRent, AsyncWriteRent,
};
use monoio_http::{
    common::{
        body::{Body, HttpBody},
        error::HttpError,
    },
    h1::{
        codec::{
            decoder::{DecodeError, PayloadDecoder},
            ClientCodec,
        },
        payload::{fixed_payload_pair, stream_payload_pair, Payload},
    },
};

use crate::{
    agent::{AgentStream, ConnectTarget, ProxyAgent},
    connectors::{TransportConnMeta, TransportConnMetadata},
    Result,
};

pub struct Http1Connection<IO: AsyncWriteRent> {
    framed: ClientCodec<IO>,
    open: bool,
}

impl<IO: AsyncWriteRent> Http1Connection<IO> {
    pub fn new(framed: ClientCodec<IO>) -> Self {
        Self { framed, open: true }
    }

    /// False once a send or decode failed; the connection is not reusable.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl<IO: AsyncReadRent + AsyncWriteRent> Http1Connection<IO> {
    pub async fn send_request<R, E>(
        &mut self,
        request: R,
    ) -> std::result::Result<Response<HttpBody>, HttpError>
    where
        ClientCodec<IO>: Sink<R, Error = E>,
        E: std::fmt::Debug + Into<HttpError>,
    {
        let handle = &mut self.framed;

        if let Err(e) = handle.send_and_flush(request).await {
            #[cfg(feature = "logging")]
            tracing::error!("send upstream request error {:?}", e);
            self.open = false;
            return Err(e.into());
        }

        match handle.next().await {
            Some(Ok(resp)) => {
                let (parts, payload_decoder) = resp.into_parts();
                match payload_decoder {
                    PayloadDecoder::None => {
                        let payload = Payload::None;
                        Ok(Response::from_parts(parts, payload.into()))
                    }
                    PayloadDecoder::Fixed(_) => {
                        let mut framed_payload = payload_decoder.with_io(handle);
                        let (payload, payload_sender) = fixed_payload_pair();
                        if let Some(data) = framed_payload.next_data().await {
                            payload_sender.feed(data)
                        }
                        let payload = Payload::Fixed(payload);
                        Ok(Response::from_parts(parts, payload.into()))
                    }
                    PayloadDecoder::Streamed(_) => {
                        let mut framed_payload = payload_decoder.with_io(handle);
                        let (payload, mut payload_sender) = stream_payload_pair();
                        loop {
                            match framed_payload.next_data().await {
                                Some(Ok(data)) => payload_sender.feed_data(Some(data)),
                                Some(Err(e)) => {
                                    #[cfg(feature = "logging")]
                                    tracing::error!("decode upstream response error {:?}", e);
                                    self.open = false;
                                    return Err(e);
                                }
                                None => {
                                    payload_sender.feed_data(None);
                                    break;
                                }
                            }
                        }
                        let payload = Payload::Stream(payload);
                        Ok(Response::from_parts(parts, payload.into()))
                    }
                }
            }
            Some(Err(e)) => {
                #[cfg(feature = "logging")]
                tracing::error!("decode upstream response error {:?}", e);
                self.open = false;
                Err(e)
            }
            None => {
                #[cfg(feature = "logging")]
                tracing::error!("upstream return eof");
                self.open = false;
                Err(DecodeError::UnexpectedEof.into())
            }
        }
    }
}

/// An HTTP/1.1 connection obtained through an agent.
///
/// Every request goes through the agent's
/// [`ProxyAgent::prepare_request`] before it is encoded, so relayed requests
/// carry their absolute target and proxy credentials.
pub struct HttpConnection<A> {
    agent: A,
    target: ConnectTarget,
    meta: TransportConnMeta,
    conn: Http1Connection<AgentStream>,
}

impl<A: ProxyAgent> HttpConnection<A> {
    pub(crate) fn new(agent: A, target: ConnectTarget, io: AgentStream) -> Self {
        Self {
            agent,
            target,
            meta: io.get_conn_metadata(),
            conn: Http1Connection::new(ClientCodec::new(io)),
        }
    }

    #[inline]
    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    pub async fn send_request(
        &mut self,
        mut request: http::Request<HttpBody>,
    ) -> Result<Response<HttpBody>> {
        if !request.headers().contains_key(HOST) {
            let host = HeaderValue::from_str(&self.target.origin_authority())
                .map_err(http::Error::from)?;
            request.headers_mut().insert(HOST, host);
        }
        self.agent.prepare_request(&mut request, &self.target)?;
        Ok(self.conn.send_request(request).await?)
    }
}

impl<A> TransportConnMetadata for HttpConnection<A> {
    type Metadata = TransportConnMeta;

    fn get_conn_metadata(&self) -> Self::Metadata {
        self.meta
    }
}
