use super::connection::HttpConnection;
use crate::{
    agent::{ConnectTarget, ProxyAgent},
    connectors::{Alpn, Connector},
};

/// Opens HTTP/1.1 connections through an agent.
#[derive(Clone, Debug)]
pub struct HttpConnector<A> {
    agent: A,
}

impl<A> HttpConnector<A> {
    pub fn new(agent: A) -> Self {
        Self { agent }
    }

    #[inline]
    pub fn agent(&self) -> &A {
        &self.agent
    }
}

impl<A: Default> Default for HttpConnector<A> {
    fn default() -> Self {
        HttpConnector::new(A::default())
    }
}

impl<'a, A> Connector<&'a ConnectTarget> for HttpConnector<A>
where
    A: ProxyAgent + Clone,
{
    type Connection = HttpConnection<A>;
    type Error = crate::Error;

    async fn connect(&self, key: &'a ConnectTarget) -> Result<Self::Connection, Self::Error> {
        let mut target = key.clone();
        // only h1 is spoken on top
        if target.tls {
            target.alpn = vec![Alpn::HTTP_11.into()];
        }
        let io = self.agent.create_connection(&target).await?;
        Ok(HttpConnection::new(self.agent.clone(), target, io))
    }
}
