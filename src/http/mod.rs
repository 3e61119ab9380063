mod connection;
mod connector;

pub use connection::{Http1Connection, HttpConnection};
pub use connector::HttpConnector;
