mod error;
pub use error::{Error, ProxyUrlError, Result, SharedError};

pub mod agent;
pub mod config;
pub mod connectors;
pub mod headers;
pub mod http;
pub mod negotiation;
pub mod proxy;

#[cfg(test)]
mod test_util;
