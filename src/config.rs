use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::negotiation::{NegotiationContext, DEFAULT_CACHE_CAPACITY};

/// Knobs for protocol probing.
///
/// Loading it (file, env, flags) is up to the embedding application; any
/// serde format works.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Maximum number of remembered destinations.
    pub cache_capacity: usize,
    /// Protocols offered through ALPN, in preference order.
    pub alpn_protocols: Vec<String>,
    /// Deadline for connect + tunnel + TLS, in milliseconds when serialized.
    #[serde(deserialize_with = "deserialize_millis")]
    pub connect_timeout: Option<Duration>,
    /// Check certificates of the destinations requests are sent to.
    pub verify_certificates: bool,
    /// Check certificates on protocol probes. Probes only read the ALPN
    /// result, so this is off unless asked for.
    pub verify_probe_certificates: bool,
}

impl NegotiationConfig {
    #[inline]
    pub fn alpn(&self) -> Vec<&str> {
        self.alpn_protocols.iter().map(String::as_str).collect()
    }

    /// A fresh context sized by `cache_capacity`.
    #[inline]
    pub fn new_context(&self) -> NegotiationContext {
        NegotiationContext::new(self.cache_capacity)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            connect_timeout: None,
            verify_certificates: true,
            verify_probe_certificates: false,
        }
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = NegotiationConfig::default();
        assert_eq!(cfg.cache_capacity, 1000);
        assert_eq!(cfg.alpn(), vec!["h2", "http/1.1"]);
        assert!(cfg.verify_certificates);
        assert!(!cfg.verify_probe_certificates);
        assert!(cfg.connect_timeout.is_none());
    }

    #[test]
    fn deserialize_partial() {
        let cfg: NegotiationConfig =
            serde_json::from_str(r#"{"cache_capacity": 16, "connect_timeout": 1500}"#).unwrap();
        assert_eq!(cfg.cache_capacity, 16);
        assert_eq!(cfg.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.alpn_protocols, vec!["h2", "http/1.1"]);

        let cfg: NegotiationConfig = serde_json::from_str(r#"{"connect_timeout": null}"#).unwrap();
        assert!(cfg.connect_timeout.is_none());

        let cfg: NegotiationConfig = serde_json::from_str(
            r#"{"verify_certificates": false, "verify_probe_certificates": true}"#,
        )
        .unwrap();
        assert!(!cfg.verify_certificates);
        assert!(cfg.verify_probe_certificates);
    }
}
