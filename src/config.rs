//! Client configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved configuration for one turn: which backend to talk to and how to
/// authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base endpoint of the backend. The reserved vendor endpoint routes to
    /// the Anthropic-style dialect; anything else uses the native dialect.
    pub endpoint: String,
    /// Token for `Authorization: token <token>` (native dialect).
    pub access_token: Option<String>,
    /// Key for `X-API-Key` (Anthropic-style dialect).
    pub api_key: Option<String>,
    /// Headers applied to every request. Caller-supplied request headers win
    /// on collision.
    pub custom_headers: HashMap<String, String>,
    /// Whether the negotiated capability allows streaming. When false the
    /// client falls back to a single non-streaming POST.
    pub streaming_enabled: bool,
    /// Force temperature to zero on every request (deterministic sampling
    /// policy, e.g. for evaluation runs).
    pub temperature_zero: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://example.sourcegraph.test".into(),
            access_token: None,
            api_key: None,
            custom_headers: HashMap::new(),
            streaming_enabled: true,
            temperature_zero: false,
        }
    }
}

/// Source of the current configuration, re-resolved on every request so auth
/// or endpoint changes take effect on the very next call.
pub trait ConfigSource: Send + Sync {
    fn resolve(&self) -> ClientConfig;
}

impl ConfigSource for ClientConfig {
    fn resolve(&self) -> ClientConfig {
        self.clone()
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for Arc<T> {
    fn resolve(&self) -> ClientConfig {
        (**self).resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_streaming() {
        let config = ClientConfig::default();
        assert!(config.streaming_enabled);
        assert!(!config.temperature_zero);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_static_source_resolves_clone() {
        let mut config = ClientConfig::default();
        config.access_token = Some("tok".into());
        let resolved = ConfigSource::resolve(&config);
        assert_eq!(resolved.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"endpoint": "https://sg.example.com"}"#).unwrap();
        assert_eq!(config.endpoint, "https://sg.example.com");
        assert!(config.streaming_enabled);
    }
}
