//! Bridge configuration.
//!
//! The core only reads what presence handling and the store contract need.
//! Loading from files and environment happens in `perch-server`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::BridgeError;

/// Component connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Component domain (the JID the bridge answers as)
    pub domain: String,
    /// Host of the XMPP server's component listener
    pub host: String,
    /// Port of the XMPP server's component listener
    pub port: u16,
    /// Shared secret for the component handshake
    pub secret: String,
    /// Status text sent with the bridge's own presence
    pub status: String,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            host: "localhost".to_string(),
            port: 5288,
            secret: "secret".to_string(),
            status: String::new(),
        }
    }
}

impl ComponentConfig {
    /// Check that the fields required for a session are present.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.domain.trim().is_empty() {
            return Err(BridgeError::config("component.domain must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(BridgeError::config("component.host must not be empty"));
        }
        if self.port == 0 {
            return Err(BridgeError::config("component.port must not be 0"));
        }
        if self.secret.is_empty() {
            return Err(BridgeError::config("component.secret must not be empty"));
        }
        Ok(())
    }

    /// Address of the component listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log the effective configuration (secret redacted).
    pub fn log_config(&self) {
        info!(
            domain = %self.domain,
            host = %self.host,
            port = self.port,
            status = %self.status,
            "Component configuration"
        );
    }
}

/// Which content store implementation backs the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, contents lost on exit.
    #[default]
    Memory,
    /// Remote store reached over HTTP.
    Http,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "http" | "https" => Ok(StoreBackend::Http),
            other => Err(BridgeError::config(format!("unknown store backend '{}'", other))),
        }
    }
}

/// Content store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store implementation
    pub backend: StoreBackend,
    /// Base URL of the HTTP store (ignored by the memory backend)
    pub base_url: String,
    /// Deadline for one store call, in milliseconds
    pub timeout_ms: u64,
    /// Query parameter carrying the requested page size
    pub page_size_param: String,
    /// Content type of published payloads
    pub content_type: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            base_url: "http://localhost:3000/".to_string(),
            timeout_ms: 5_000,
            page_size_param: "limit".to_string(),
            content_type: "application/xml".to_string(),
        }
    }
}

impl StoreConfig {
    /// Per-call deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the store settings.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.timeout_ms == 0 {
            return Err(BridgeError::config("store.timeout_ms must be greater than 0"));
        }
        if self.page_size_param.is_empty() {
            return Err(BridgeError::config("store.page_size_param must not be empty"));
        }
        if self.backend == StoreBackend::Http {
            url::Url::parse(&self.base_url).map_err(|e| {
                BridgeError::config(format!("store.base_url '{}' is invalid: {}", self.base_url, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_component_config_is_valid() {
        assert!(ComponentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_component_config_rejects_empty_secret() {
        let config = ComponentConfig {
            secret: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_component_config_rejects_port_zero() {
        let config = ComponentConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_backend_from_str() {
        assert_eq!("HTTP".parse::<StoreBackend>().unwrap(), StoreBackend::Http);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_http_store_requires_valid_url() {
        let config = StoreConfig {
            backend: StoreBackend::Http,
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(StoreConfig::default().timeout(), Duration::from_secs(5));
    }
}
