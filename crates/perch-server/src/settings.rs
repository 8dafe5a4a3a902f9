//! Process settings.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults (`ComponentConfig::default()`, `StoreConfig::default()`)
//! 2. Optional TOML file passed with `--config`
//! 3. Environment variables prefixed `PERCH__`, e.g. `PERCH__COMPONENT__SECRET`
//!    or `PERCH__STORE__BASE_URL`

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use perch_xmpp::{ComponentConfig, StoreConfig};
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PERCH";

/// Everything the process needs to run a bridge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// XMPP component session
    pub component: ComponentConfig,
    /// Content store
    pub store: StoreConfig,
}

impl Settings {
    /// Load settings from defaults, `path` and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(settings)
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<()> {
        self.component.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_xmpp::StoreBackend;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let settings = Settings::load_with_env(None, "PERCH_TEST_UNSET").unwrap();

        assert_eq!(settings.component.port, 5288);
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.store.page_size_param, "limit");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[component]
domain = "pubsub.example.com"
secret = "s3cret"
status = "Bridging notes"

[store]
backend = "http"
base_url = "http://notes.internal:8080/"
timeout_ms = 1500
"#
        )
        .unwrap();

        let settings = Settings::load_with_env(Some(file.path()), "PERCH_TEST_FILE").unwrap();

        assert_eq!(settings.component.domain, "pubsub.example.com");
        assert_eq!(settings.component.host, "localhost");
        assert_eq!(settings.component.status, "Bridging notes");
        assert_eq!(settings.store.backend, StoreBackend::Http);
        assert_eq!(settings.store.timeout_ms, 1500);
        assert_eq!(settings.store.content_type, "application/xml");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[component]\nsecret = \"from-file\"\nport = 5347").unwrap();

        std::env::set_var("PERCH_TEST_ENV__COMPONENT__SECRET", "from-env");
        let settings = Settings::load_with_env(Some(file.path()), "PERCH_TEST_ENV").unwrap();
        std::env::remove_var("PERCH_TEST_ENV__COMPONENT__SECRET");

        assert_eq!(settings.component.secret, "from-env");
        assert_eq!(settings.component.port, 5347);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Settings::load_with_env(Some(Path::new("/nonexistent/perch.toml")), "PERCH_TEST_MISSING");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_store_url() {
        let mut settings = Settings::default();
        settings.store.backend = StoreBackend::Http;
        settings.store.base_url = "::nope".to_string();
        assert!(settings.validate().is_err());
    }
}
