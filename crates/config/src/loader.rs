//! Configuration loading from multiple sources

use crate::{AppConfig, ConfigError, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

/// Configuration loader with support for multiple formats and sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// Supports TOML, YAML, and JSON formats based on file extension
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let content = std::fs::read_to_string(path)?;

        match extension {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_yaml(content: &str) -> Result<AppConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_json(content: &str) -> Result<AppConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from environment variables alone
    ///
    /// Uses the default prefix `BOOSTLINE`
    pub fn from_env() -> Result<AppConfig> {
        Self::from_env_with_prefix(crate::ENV_PREFIX)
    }

    /// Environment variables are `PREFIX_SECTION__KEY`,
    /// e.g. `BOOSTLINE_PROVIDER__API_KEY=secret`
    pub fn from_env_with_prefix(prefix: &str) -> Result<AppConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Load a file, then let environment variables override single keys
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<AppConfig> {
        if !path.exists() {
            return Err(ConfigError::LoadError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Self::builder()
            .add_file(path, true)
            .add_env(env_prefix)
            .build()
    }

    /// Build configuration using the config crate's builder pattern
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            builder: Config::builder(),
        }
    }
}

/// Builder for layered configuration sources; later sources win
pub struct ConfigLoaderBuilder {
    builder: ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoaderBuilder {
    /// Add a configuration file source
    pub fn add_file(mut self, path: &Path, required: bool) -> Self {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };

        self.builder = self
            .builder
            .add_source(File::from(path).format(format).required(required));
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env(mut self, prefix: &str) -> Self {
        self.builder = self.builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        self
    }

    /// Set a value that every other source overrides
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_default(key, value)?;
        Ok(self)
    }

    /// Build the final configuration
    pub fn build(self) -> Result<AppConfig> {
        let config = self.builder.build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOML: &str = r#"
        [service]
        log_level = "debug"
        database_url = "sqlite://orders.db"

        [provider]
        api_url = "https://panel.example.com/api/v2"
        api_key = "secret"
        service_id = "17"
        requests_per_second = 5

        [pricing]
        unit_price = 3

        [orders]
        min_quantity = 50
        allowed_hosts = ["t.me", "telegram.me"]
    "#;

    #[test]
    fn test_load_from_toml() {
        let config = ConfigLoader::from_toml(TOML).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.provider.requests_per_second, 5);
        assert_eq!(config.pricing.unit_price, 3);
        assert_eq!(config.orders.allowed_hosts.len(), 2);

        // sections and keys left out take their defaults
        assert_eq!(config.service.log_format, "json");
        assert_eq!(config.orders.max_quantity, 100_000);
        assert_eq!(config.delivery, crate::DeliveryConfig::default());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
service:
  log_level: debug
provider:
  api_url: "https://panel.example.com/api/v2"
  api_key: secret
  service_id: "17"
pricing:
  unit_price: 3
retry:
  max_retries: 5
        "#;

        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.multiplier, 2);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"
{
  "provider": {
    "api_url": "https://panel.example.com/api/v2",
    "api_key": "secret",
    "service_id": "17"
  },
  "delivery": {
    "slow_batch_size": 250,
    "slow_interval_secs": 600
  }
}
        "#;

        let config = ConfigLoader::from_json(json).unwrap();
        assert_eq!(config.delivery.slow_batch_size, 250);
        assert_eq!(config.provider.service_id, "17");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.service.database_url, "sqlite://orders.db");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .unwrap();

        assert!(matches!(
            ConfigLoader::from_file(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        // a prefix of its own so parallel tests never see it
        std::env::set_var("BLTESTENV_PRICING__UNIT_PRICE", "7");
        std::env::set_var("BLTESTENV_PROVIDER__API_KEY", "from-env");

        let config = ConfigLoader::from_file_with_env(file.path(), "BLTESTENV").unwrap();
        assert_eq!(config.pricing.unit_price, 7);
        assert_eq!(config.provider.api_key, "from-env");
        assert_eq!(config.service.log_level, "debug");

        std::env::remove_var("BLTESTENV_PRICING__UNIT_PRICE");
        std::env::remove_var("BLTESTENV_PROVIDER__API_KEY");
    }

    #[test]
    fn test_missing_file_with_env() {
        let result = ConfigLoader::from_file_with_env(Path::new("/nonexistent/boostline.toml"), "BLTESTMISSING");
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
