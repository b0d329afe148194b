//! Settings for the boostline daemon.
//!
//! An [`AppConfig`] is read from a TOML, YAML or JSON file, overridden key by
//! key from `BOOSTLINE_SECTION__KEY` environment variables, validated as a
//! whole, and turned into engine, scheduler and provider settings. A
//! [`ConfigWatcher`] republishes it when the file changes on disk.

mod config;
mod loader;
mod runtime;
mod validation;
mod watcher;

pub use config::*;
pub use loader::*;
pub use validation::*;
pub use watcher::*;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "BOOSTLINE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot load configuration: {0}")]
    LoadError(String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("merging configuration sources: {0}")]
    ConfigLibError(#[from] ::config::ConfigError),

    #[error("malformed TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("malformed YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("malformed JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("watching configuration file: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
