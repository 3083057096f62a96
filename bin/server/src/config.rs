//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional TOML file and then from
//! environment variables prefixed with `TRIPWIRE`, using `__` to separate
//! nested keys (e.g. `TRIPWIRE__TRIGGER__ENABLED=true`).

use serde::Deserialize;
use std::path::Path;
use tripwire_trigger::TriggerConfig;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name of the database the triggers are scoped to.
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// PostgreSQL URL for the trigger metadata store.
    /// Definitions are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Trigger engine configuration.
    #[serde(default)]
    pub trigger: TriggerConfig,
}

fn default_database_name() -> String {
    "graph".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_name: default_database_name(),
            database_url: None,
            trigger: TriggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from an optional file, overridden by
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("TRIPWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
