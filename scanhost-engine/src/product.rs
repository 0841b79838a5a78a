//! Product configuration provider
//!
//! Resolves product ids to their setup (launcher path, parameter definitions,
//! environment allow-list). The setup file is validated once at startup; a
//! malformed file stops the engine.

use scanhost_core::domain::product::{ProductSetup, ServerConfiguration};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Errors detected while loading the product setup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read product setup file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Product setup is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid product setup: {0}")]
    Invalid(String),
}

/// Provides product setups by id
pub trait ProductConfigProvider: Send + Sync {
    /// Server id the configuration was written for
    fn server_id(&self) -> &str;

    /// Returns the setup for the given product id, if configured
    fn product_setup(&self, product_id: &str) -> Option<&ProductSetup>;
}

/// Product setup loaded from the server configuration file
#[derive(Debug, Clone)]
pub struct FileProductConfig {
    configuration: ServerConfiguration,
}

impl FileProductConfig {
    /// Loads and validates the setup file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let configuration: ServerConfiguration = serde_json::from_str(&content)?;
        Self::from_configuration(configuration)
    }

    /// Validates an already parsed configuration
    pub fn from_configuration(configuration: ServerConfiguration) -> Result<Self, ConfigError> {
        validate(&configuration)?;
        Ok(Self { configuration })
    }

    pub fn products(&self) -> &[ProductSetup] {
        &self.configuration.products
    }
}

impl ProductConfigProvider for FileProductConfig {
    fn server_id(&self) -> &str {
        &self.configuration.server_id
    }

    fn product_setup(&self, product_id: &str) -> Option<&ProductSetup> {
        self.configuration
            .products
            .iter()
            .find(|product| product.id == product_id)
    }
}

fn validate(configuration: &ServerConfiguration) -> Result<(), ConfigError> {
    if configuration.server_id.trim().is_empty() {
        return Err(ConfigError::Invalid("serverId must not be empty".into()));
    }

    let mut ids = HashSet::new();
    for product in &configuration.products {
        if product.id.trim().is_empty() {
            return Err(ConfigError::Invalid("product id must not be empty".into()));
        }
        if !ids.insert(product.id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "product id '{}' is defined more than once",
                product.id
            )));
        }
        if product.path.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "product '{}' has no launcher path",
                product.id
            )));
        }
        for pattern in &product.env_whitelist {
            if !is_valid_allow_list_pattern(pattern) {
                return Err(ConfigError::Invalid(format!(
                    "product '{}' has an invalid environment allow-list entry: '{}'",
                    product.id, pattern
                )));
            }
        }
        for definition in product.parameter_definitions() {
            if definition.key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "product '{}' declares a parameter without key",
                    product.id
                )));
            }
        }
    }

    Ok(())
}

/// Exact names or a prefix followed by a single trailing `*`
fn is_valid_allow_list_pattern(pattern: &str) -> bool {
    let name = pattern.strip_suffix('*').unwrap_or(pattern);
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
