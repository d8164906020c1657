//! Configuration system for storelens.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/storelens/config.toml` and/or
//! `.storelens/config.toml` in the workspace directory.

use crate::data::validate::Severity;
use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Locations of the raw source files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Delimited customer records.
    pub customers: PathBuf,
    /// Delimited order records.
    pub orders: PathBuf,
    /// JSON array of product records.
    pub products: PathBuf,
    /// Field delimiter for the delimited sources.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            customers: PathBuf::from("data/customers.csv"),
            orders: PathBuf::from("data/orders.csv"),
            products: PathBuf::from("data/products.json"),
            delimiter: default_delimiter(),
        }
    }
}

fn default_delimiter() -> char {
    ','
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("ecommerce.db"),
        }
    }
}

/// Validation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Row identifiers included in each log line.
    #[serde(default = "default_max_logged_rows")]
    pub max_logged_rows: usize,
    /// Per-rule severity overrides keyed by rule name, e.g.
    /// `orphan_order = "blocking"`.
    #[serde(default)]
    pub severity_overrides: BTreeMap<String, Severity>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_logged_rows: default_max_logged_rows(),
            severity_overrides: BTreeMap::new(),
        }
    }
}

fn default_max_logged_rows() -> usize {
    10
}

impl EtlConfig {
    /// Resolve relative paths against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sources.customers);
        resolve(&mut self.sources.orders);
        resolve(&mut self.sources.products);
        resolve(&mut self.store.database_path);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sources.delimiter.is_ascii() || self.sources.delimiter == '"' {
            return Err(ConfigError::Invalid {
                message: format!(
                    "delimiter must be a single ASCII character other than '\"', got '{}'",
                    self.sources.delimiter
                ),
            });
        }
        if self.store.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "store.database_path must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Load configuration from the layered sources.
///
/// Order (later wins): defaults, user config, workspace config,
/// `STORELENS_` environment variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EtlConfig>,
) -> Result<EtlConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EtlConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "storelens", "storelens") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (STORELENS_STORE__DATABASE_PATH, etc.)
    figment = figment.merge(Env::prefixed("STORELENS_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: EtlConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// `<workspace>/.storelens/config.toml`
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".storelens").join("config.toml")
}
