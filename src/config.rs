//! Configuration loader and validator for the catalog synchronizer.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Hard cap the remote graph accepts for one product batch.
pub const PRODUCT_BATCH_MAX: usize = 4999;
/// Hard cap for one category/product-set batch.
pub const CATEGORY_BATCH_MAX: usize = 49;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub graph: Graph,
    #[serde(default)]
    pub sync: SyncSettings,
    pub stores: Vec<StoreSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
}

/// Remote graph endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Graph {
    pub base_url: String,
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Batching and tolerance knobs shared by every pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub product_batch_size: usize,
    pub category_batch_size: usize,
    pub max_build_errors: usize,
    pub logged_build_errors: usize,
    pub incremental_claim_limit: usize,
    pub page_size: usize,
    pub parent_page_size: usize,
    pub include_other_types: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            product_batch_size: PRODUCT_BATCH_MAX,
            category_batch_size: CATEGORY_BATCH_MAX,
            max_build_errors: 100,
            logged_build_errors: 3,
            incremental_claim_limit: 1000,
            page_size: 2000,
            parent_page_size: 200,
            include_other_types: true,
        }
    }
}

/// Which product attribute the remote catalog uses as the retailer id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductIdentifier {
    #[default]
    Sku,
    Id,
}

/// Per-store credentials and preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSettings {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sync_enabled: bool,
    #[serde(default)]
    pub catalog_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub product_identifier: ProductIdentifier,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub root_category_id: i64,
    #[serde(default)]
    pub brand: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Config {
    pub fn store(&self, store_id: i64) -> Option<&StoreSettings> {
        self.stores.iter().find(|s| s.id == store_id)
    }

    /// `DATABASE_URL` wins over the configured URL.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.app.database_url.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Validate a configuration instance.
///
/// Missing store credentials are allowed here; such stores are skipped when a
/// pass resolves its store contexts.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(invalid("app.database_url must be non-empty"));
    }
    if cfg.graph.base_url.trim().is_empty() {
        return Err(invalid("graph.base_url must be non-empty"));
    }
    if url::Url::parse(&cfg.graph.base_url).is_err() {
        return Err(invalid("graph.base_url must be an absolute URL"));
    }
    if cfg.graph.api_version.trim().is_empty() {
        return Err(invalid("graph.api_version must be non-empty"));
    }

    let s = &cfg.sync;
    if s.product_batch_size == 0 || s.product_batch_size > PRODUCT_BATCH_MAX {
        return Err(invalid(format!(
            "sync.product_batch_size must be within 1..={PRODUCT_BATCH_MAX}"
        )));
    }
    if s.category_batch_size == 0 || s.category_batch_size > CATEGORY_BATCH_MAX {
        return Err(invalid(format!(
            "sync.category_batch_size must be within 1..={CATEGORY_BATCH_MAX}"
        )));
    }
    if s.incremental_claim_limit == 0 {
        return Err(invalid("sync.incremental_claim_limit must be > 0"));
    }
    if s.page_size == 0 || s.parent_page_size == 0 {
        return Err(invalid("sync.page_size and sync.parent_page_size must be > 0"));
    }

    let mut seen = HashSet::new();
    for store in &cfg.stores {
        if !seen.insert(store.id) {
            return Err(invalid(format!("stores: duplicate store id {}", store.id)));
        }
        if store.name.trim().is_empty() {
            return Err(invalid(format!("stores[{}].name must be non-empty", store.id)));
        }
        if store.currency.trim().len() != 3 {
            return Err(invalid(format!(
                "stores[{}].currency must be an ISO 4217 code",
                store.id
            )));
        }
    }

    Ok(())
}

/// Returns an example YAML document covering every section.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/catalog.db"

graph:
  base_url: "https://graph.facebook.com/"
  api_version: "v18.0"
  timeout_secs: 60

sync:
  product_batch_size: 4999
  category_batch_size: 49
  max_build_errors: 100
  logged_build_errors: 3
  incremental_claim_limit: 1000
  page_size: 2000
  parent_page_size: 200
  include_other_types: true

stores:
  - id: 1
    name: "Default Store View"
    sync_enabled: true
    catalog_id: "CATALOG_ID"
    access_token: "ACCESS_TOKEN"
    debug_mode: false
    product_identifier: sku
    currency: "USD"
    root_category_id: 2
    brand: "Acme"
  - id: 2
    name: "Outlet"
    sync_enabled: false
    product_identifier: id
    currency: "EUR"
    root_category_id: 2
"#
}
