//! Per-store context resolved once before any batch work starts.
use tracing::{info, warn};

use crate::config::{Config, ProductIdentifier, StoreSettings};
use crate::error::SyncError;
use crate::model::ProductRecord;

/// Everything a pass needs to talk to the remote catalog on behalf of a store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreContext {
    pub store_id: i64,
    pub name: String,
    pub catalog_id: String,
    pub access_token: String,
    pub debug_mode: bool,
    pub identifier: ProductIdentifier,
    pub currency: String,
    pub root_category_id: i64,
    pub brand: Option<String>,
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("store_id", &self.store_id)
            .field("catalog_id", &self.catalog_id)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    pub fn resolve(settings: &StoreSettings) -> Result<Self, SyncError> {
        let not_eligible = |reason| SyncError::StoreNotEligible {
            store_id: settings.id,
            reason,
        };
        if !settings.sync_enabled {
            return Err(not_eligible("sync is disabled"));
        }
        let catalog_id = settings
            .catalog_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| not_eligible("catalog id is missing"))?;
        let access_token = settings
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| not_eligible("access token is missing"))?;

        Ok(Self {
            store_id: settings.id,
            name: settings.name.clone(),
            catalog_id: catalog_id.to_string(),
            access_token: access_token.to_string(),
            debug_mode: settings.debug_mode,
            identifier: settings.product_identifier,
            currency: settings.currency.trim().to_ascii_uppercase(),
            root_category_id: settings.root_category_id,
            brand: settings.brand.clone().filter(|b| !b.trim().is_empty()),
        })
    }

    /// Retailer id the remote catalog knows this product by.
    pub fn retailer_id(&self, product: &ProductRecord) -> String {
        self.retailer_id_of(product.id, &product.sku)
    }

    pub fn retailer_id_of(&self, product_id: i64, sku: &str) -> String {
        match self.identifier {
            ProductIdentifier::Sku => sku.to_string(),
            ProductIdentifier::Id => product_id.to_string(),
        }
    }
}

/// Resolve every eligible store, or only `only` when given. Ineligible stores
/// are logged and skipped.
pub fn eligible_stores(cfg: &Config, only: Option<i64>) -> Vec<StoreContext> {
    let mut out = Vec::new();
    for settings in &cfg.stores {
        if only.is_some_and(|id| id != settings.id) {
            continue;
        }
        match StoreContext::resolve(settings) {
            Ok(ctx) => out.push(ctx),
            Err(err) => info!(store_id = settings.id, %err, "skipping store"),
        }
    }
    if let Some(id) = only {
        if cfg.store(id).is_none() {
            warn!(store_id = id, "store is not configured");
        }
    }
    out
}
