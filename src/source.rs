//! Narrow interfaces over the host platform's storage. The engine only relies
//! on filtered, paginated reads plus a handful of targeted writes.
use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Category, ChangeMethod, LinkType, PendingChange, ProductLink, ProductRecord, ProductType};

/// Filter for product queries. Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    /// Restrict to products assigned to this store.
    pub store_id: Option<i64>,
    pub type_ids: Vec<ProductType>,
    pub exclude_type_ids: Vec<ProductType>,
    /// Only products visible on their own (not just as a variant).
    pub visible_only: bool,
    /// Drop products whose sync flag is explicitly `false`; `NULL` stays in.
    pub exclude_sync_disabled: bool,
    pub ids: Option<Vec<i64>>,
    pub category_id: Option<i64>,
    /// Only parents that have at least one eligible child of this link type.
    pub with_children: Option<LinkType>,
}

impl ProductFilter {
    pub fn for_store(store_id: i64) -> Self {
        Self {
            store_id: Some(store_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkFilter {
    pub parent_ids: Option<Vec<i64>>,
    pub child_ids: Option<Vec<i64>>,
    pub link_type: Option<LinkType>,
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Products matching `filter`, ordered by id, paginated.
    async fn find_products(
        &self,
        filter: &ProductFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ProductRecord>>;

    async fn find_links(&self, filter: &LinkFilter) -> Result<Vec<ProductLink>>;

    /// The category whose path is `prefix` plus every category below it,
    /// ordered by level then position. `set_id` is loaded for `store_id`.
    async fn find_categories_by_path_prefix(
        &self,
        store_id: i64,
        prefix: &str,
        active_only: bool,
    ) -> Result<Vec<Category>>;

    async fn find_categories(&self, store_id: i64, ids: &[i64]) -> Result<Vec<Category>>;
}

/// Store-scoped writes of the remote product set id.
#[async_trait]
pub trait CategorySetStore: Send + Sync {
    async fn save_set_id(&self, store_id: i64, category_id: i64, set_id: &str) -> Result<()>;

    async fn clear_set_id(&self, store_id: i64, category_id: i64) -> Result<()>;
}

/// Durable queue of pending product changes.
#[async_trait]
pub trait ChangeQueue: Send + Sync {
    async fn enqueue(&self, product_id: i64, sku: &str, method: ChangeMethod) -> Result<i64>;

    /// Atomically reserve up to `limit` unreserved records of `method` under
    /// `batch_id`. Returns how many rows were claimed.
    async fn claim(&self, method: ChangeMethod, batch_id: &str, limit: usize) -> Result<u64>;

    async fn fetch_batch(&self, batch_id: &str) -> Result<Vec<PendingChange>>;

    async fn delete_batch(&self, batch_id: &str) -> Result<u64>;

    /// Release a reservation so its records become eligible again.
    async fn clear_batch(&self, batch_id: &str) -> Result<u64>;
}

/// Per-entity sync switches. `None` resets a flag to "inherit", which counts
/// as enabled.
#[async_trait]
pub trait SyncFlags: Send + Sync {
    async fn set_product_sync(&self, product_id: i64, enabled: Option<bool>) -> Result<()>;

    async fn set_category_sync(&self, category_id: i64, enabled: Option<bool>) -> Result<()>;
}
