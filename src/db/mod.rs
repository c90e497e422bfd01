//! Database module: SQLite rendition of the host catalog and the sync queue.
//!
//! - `model`: row decoding into domain entities.
//! - `repo`: SQL-only functions over a pool.
//!
//! `SqliteStore` wraps a pool and implements the collaborator traits from
//! `crate::source` by delegating to `repo`.

pub mod model;
pub mod repo;

pub use repo::*;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Category, ChangeMethod, PendingChange, ProductLink, ProductRecord};
use crate::source::{CatalogSource, CategorySetStore, ChangeQueue, LinkFilter, ProductFilter, SyncFlags};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogSource for SqliteStore {
    async fn find_products(
        &self,
        filter: &ProductFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ProductRecord>> {
        repo::find_products(&self.pool, filter, offset, limit).await
    }

    async fn find_links(&self, filter: &LinkFilter) -> Result<Vec<ProductLink>> {
        repo::find_links(&self.pool, filter).await
    }

    async fn find_categories_by_path_prefix(
        &self,
        store_id: i64,
        prefix: &str,
        active_only: bool,
    ) -> Result<Vec<Category>> {
        repo::find_categories_by_path_prefix(&self.pool, store_id, prefix, active_only).await
    }

    async fn find_categories(&self, store_id: i64, ids: &[i64]) -> Result<Vec<Category>> {
        repo::find_categories(&self.pool, store_id, ids).await
    }
}

#[async_trait]
impl CategorySetStore for SqliteStore {
    async fn save_set_id(&self, store_id: i64, category_id: i64, set_id: &str) -> Result<()> {
        repo::save_category_set_id(&self.pool, store_id, category_id, set_id).await
    }

    async fn clear_set_id(&self, store_id: i64, category_id: i64) -> Result<()> {
        repo::clear_category_set_id(&self.pool, store_id, category_id).await
    }
}

#[async_trait]
impl ChangeQueue for SqliteStore {
    async fn enqueue(&self, product_id: i64, sku: &str, method: ChangeMethod) -> Result<i64> {
        repo::enqueue_change(&self.pool, product_id, sku, method).await
    }

    async fn claim(&self, method: ChangeMethod, batch_id: &str, limit: usize) -> Result<u64> {
        repo::claim_changes(&self.pool, method, batch_id, limit).await
    }

    async fn fetch_batch(&self, batch_id: &str) -> Result<Vec<PendingChange>> {
        repo::fetch_changes_by_batch(&self.pool, batch_id).await
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<u64> {
        repo::delete_changes_by_batch(&self.pool, batch_id).await
    }

    async fn clear_batch(&self, batch_id: &str) -> Result<u64> {
        repo::clear_changes_batch(&self.pool, batch_id).await
    }
}

#[async_trait]
impl SyncFlags for SqliteStore {
    async fn set_product_sync(&self, product_id: i64, enabled: Option<bool>) -> Result<()> {
        repo::set_product_sync_flag(&self.pool, product_id, enabled).await
    }

    async fn set_category_sync(&self, category_id: i64, enabled: Option<bool>) -> Result<()> {
        repo::set_category_sync_flag(&self.pool, category_id, enabled).await
    }
}
