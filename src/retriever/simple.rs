use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{require_store, ProductRetriever};
use crate::model::{ProductRecord, ProductType};
use crate::source::{CatalogSource, ProductFilter};

/// Standalone simple products, i.e. those visible on their own.
pub struct SimpleRetriever {
    source: Arc<dyn CatalogSource>,
    store_id: Option<i64>,
    page_size: usize,
}

impl SimpleRetriever {
    pub fn new(source: Arc<dyn CatalogSource>, page_size: usize) -> Self {
        Self {
            source,
            store_id: None,
            page_size,
        }
    }
}

#[async_trait]
impl ProductRetriever for SimpleRetriever {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn set_store_id(&mut self, store_id: i64) {
        self.store_id = Some(store_id);
    }

    async fn retrieve(&self, offset: usize, limit: usize) -> Result<Vec<ProductRecord>> {
        let store_id = require_store(self.store_id, self.name())?;
        let filter = ProductFilter {
            store_id: Some(store_id),
            type_ids: vec![ProductType::Simple],
            visible_only: true,
            exclude_sync_disabled: true,
            ..Default::default()
        };
        self.source.find_products(&filter, offset, limit).await
    }

    fn limit(&self) -> usize {
        self.page_size
    }
}
