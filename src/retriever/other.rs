use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{require_store, ProductRetriever};
use crate::model::{ProductRecord, ProductType};
use crate::source::{CatalogSource, ProductFilter};

/// Everything the dedicated retrievers do not cover (virtual, bundle,
/// downloadable, ...). Can be switched off entirely.
pub struct OtherRetriever {
    source: Arc<dyn CatalogSource>,
    store_id: Option<i64>,
    page_size: usize,
    enabled: bool,
}

impl OtherRetriever {
    pub fn new(source: Arc<dyn CatalogSource>, page_size: usize, enabled: bool) -> Self {
        Self {
            source,
            store_id: None,
            page_size,
            enabled,
        }
    }
}

#[async_trait]
impl ProductRetriever for OtherRetriever {
    fn name(&self) -> &'static str {
        "other"
    }

    fn set_store_id(&mut self, store_id: i64) {
        self.store_id = Some(store_id);
    }

    async fn retrieve(&self, offset: usize, limit: usize) -> Result<Vec<ProductRecord>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let store_id = require_store(self.store_id, self.name())?;
        let filter = ProductFilter {
            store_id: Some(store_id),
            exclude_type_ids: vec![
                ProductType::Simple,
                ProductType::Configurable,
                ProductType::Grouped,
            ],
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
