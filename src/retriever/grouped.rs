use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{expand_children, require_store, ProductRetriever};
use crate::model::{LinkType, ProductRecord, ProductType};
use crate::source::{CatalogSource, ProductFilter};

/// Associated products of grouped products, paged over the grouped parents.
pub struct GroupedRetriever {
    source: Arc<dyn CatalogSource>,
    store_id: Option<i64>,
    page_size: usize,
}

impl GroupedRetriever {
    pub fn new(source: Arc<dyn CatalogSource>, page_size: usize) -> Self {
        Self {
            source,
            store_id: None,
            page_size,
        }
    }
}

#[async_trait]
impl ProductRetriever for GroupedRetriever {
    fn name(&self) -> &'static str {
        "grouped"
    }

    fn set_store_id(&mut self, store_id: i64) {
        self.store_id = Some(store_id);
    }

    async fn retrieve(&self, offset: usize, limit: usize) -> Result<Vec<ProductRecord>> {
        let store_id = require_store(self.store_id, self.name())?;
        let filter = ProductFilter {
            store_id: Some(store_id),
            type_ids: vec![ProductType::Grouped],
            visible_only: true,
            exclude_sync_disabled: true,
            with_children: Some(LinkType::Grouped),
            ..Default::default()
        };
        let parents = self.source.find_products(&filter, offset, limit).await?;
        expand_children(self.source.as_ref(), store_id, &parents, LinkType::Grouped).await
    }

    fn limit(&self) -> usize {
        self.page_size
    }
}
