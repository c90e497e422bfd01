use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{expand_children, require_store, ProductRetriever};
use crate::model::{LinkType, ProductRecord, ProductType};
use crate::source::{CatalogSource, ProductFilter};

/// Variants of configurable products. `offset`/`limit` page over parents; each
/// page expands to one record per eligible variant.
pub struct ConfigurableRetriever {
    source: Arc<dyn CatalogSource>,
    store_id: Option<i64>,
    page_size: usize,
}

impl ConfigurableRetriever {
    pub fn new(source: Arc<dyn CatalogSource>, page_size: usize) -> Self {
        Self {
            source,
            store_id: None,
            page_size,
        }
    }
}

#[async_trait]
impl ProductRetriever for ConfigurableRetriever {
    fn name(&self) -> &'static str {
        "configurable"
    }

    fn set_store_id(&mut self, store_id: i64) {
        self.store_id = Some(store_id);
    }

    async fn retrieve(&self, offset: usize, limit: usize) -> Result<Vec<ProductRecord>> {
        let store_id = require_store(self.store_id, self.name())?;
        let filter = ProductFilter {
            store_id: Some(store_id),
            type_ids: vec![ProductType::Configurable],
            visible_only: true,
            exclude_sync_disabled: true,
            with_children: Some(LinkType::Super),
            ..Default::default()
        };
        let parents = self.source.find_products(&filter, offset, limit).await?;
        let variants =
            expand_children(self.source.as_ref(), store_id, &parents, LinkType::Super).await?;
        debug!(store_id, parents = parents.len(), variants = variants.len(), "configurable page");
        Ok(variants)
    }

    fn limit(&self) -> usize {
        self.page_size
    }
}
