//! Mirrors the store's category tree as remote product sets.
//!
//! Each category maps to one product set whose filter lists the retailer ids
//! of its members. Requests go out in batches of at most 49 and responses are
//! matched back to categories by position only.
use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{SyncSettings, CATEGORY_BATCH_MAX};
use crate::dispatcher::BatchBuffer;
use crate::graph::{BatchRequest, BatchResponse, GraphService, HttpMethod, RequestBody};
use crate::model::Category;
use crate::source::{CatalogSource, CategorySetStore, ProductFilter};
use crate::store::StoreContext;

const SET_NAME_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOperation {
    Create,
    Update { set_id: String },
    Delete { set_id: String },
}

/// One queued product set request and the category it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub category_id: i64,
    pub name: String,
    pub operation: SetOperation,
    pub request: BatchRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Reconciled { saved: usize, failed: usize },
    /// Response length differed from the batch; nothing was attributed.
    Mismatch { expected: usize, raw: Vec<BatchResponse> },
    Failed { category_ids: Vec<i64>, error: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorySyncReport {
    pub store_id: i64,
    pub flushes: Vec<FlushOutcome>,
    pub requests: usize,
    pub skipped: usize,
    pub failed_categories: usize,
}

/// `name=...&filter=...` form for a product set.
pub fn set_form(name: &str, retailer_ids: &[String]) -> String {
    let filter = json!({ "retailer_id": { "is_any": retailer_ids } }).to_string();
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("name", name)
        .append_pair("filter", &filter)
        .finish()
}

/// Names of the categories on `category`'s path below `root_id`, joined.
/// `None` when the category is not below the root.
pub fn set_name(category: &Category, root_id: i64, names: &HashMap<i64, String>) -> Option<String> {
    let ids = category.path_ids();
    let start = ids.iter().position(|id| *id == root_id)? + 1;
    if start >= ids.len() {
        return None;
    }
    let parts: Vec<&str> = ids[start..]
        .iter()
        .map(|id| names.get(id).map(String::as_str).unwrap_or_default())
        .filter(|n| !n.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(SET_NAME_SEPARATOR))
    }
}

pub struct CategorySynchronizer {
    source: Arc<dyn CatalogSource>,
    sets: Arc<dyn CategorySetStore>,
    graph: Arc<dyn GraphService>,
    batch_size: usize,
    page_size: usize,
}

impl CategorySynchronizer {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        sets: Arc<dyn CategorySetStore>,
        graph: Arc<dyn GraphService>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            sets,
            graph,
            batch_size: settings.category_batch_size.clamp(1, CATEGORY_BATCH_MAX),
            page_size: settings.page_size.max(1),
        }
    }

    async fn load_one(&self, store: &StoreContext, category_id: i64) -> Result<Category> {
        self.source
            .find_categories(store.store_id, &[category_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("category {} not found", category_id))
    }

    /// Push every active category below the store's root.
    #[instrument(skip_all, fields(store_id = store.store_id))]
    pub async fn sync_all(&self, store: &StoreContext) -> Result<CategorySyncReport> {
        let root = self.load_one(store, store.root_category_id).await?;
        let categories: Vec<Category> = self
            .source
            .find_categories_by_path_prefix(store.store_id, &root.path, true)
            .await?
            .into_iter()
            .filter(|c| c.id != root.id)
            .collect();
        info!(store_id = store.store_id, categories = categories.len(), "syncing category tree");
        self.push(store, &categories).await
    }

    /// Push one changed category. A rename changes every descendant's set
    /// name, so the active subtree goes along.
    #[instrument(skip_all, fields(store_id = store.store_id, category_id = category_id, name_changed = name_changed))]
    pub async fn sync_category(
        &self,
        store: &StoreContext,
        category_id: i64,
        name_changed: bool,
    ) -> Result<CategorySyncReport> {
        let category = self.load_one(store, category_id).await?;
        let mut categories = vec![category.clone()];
        if name_changed {
            categories.extend(
                self.source
                    .find_categories_by_path_prefix(store.store_id, &category.path, true)
                    .await?
                    .into_iter()
                    .filter(|c| c.id != category.id),
            );
        }
        self.push(store, &categories).await
    }

    /// Delete the remote sets of a category and all of its descendants.
    #[instrument(skip_all, fields(store_id = store.store_id, category_id = category_id))]
    pub async fn delete_category(&self, store: &StoreContext, category_id: i64) -> Result<CategorySyncReport> {
        let category = self.load_one(store, category_id).await?;
        let subtree = self
            .source
            .find_categories_by_path_prefix(store.store_id, &category.path, false)
            .await?;

        let mut report = CategorySyncReport {
            store_id: store.store_id,
            ..Default::default()
        };
        let mut buffer = BatchBuffer::new(self.batch_size);
        for cat in subtree {
            let Some(set_id) = cat.set_id.clone() else {
                report.skipped += 1;
                continue;
            };
            let item = SetRequest {
                category_id: cat.id,
                name: cat.name.clone(),
                request: BatchRequest::new(HttpMethod::Delete, set_id.clone(), None),
                operation: SetOperation::Delete { set_id },
            };
            if let Some(batch) = buffer.push(item) {
                self.flush(store, batch, &mut report).await;
            }
        }
        if let Some(batch) = buffer.finish() {
            self.flush(store, batch, &mut report).await;
        }
        Ok(report)
    }

    async fn push(&self, store: &StoreContext, categories: &[Category]) -> Result<CategorySyncReport> {
        let mut report = CategorySyncReport {
            store_id: store.store_id,
            ..Default::default()
        };
        let names = self.path_names(store, categories).await?;
        let mut buffer = BatchBuffer::new(self.batch_size);

        for category in categories {
            match self.prepare(store, category, &names).await {
                Ok(Some(item)) => {
                    if let Some(batch) = buffer.push(item) {
                        self.flush(store, batch, &mut report).await;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    error!(
                        store_id = store.store_id,
                        category_id = category.id,
                        name = %category.name,
                        queued = buffer.len(),
                        flushed = report.flushes.len(),
                        "failed to prepare product set: {:#}",
                        err
                    );
                    report.failed_categories += 1;
                }
            }
        }
        if let Some(batch) = buffer.finish() {
            self.flush(store, batch, &mut report).await;
        }
        info!(
            store_id = store.store_id,
            requests = report.requests,
            flushes = report.flushes.len(),
            skipped = report.skipped,
            failed = report.failed_categories,
            "category sync finished"
        );
        Ok(report)
    }

    /// Names of every category on the given paths, including ancestors
    /// outside the loaded set.
    async fn path_names(&self, store: &StoreContext, categories: &[Category]) -> Result<HashMap<i64, String>> {
        let mut names: HashMap<i64, String> = categories.iter().map(|c| (c.id, c.name.clone())).collect();
        let mut missing: Vec<i64> = categories
            .iter()
            .flat_map(|c| c.path_ids())
            .filter(|id| !names.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            for c in self.source.find_categories(store.store_id, &missing).await? {
                names.insert(c.id, c.name);
            }
        }
        Ok(names)
    }

    async fn member_ids(&self, store: &StoreContext, category_id: i64) -> Result<Vec<String>> {
        let filter = ProductFilter {
            store_id: Some(store.store_id),
            exclude_sync_disabled: true,
            category_id: Some(category_id),
            ..Default::default()
        };
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.source.find_products(&filter, offset, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            ids.extend(page.iter().map(|p| store.retailer_id(p)));
            offset += self.page_size;
        }
        Ok(ids)
    }

    async fn prepare(
        &self,
        store: &StoreContext,
        category: &Category,
        names: &HashMap<i64, String>,
    ) -> Result<Option<SetRequest>> {
        if category.sync_disabled() {
            debug!(category_id = category.id, "category sync disabled");
            return Ok(None);
        }
        let Some(name) = set_name(category, store.root_category_id, names) else {
            warn!(store_id = store.store_id, category_id = category.id, "category is not below the store root");
            return Ok(None);
        };
        let members = self.member_ids(store, category.id).await?;
        let form = set_form(&name, &members);

        let (operation, request) = match &category.set_id {
            Some(set_id) => (
                SetOperation::Update { set_id: set_id.clone() },
                BatchRequest::new(HttpMethod::Post, set_id.clone(), Some(RequestBody::Form(form))),
            ),
            None if !members.is_empty() => (
                SetOperation::Create,
                BatchRequest::new(
                    HttpMethod::Post,
                    format!("{}/product_sets", store.catalog_id),
                    Some(RequestBody::Form(form)),
                ),
            ),
            None => return Ok(None),
        };
        Ok(Some(SetRequest {
            category_id: category.id,
            name,
            operation,
            request,
        }))
    }

    /// Submit one batch and reconcile it. Never fails; the outcome lands in
    /// the report.
    async fn flush(&self, store: &StoreContext, batch: Vec<SetRequest>, report: &mut CategorySyncReport) {
        let requests: Vec<BatchRequest> = batch.iter().map(|s| s.request.clone()).collect();
        report.requests += requests.len();
        if store.debug_mode {
            for s in &batch {
                info!(store_id = store.store_id, category_id = s.category_id, operation = ?s.operation, body = ?s.request.body, "product set request");
            }
        }

        let responses = match self
            .graph
            .submit_batch(&store.catalog_id, &store.access_token, &requests)
            .await
        {
            Ok(responses) => responses,
            Err(err) => {
                let category_ids: Vec<i64> = batch.iter().map(|s| s.category_id).collect();
                error!(store_id = store.store_id, categories = ?category_ids, "product set batch failed: {:#}", err);
                report.flushes.push(FlushOutcome::Failed {
                    category_ids,
                    error: format!("{:#}", err),
                });
                return;
            }
        };

        if responses.len() != batch.len() {
            warn!(
                store_id = store.store_id,
                expected = batch.len(),
                got = responses.len(),
                "product set response does not match request count; skipping reconciliation"
            );
            report.flushes.push(FlushOutcome::Mismatch {
                expected: batch.len(),
                raw: responses,
            });
            return;
        }

        let mut saved = 0;
        let mut failed = 0;
        for (item, res) in batch.iter().zip(&responses) {
            if !res.is_success() {
                warn!(
                    store_id = store.store_id,
                    category_id = item.category_id,
                    code = res.code,
                    error = %res.error_message().unwrap_or_default(),
                    "product set request failed"
                );
                failed += 1;
                continue;
            }
            let persisted = match &item.operation {
                SetOperation::Create => match res.created_id() {
                    Some(set_id) => self.sets.save_set_id(store.store_id, item.category_id, &set_id).await,
                    None => Err(anyhow!("create response carries no id")),
                },
                SetOperation::Update { set_id } => match res.created_id() {
                    Some(new_id) if new_id != *set_id => {
                        self.sets.save_set_id(store.store_id, item.category_id, &new_id).await
                    }
                    _ => Ok(()),
                },
                SetOperation::Delete { set_id } => {
                    info!(store_id = store.store_id, category_id = item.category_id, %set_id, "product set deleted");
                    self.sets.clear_set_id(store.store_id, item.category_id).await
                }
            };
            match persisted {
                Ok(()) => saved += 1,
                Err(err) => {
                    error!(store_id = store.store_id, category_id = item.category_id, name = %item.name, "failed to record product set: {:#}", err);
                    failed += 1;
                }
            }
        }
        report.flushes.push(FlushOutcome::Reconciled { saved, failed });
    }
}
