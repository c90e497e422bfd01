//! Reservation-based processing of queued product changes.
//!
//! A pass claims up to N pending records of one method under a fresh batch id,
//! turns them into catalog requests for every eligible store and then either
//! deletes the reserved rows or releases them back to `pending`. A pass that
//! covers only some of the stores always releases, so the remaining stores
//! still see the changes.
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{SyncSettings, PRODUCT_BATCH_MAX};
use crate::dispatcher::{submit_checked, BatchBuffer, BuildFailures};
use crate::feed::{self, FeedEntry};
use crate::graph::{BatchRequest, GraphService};
use crate::model::{ChangeMethod, LinkType, PendingChange, ProductRecord, ProductType};
use crate::retriever::{attach_configurable_parent, attach_grouped_parent};
use crate::source::{CatalogSource, ChangeQueue, LinkFilter, ProductFilter};
use crate::store::StoreContext;

#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalReport {
    pub batch_id: String,
    pub method: ChangeMethod,
    pub reserved: usize,
    /// Requests submitted per store id.
    pub requests: BTreeMap<i64, usize>,
    pub failed_stores: Vec<i64>,
    /// The reservation went back to `pending` instead of being deleted.
    pub released: bool,
}

impl IncrementalReport {
    fn new(batch_id: String, method: ChangeMethod) -> Self {
        Self {
            batch_id,
            method,
            reserved: 0,
            requests: BTreeMap::new(),
            failed_stores: Vec::new(),
            released: false,
        }
    }
}

/// What happens to a reservation once every store in the pass succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The pass covered every eligible store; the rows are done.
    Delete,
    /// Other stores still need the changes; put the rows back to `pending`.
    Release,
}

pub struct IncrementalUpdateHandler {
    source: Arc<dyn CatalogSource>,
    queue: Arc<dyn ChangeQueue>,
    graph: Arc<dyn GraphService>,
    settings: SyncSettings,
}

impl IncrementalUpdateHandler {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        queue: Arc<dyn ChangeQueue>,
        graph: Arc<dyn GraphService>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            queue,
            graph,
            settings,
        }
    }

    fn batch_size(&self) -> usize {
        self.settings.product_batch_size.clamp(1, PRODUCT_BATCH_MAX)
    }

    fn claim_limit(&self) -> usize {
        self.settings
            .incremental_claim_limit
            .clamp(1, self.batch_size())
    }

    /// Claim and process one batch of `method` changes for `stores`, deleting
    /// the rows on success.
    pub async fn process(&self, method: ChangeMethod, stores: &[StoreContext]) -> Result<IncrementalReport> {
        self.process_with(method, stores, Completion::Delete).await
    }

    #[instrument(skip_all, fields(method = method.as_str(), completion = ?completion))]
    pub async fn process_with(
        &self,
        method: ChangeMethod,
        stores: &[StoreContext],
        completion: Completion,
    ) -> Result<IncrementalReport> {
        let batch_id = Uuid::new_v4().to_string();
        let mut report = IncrementalReport::new(batch_id.clone(), method);

        match self.run(method, stores, &mut report).await {
            Ok(()) if report.reserved == 0 => Ok(report),
            Ok(()) if report.failed_stores.is_empty() && completion == Completion::Delete => {
                match self.queue.delete_batch(&batch_id).await {
                    Ok(deleted) => {
                        info!(%batch_id, deleted, "incremental batch processed");
                        Ok(report)
                    }
                    Err(err) => {
                        error!(%batch_id, "failed to delete processed batch: {:#}", err);
                        if let Err(release_err) = self.release(&batch_id).await {
                            error!(%batch_id, "failed to release reservation: {:#}", release_err);
                        }
                        Err(err.context(format!("failed to delete processed batch {}", batch_id)))
                    }
                }
            }
            Ok(()) if report.failed_stores.is_empty() => {
                let released = self.release(&batch_id).await?;
                info!(%batch_id, released, "incremental batch kept queued for the remaining stores");
                report.released = true;
                Ok(report)
            }
            Ok(()) => {
                let released = self.release(&batch_id).await?;
                warn!(%batch_id, released, failed_stores = ?report.failed_stores, "incremental batch released after store failures");
                report.released = true;
                Ok(report)
            }
            Err(err) => {
                error!(%batch_id, "incremental pass failed: {:#}", err);
                if let Err(release_err) = self.release(&batch_id).await {
                    error!(%batch_id, "failed to release reservation: {:#}", release_err);
                }
                Err(err)
            }
        }
    }

    async fn release(&self, batch_id: &str) -> Result<u64> {
        self.queue
            .clear_batch(batch_id)
            .await
            .with_context(|| format!("failed to release batch {}", batch_id))
    }

    async fn run(&self, method: ChangeMethod, stores: &[StoreContext], report: &mut IncrementalReport) -> Result<()> {
        let claimed = self
            .queue
            .claim(method, &report.batch_id, self.claim_limit())
            .await?;
        if claimed == 0 {
            debug!("no pending changes");
            return Ok(());
        }
        let changes = self.queue.fetch_batch(&report.batch_id).await?;
        report.reserved = changes.len();
        if changes.is_empty() {
            return Ok(());
        }
        info!(batch_id = %report.batch_id, reserved = changes.len(), stores = stores.len(), "reserved pending changes");

        for store in stores {
            match self.process_store(method, store, &changes).await {
                Ok(sent) => {
                    report.requests.insert(store.store_id, sent);
                }
                Err(err) => {
                    error!(store_id = store.store_id, batch_id = %report.batch_id, "incremental pass failed for store: {:#}", err);
                    report.failed_stores.push(store.store_id);
                }
            }
        }
        Ok(())
    }

    async fn process_store(&self, method: ChangeMethod, store: &StoreContext, changes: &[PendingChange]) -> Result<usize> {
        let requests = match method {
            ChangeMethod::Update => self.update_requests(store, changes).await?,
            ChangeMethod::Delete => changes
                .iter()
                .map(|c| FeedEntry::delete(store.retailer_id_of(c.product_id, &c.sku)).to_request(&store.catalog_id))
                .collect(),
        };

        let mut sent = 0;
        let mut buffer = BatchBuffer::new(self.batch_size());
        let mut chunks = Vec::new();
        for request in requests {
            if let Some(chunk) = buffer.push(request) {
                chunks.push(chunk);
            }
        }
        chunks.extend(buffer.finish());
        for chunk in chunks {
            submit_checked(self.graph.as_ref(), store, &chunk).await?;
            sent += chunk.len();
        }
        debug!(store_id = store.store_id, sent, "store requests submitted");
        Ok(sent)
    }

    async fn load_in_store(&self, store: &StoreContext, mut ids: Vec<i64>) -> Result<HashMap<i64, ProductRecord>> {
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let filter = ProductFilter {
            store_id: Some(store.store_id),
            ids: Some(ids.clone()),
            ..Default::default()
        };
        Ok(self
            .source
            .find_products(&filter, 0, ids.len())
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect())
    }

    /// Requests for changed products. A changed parent stands for its
    /// children. Every product is then judged the way the catalog pass would
    /// judge it: published under its parent, published on its own, or
    /// deleted.
    async fn update_requests(&self, store: &StoreContext, changes: &[PendingChange]) -> Result<Vec<BatchRequest>> {
        let products = self
            .load_in_store(store, changes.iter().map(|c| c.product_id).collect())
            .await?;

        let mut fan_out: HashMap<i64, Vec<i64>> = HashMap::new();
        let composite_ids: Vec<i64> = products
            .values()
            .filter(|p| p.type_id.is_composite())
            .map(|p| p.id)
            .collect();
        if !composite_ids.is_empty() {
            let links = self
                .source
                .find_links(&LinkFilter {
                    parent_ids: Some(composite_ids),
                    ..Default::default()
                })
                .await?;
            for link in links {
                let matches = products
                    .get(&link.parent_id)
                    .is_some_and(|p| p.type_id.child_link() == Some(link.link_type));
                if matches {
                    fan_out.entry(link.parent_id).or_default().push(link.child_id);
                }
            }
        }
        let children = self
            .load_in_store(
                store,
                fan_out
                    .values()
                    .flatten()
                    .copied()
                    .filter(|id| !products.contains_key(id))
                    .collect(),
            )
            .await?;

        let candidate_ids: Vec<i64> = products
            .values()
            .chain(children.values())
            .filter(|p| !p.type_id.is_composite())
            .map(|p| p.id)
            .collect();
        let parents = self.resolve_parents(store, candidate_ids).await?;

        let mut failures = BuildFailures::new(
            self.settings.logged_build_errors,
            self.settings.max_build_errors,
        );
        let mut seen = HashSet::new();
        let mut requests = Vec::new();
        for change in changes {
            if !seen.insert(change.product_id) {
                continue;
            }
            let Some(product) = products.get(&change.product_id) else {
                debug!(store_id = store.store_id, product_id = change.product_id, "product left the store; deleting");
                requests.push(
                    FeedEntry::delete(store.retailer_id_of(change.product_id, &change.sku))
                        .to_request(&store.catalog_id),
                );
                continue;
            };

            if !product.type_id.is_composite() {
                self.push_update(store, product, &parents, &mut requests, &mut failures)?;
                continue;
            }
            let mut child_ids = fan_out.get(&product.id).cloned().unwrap_or_default();
            child_ids.sort_unstable();
            for child_id in child_ids {
                // children outside the store are not part of its catalog
                let Some(child) = products.get(&child_id).or_else(|| children.get(&child_id)) else {
                    continue;
                };
                if child.type_id.is_composite() || !seen.insert(child_id) {
                    continue;
                }
                self.push_update(store, child, &parents, &mut requests, &mut failures)?;
            }
        }
        Ok(requests)
    }

    /// Update for a product the catalog pass would publish, delete otherwise.
    fn push_update(
        &self,
        store: &StoreContext,
        product: &ProductRecord,
        parents: &HashMap<i64, (ProductRecord, LinkType)>,
        requests: &mut Vec<BatchRequest>,
        failures: &mut BuildFailures,
    ) -> Result<()> {
        let Some(record) = self.publishable(product, parents.get(&product.id)) else {
            debug!(store_id = store.store_id, product_id = product.id, "product is not published; deleting");
            requests.push(FeedEntry::delete(store.retailer_id(product)).to_request(&store.catalog_id));
            return Ok(());
        };
        match feed::build_update(store, &record, false) {
            Ok(entry) => requests.push(entry.to_request(&store.catalog_id)),
            Err(err) => failures.record(store.store_id, &record, err)?,
        }
        Ok(())
    }

    /// The record the catalog pass would emit for `product`, if any.
    fn publishable(&self, product: &ProductRecord, parent: Option<&(ProductRecord, LinkType)>) -> Option<ProductRecord> {
        if product.sync_disabled() {
            return None;
        }
        match parent {
            Some((parent, LinkType::Super)) => Some(attach_configurable_parent(product.clone(), parent)),
            Some((parent, LinkType::Grouped)) => Some(attach_grouped_parent(product.clone(), parent)),
            None if !product.visible_alone() => None,
            None if product.type_id == ProductType::Simple => Some(product.clone()),
            None if self.settings.include_other_types => Some(product.clone()),
            None => None,
        }
    }

    /// Publishing parent of each child, keyed by child id. Only parents that
    /// publish their children count; a configurable link wins over a grouped
    /// one, then the lowest parent id. Parents are prefetched for the store
    /// and the ones the prefetch lacks are loaded without the store filter.
    async fn resolve_parents(
        &self,
        store: &StoreContext,
        child_ids: Vec<i64>,
    ) -> Result<HashMap<i64, (ProductRecord, LinkType)>> {
        if child_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let links = self
            .source
            .find_links(&LinkFilter {
                child_ids: Some(child_ids),
                ..Default::default()
            })
            .await?;
        if links.is_empty() {
            return Ok(HashMap::new());
        }

        let mut parents = self
            .load_in_store(store, links.iter().map(|l| l.parent_id).collect())
            .await?;
        let mut missing: Vec<i64> = links
            .iter()
            .map(|l| l.parent_id)
            .filter(|id| !parents.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            let fallback = ProductFilter {
                ids: Some(missing.clone()),
                ..Default::default()
            };
            for parent in self.source.find_products(&fallback, 0, missing.len()).await? {
                debug!(store_id = store.store_id, parent_id = parent.id, "parent loaded outside prefetch");
                parents.insert(parent.id, parent);
            }
        }

        let mut usable: Vec<_> = links
            .into_iter()
            .filter(|l| match parents.get(&l.parent_id) {
                Some(parent) => parent.type_id == l.link_type.parent_type() && parent.publishes_children(),
                None => {
                    warn!(child_id = l.child_id, parent_id = l.parent_id, "linked parent not found");
                    false
                }
            })
            .collect();
        // configurable links win over grouped ones, then lowest parent id
        usable.sort_by_key(|l| (l.child_id, l.link_type != LinkType::Super, l.parent_id));
        usable.dedup_by_key(|l| l.child_id);

        Ok(usable
            .into_iter()
            .filter_map(|l| {
                parents
                    .get(&l.parent_id)
                    .map(|parent| (l.child_id, (parent.clone(), l.link_type)))
            })
            .collect())
    }
}
