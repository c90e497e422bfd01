//! Bounded batch dispatch of feed entries to the remote catalog.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{SyncSettings, PRODUCT_BATCH_MAX};
use crate::error::SyncError;
use crate::feed::{self, BuildError};
use crate::graph::{BatchRequest, BatchResponse, GraphService};
use crate::model::ProductRecord;
use crate::retriever::{retrievers_for, ProductRetriever};
use crate::source::CatalogSource;
use crate::store::StoreContext;

/// Accumulates items and hands back a full batch as soon as it reaches `cap`.
#[derive(Debug)]
pub struct BatchBuffer<T> {
    cap: usize,
    items: Vec<T>,
}

impl<T> BatchBuffer<T> {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            items: Vec::with_capacity(cap.min(1024)),
        }
    }

    /// Returns the batch to flush once `item` fills the buffer.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.cap {
            Some(std::mem::take(&mut self.items))
        } else {
            None
        }
    }

    /// Whatever is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.items))
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Counts per-item build failures, logging only the first few and turning
/// into a fatal error past the threshold.
#[derive(Debug)]
pub(crate) struct BuildFailures {
    logged: usize,
    max: usize,
    count: usize,
    warned: usize,
}

impl BuildFailures {
    pub(crate) fn new(logged: usize, max: usize) -> Self {
        Self {
            logged,
            max,
            count: 0,
            warned: 0,
        }
    }

    pub(crate) fn record(&mut self, store_id: i64, product: &ProductRecord, err: BuildError) -> Result<(), SyncError> {
        self.count += 1;
        if self.count <= self.logged {
            self.warned += 1;
            warn!(store_id, product_id = product.id, sku = %product.sku, %err, "failed to build feed entry");
        }
        if self.count > self.max {
            error!(store_id, failures = self.count, "too many feed entry build failures; aborting");
            return Err(SyncError::TooManyBuildErrors {
                count: self.count,
                last: err,
            });
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn warned(&self) -> usize {
        self.warned
    }
}

/// Outcome of one full catalog pass for a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub store_id: i64,
    /// Responses per flushed batch, in submission order.
    pub batches: Vec<Vec<BatchResponse>>,
    pub entries_sent: usize,
    pub build_failures: usize,
    pub remote_failures: usize,
}

/// Submit one product batch and verify the response lines up with it.
/// Non-200 items are logged and counted but do not fail the batch.
pub(crate) async fn submit_checked(
    graph: &dyn GraphService,
    store: &StoreContext,
    requests: &[BatchRequest],
) -> Result<(Vec<BatchResponse>, usize)> {
    if store.debug_mode {
        for r in requests {
            info!(store_id = store.store_id, method = ?r.method, url = %r.relative_url, body = ?r.body, "batch item");
        }
    }
    let responses = graph
        .submit_batch(&store.catalog_id, &store.access_token, requests)
        .await
        .with_context(|| format!("failed to submit batch for store {}", store.store_id))?;
    if responses.len() != requests.len() {
        warn!(
            store_id = store.store_id,
            expected = requests.len(),
            got = responses.len(),
            "batch response does not match request count"
        );
        return Err(SyncError::ResponseMismatch {
            expected: requests.len(),
            got: responses.len(),
        }
        .into());
    }

    let mut failed = 0;
    for (idx, (req, res)) in requests.iter().zip(&responses).enumerate() {
        if !res.is_success() {
            failed += 1;
            debug!(store_id = store.store_id, idx, code = res.code, url = %req.relative_url, body = %res.body, "batch item failed");
        }
    }
    if failed > 0 {
        let first = responses
            .iter()
            .find(|r| !r.is_success())
            .and_then(|r| r.error_message())
            .unwrap_or_default();
        warn!(store_id = store.store_id, failed, total = requests.len(), first_error = %first, "batch items rejected");
    }
    Ok((responses, failed))
}

pub struct BatchDispatcher {
    source: Arc<dyn CatalogSource>,
    graph: Arc<dyn GraphService>,
    settings: SyncSettings,
}

impl BatchDispatcher {
    pub fn new(source: Arc<dyn CatalogSource>, graph: Arc<dyn GraphService>, settings: SyncSettings) -> Self {
        Self {
            source,
            graph,
            settings,
        }
    }

    fn batch_size(&self) -> usize {
        self.settings.product_batch_size.clamp(1, PRODUCT_BATCH_MAX)
    }

    /// Full catalog pass for one store using every configured retriever.
    #[instrument(skip_all, fields(store_id = store.store_id, inventory_only = inventory_only))]
    pub async fn generate_product_request_data(
        &self,
        store: &StoreContext,
        inventory_only: bool,
    ) -> Result<DispatchReport> {
        let retrievers = retrievers_for(self.source.clone(), &self.settings, store.store_id);
        self.dispatch(store, &retrievers, inventory_only).await
    }

    pub async fn dispatch(
        &self,
        store: &StoreContext,
        retrievers: &[Box<dyn ProductRetriever>],
        inventory_only: bool,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport {
            store_id: store.store_id,
            ..Default::default()
        };
        let mut buffer = BatchBuffer::new(self.batch_size());
        let mut failures = BuildFailures::new(
            self.settings.logged_build_errors,
            self.settings.max_build_errors,
        );

        for retriever in retrievers {
            let limit = retriever.limit().max(1);
            let mut offset = 0;
            loop {
                let page = retriever
                    .retrieve(offset, limit)
                    .await
                    .with_context(|| format!("{} retriever failed at offset {}", retriever.name(), offset))?;
                if page.is_empty() {
                    break;
                }
                debug!(retriever = retriever.name(), offset, records = page.len(), "retrieved page");
                for product in &page {
                    match feed::build_update(store, product, inventory_only) {
                        Ok(entry) => {
                            if let Some(batch) = buffer.push(entry.to_request(&store.catalog_id)) {
                                self.flush(store, batch, &mut report).await?;
                            }
                        }
                        Err(err) => failures.record(store.store_id, product, err)?,
                    }
                }
                offset += limit;
            }
        }
        if let Some(batch) = buffer.finish() {
            self.flush(store, batch, &mut report).await?;
        }

        report.build_failures = failures.count();
        info!(
            store_id = store.store_id,
            batches = report.batches.len(),
            sent = report.entries_sent,
            build_failures = report.build_failures,
            build_failures_logged = failures.warned(),
            remote_failures = report.remote_failures,
            "catalog pass finished"
        );
        Ok(report)
    }

    async fn flush(
        &self,
        store: &StoreContext,
        batch: Vec<BatchRequest>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let (responses, failed) = submit_checked(self.graph.as_ref(), store, &batch).await?;
        report.entries_sent += batch.len();
        report.remote_failures += failed;
        report.batches.push(responses);
        Ok(())
    }
}
