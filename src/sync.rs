//! Per-store orchestration of the sync passes and change hooks.
//!
//! Every pass resolves the eligible stores once, runs them one after another,
//! logs a failing store and moves on to the next.
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::category::{CategorySyncReport, CategorySynchronizer};
use crate::config::Config;
use crate::dispatcher::{BatchDispatcher, DispatchReport};
use crate::graph::GraphService;
use crate::incremental::{Completion, IncrementalReport, IncrementalUpdateHandler};
use crate::model::ChangeMethod;
use crate::source::{CatalogSource, CategorySetStore, ChangeQueue, SyncFlags};
use crate::store::{eligible_stores, StoreContext};

/// Reports of the stores that completed plus the ids of those that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome<T> {
    pub reports: Vec<T>,
    pub failed_stores: Vec<i64>,
}

impl<T> Default for PassOutcome<T> {
    fn default() -> Self {
        Self {
            reports: Vec::new(),
            failed_stores: Vec::new(),
        }
    }
}

impl<T> PassOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.failed_stores.is_empty()
    }

    fn record(&mut self, store_id: i64, pass: &str, result: Result<T>) {
        match result {
            Ok(report) => self.reports.push(report),
            Err(err) => {
                error!(store_id, pass, "store pass failed: {:#}", err);
                self.failed_stores.push(store_id);
            }
        }
    }
}

pub struct SyncEngine {
    cfg: Config,
    queue: Arc<dyn ChangeQueue>,
    flags: Arc<dyn SyncFlags>,
    dispatcher: BatchDispatcher,
    incremental: IncrementalUpdateHandler,
    categories: CategorySynchronizer,
}

impl SyncEngine {
    pub fn new<S>(cfg: Config, store: Arc<S>, graph: Arc<dyn GraphService>) -> Self
    where
        S: CatalogSource + CategorySetStore + ChangeQueue + SyncFlags + 'static,
    {
        let source: Arc<dyn CatalogSource> = store.clone();
        let queue: Arc<dyn ChangeQueue> = store.clone();
        let sets: Arc<dyn CategorySetStore> = store.clone();
        let flags: Arc<dyn SyncFlags> = store;
        let settings = cfg.sync.clone();
        Self {
            dispatcher: BatchDispatcher::new(source.clone(), graph.clone(), settings.clone()),
            incremental: IncrementalUpdateHandler::new(
                source.clone(),
                queue.clone(),
                graph.clone(),
                settings.clone(),
            ),
            categories: CategorySynchronizer::new(source, sets, graph, &settings),
            cfg,
            queue,
            flags,
        }
    }

    fn stores(&self, only: Option<i64>) -> Vec<StoreContext> {
        eligible_stores(&self.cfg, only)
    }

    /// Push the whole catalog of each eligible store.
    #[instrument(skip_all, fields(only = ?only, inventory_only = inventory_only))]
    pub async fn run_full(&self, only: Option<i64>, inventory_only: bool) -> PassOutcome<DispatchReport> {
        let mut outcome = PassOutcome::default();
        for store in self.stores(only) {
            let result = self
                .dispatcher
                .generate_product_request_data(&store, inventory_only)
                .await;
            outcome.record(store.store_id, "full", result);
        }
        outcome
    }

    /// Drain one reservation per method. Without an eligible store nothing is
    /// claimed, so queued changes wait for a store to come back. A run limited
    /// to some of the eligible stores sends the changes but leaves them queued
    /// for the others.
    #[instrument(skip_all, fields(only = ?only))]
    pub async fn run_incremental(&self, only: Option<i64>, methods: &[ChangeMethod]) -> Result<Vec<IncrementalReport>> {
        let stores = self.stores(only);
        if stores.is_empty() {
            warn!("no eligible store; leaving pending changes queued");
            return Ok(Vec::new());
        }
        let completion = if only.is_some() && self.stores(None).len() > stores.len() {
            Completion::Release
        } else {
            Completion::Delete
        };
        let mut reports = Vec::with_capacity(methods.len());
        for method in methods {
            let report = self
                .incremental
                .process_with(*method, &stores, completion)
                .await?;
            info!(
                method = method.as_str(),
                batch_id = %report.batch_id,
                reserved = report.reserved,
                failed_stores = ?report.failed_stores,
                "incremental pass finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    #[instrument(skip_all, fields(only = ?only))]
    pub async fn run_categories(&self, only: Option<i64>) -> PassOutcome<CategorySyncReport> {
        let mut outcome = PassOutcome::default();
        for store in self.stores(only) {
            let result = self.categories.sync_all(&store).await;
            outcome.record(store.store_id, "categories", result);
        }
        outcome
    }

    /// A category was saved; push it (and its subtree on rename) everywhere.
    pub async fn category_saved(&self, category_id: i64, name_changed: bool) -> PassOutcome<CategorySyncReport> {
        let mut outcome = PassOutcome::default();
        for store in self.stores(None) {
            let result = self
                .categories
                .sync_category(&store, category_id, name_changed)
                .await;
            outcome.record(store.store_id, "category", result);
        }
        outcome
    }

    /// A category is about to be deleted; drop its remote sets everywhere.
    pub async fn category_deleted(&self, category_id: i64) -> PassOutcome<CategorySyncReport> {
        let mut outcome = PassOutcome::default();
        for store in self.stores(None) {
            let result = self.categories.delete_category(&store, category_id).await;
            outcome.record(store.store_id, "category-delete", result);
        }
        outcome
    }

    /// Capture a product change for the next incremental pass.
    pub async fn product_changed(&self, product_id: i64, sku: &str, method: ChangeMethod) -> Result<i64> {
        let id = self.queue.enqueue(product_id, sku, method).await?;
        info!(product_id, sku, method = method.as_str(), change_id = id, "product change queued");
        Ok(id)
    }

    /// Flip a product's sync flag. The queued update turns into a remote
    /// delete when the flag is now `false`.
    pub async fn set_product_sync(&self, product_id: i64, sku: &str, enabled: Option<bool>) -> Result<i64> {
        self.flags.set_product_sync(product_id, enabled).await?;
        self.product_changed(product_id, sku, ChangeMethod::Update).await
    }

    pub async fn set_category_sync(&self, category_id: i64, enabled: Option<bool>) -> Result<()> {
        self.flags.set_category_sync(category_id, enabled).await?;
        if enabled != Some(false) {
            let outcome = self.category_saved(category_id, false).await;
            if !outcome.is_success() {
                warn!(category_id, failed_stores = ?outcome.failed_stores, "category push failed after enabling sync");
            }
        }
        Ok(())
    }
}
