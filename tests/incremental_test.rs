mod common;

use catalog_sync::config::SyncSettings;
use catalog_sync::db::{self, SqliteStore};
use catalog_sync::graph::HttpMethod;
use catalog_sync::incremental::IncrementalUpdateHandler;
use catalog_sync::model::{ChangeMethod, PendingChange};
use catalog_sync::source::ChangeQueue;
use catalog_sync::sync::SyncEngine;
use common::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn handler(pool: &sqlx::SqlitePool, graph: &RecordingGraph, settings: SyncSettings) -> IncrementalUpdateHandler {
    let store = Arc::new(SqliteStore::new(pool.clone()));
    IncrementalUpdateHandler::new(store.clone(), store, Arc::new(graph.clone()), settings)
}

async fn enqueue(pool: &sqlx::SqlitePool, product_id: i64, sku: &str, method: ChangeMethod) {
    db::enqueue_change(pool, product_id, sku, method).await.unwrap();
}

#[tokio::test]
async fn null_sync_flag_takes_the_update_path() {
    let pool = setup_pool().await;
    insert(&pool, simple(1)).await;
    insert(&pool, Seed { sync: Some(false), ..simple(2) }).await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    enqueue(&pool, 2, "SKU-2", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    let report = handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    assert_eq!(report.reserved, 2);
    assert_eq!(report.requests.get(&1), Some(&2));
    assert!(!report.released);

    let calls = graph.calls().await;
    assert_eq!(calls.len(), 1);
    let requests = &calls[0].requests;
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(json_body(&requests[0])["retailer_id"], "SKU-1");
    assert_eq!(json_body(&requests[0])["title"], "Product 1");
    assert_eq!(requests[1].method, HttpMethod::Delete);
    assert_eq!(json_body(&requests[1]), json!({ "retailer_id": "SKU-2" }));

    assert!(queue_rows(&pool).await.is_empty());
}

#[tokio::test]
async fn products_gone_from_the_store_are_deleted() {
    let pool = setup_pool().await;
    insert(&pool, Seed { stores: vec![2], ..simple(1) }).await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    enqueue(&pool, 9, "REMOVED", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let requests = graph.calls().await[0].requests.clone();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.method == HttpMethod::Delete));
    assert_eq!(json_body(&requests[1]), json!({ "retailer_id": "REMOVED" }));
}

#[tokio::test]
async fn delete_changes_use_the_configured_identifier() {
    let pool = setup_pool().await;
    enqueue(&pool, 9, "GONE", ChangeMethod::Delete).await;
    let graph = RecordingGraph::default();
    let mut by_id = store();
    by_id.identifier = catalog_sync::config::ProductIdentifier::Id;

    let report = handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Delete, &[store(), by_id])
        .await
        .unwrap();
    assert_eq!(report.reserved, 1);

    let calls = graph.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].requests[0].relative_url, "CATALOG_ID/products");
    assert_eq!(json_body(&calls[0].requests[0]), json!({ "retailer_id": "GONE" }));
    assert_eq!(json_body(&calls[1].requests[0]), json!({ "retailer_id": "9" }));
}

#[tokio::test]
async fn empty_queue_succeeds_without_requests() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    let report = handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    assert_eq!(report.reserved, 0);
    assert!(graph.calls().await.is_empty());
}

#[tokio::test]
async fn variant_changes_carry_parent_data_even_outside_the_prefetch() {
    let pool = setup_pool().await;
    insert(
        &pool,
        Seed {
            name: Some("Parent".into()),
            stores: vec![],
            ..parent(100, "configurable")
        },
    )
    .await;
    insert(&pool, Seed { name: None, ..variant(101) }).await;
    link(&pool, 100, 101, "super").await;
    enqueue(&pool, 101, "SKU-101", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let entry = json_body(&graph.calls().await[0].requests[0]);
    assert_eq!(entry["title"], "Parent");
    assert_eq!(entry["item_group_id"], "SKU-100");
}

#[tokio::test]
async fn changed_parents_fan_out_to_children() {
    let pool = setup_pool().await;
    insert(&pool, Seed { name: Some("Parent".into()), ..parent(100, "configurable") }).await;
    insert(&pool, Seed { name: None, ..variant(101) }).await;
    insert(&pool, variant(102)).await;
    link(&pool, 100, 101, "super").await;
    link(&pool, 100, 102, "super").await;
    enqueue(&pool, 100, "SKU-100", ChangeMethod::Update).await;
    enqueue(&pool, 102, "SKU-102", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let ids: Vec<String> = graph.calls().await[0]
        .requests
        .iter()
        .map(|r| json_body(r)["retailer_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["SKU-101", "SKU-102"]);
}

#[tokio::test]
async fn failed_pass_releases_and_rerun_reprocesses_the_rest() {
    let pool = setup_pool().await;
    insert_all(&pool, (1..=3).map(simple)).await;
    for id in 1..=3 {
        enqueue(&pool, id, &format!("SKU-{id}"), ChangeMethod::Update).await;
    }
    let settings = SyncSettings {
        incremental_claim_limit: 2,
        ..Default::default()
    };
    let graph = RecordingGraph::with_replies(vec![Reply::Ok, Reply::Fail("timeout".into())]);
    let handler = handler(&pool, &graph, settings);

    let first = handler.process(ChangeMethod::Update, &[store()]).await.unwrap();
    assert_eq!(first.reserved, 2);
    assert_eq!(queue_rows(&pool).await.len(), 1);

    let second = handler.process(ChangeMethod::Update, &[store()]).await.unwrap();
    assert_eq!(second.failed_stores, vec![1]);
    assert!(second.released);
    assert_eq!(
        queue_rows(&pool).await,
        vec![(3, "update".to_string(), None, "pending".to_string())]
    );

    let third = handler.process(ChangeMethod::Update, &[store()]).await.unwrap();
    assert_eq!(third.reserved, 1);
    let calls = graph.calls().await;
    assert_eq!(calls.len(), 3);
    assert_eq!(json_body(&calls[2].requests[0])["retailer_id"], "SKU-3");
    assert!(queue_rows(&pool).await.is_empty());
}

#[tokio::test]
async fn mismatched_response_releases_the_reservation() {
    let pool = setup_pool().await;
    insert_all(&pool, (1..=2).map(simple)).await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    enqueue(&pool, 2, "SKU-2", ChangeMethod::Update).await;
    let graph = RecordingGraph::with_replies(vec![Reply::Truncate(1)]);

    let report = handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    assert!(report.released);
    assert_eq!(db::count_pending_changes(&pool, Some(ChangeMethod::Update)).await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_claims_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    for id in 1..=10 {
        enqueue(&pool, id, &format!("SKU-{id}"), ChangeMethod::Update).await;
    }
    let a = SqliteStore::new(pool.clone());
    let b = SqliteStore::new(pool.clone());

    let (ca, cb) = tokio::join!(
        a.claim(ChangeMethod::Update, "batch-a", 6),
        b.claim(ChangeMethod::Update, "batch-b", 6),
    );
    assert_eq!(ca.unwrap() + cb.unwrap(), 10);

    let ids_a: HashSet<i64> = a.fetch_batch("batch-a").await.unwrap().iter().map(|c| c.id).collect();
    let ids_b: HashSet<i64> = b.fetch_batch("batch-b").await.unwrap().iter().map(|c| c.id).collect();
    assert!(ids_a.is_disjoint(&ids_b));
    assert_eq!(ids_a.len() + ids_b.len(), 10);
}

#[tokio::test]
async fn engine_leaves_queue_alone_without_eligible_stores() {
    let pool = setup_pool().await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    let mut cfg = config();
    cfg.stores[0].sync_enabled = false;
    let graph = RecordingGraph::default();
    let engine = SyncEngine::new(cfg, Arc::new(SqliteStore::new(pool.clone())), Arc::new(graph.clone()));

    let reports = engine
        .run_incremental(None, &[ChangeMethod::Update, ChangeMethod::Delete])
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert_eq!(queue_rows(&pool).await.len(), 1);
}

#[tokio::test]
async fn toggling_sync_off_queues_a_remote_delete() {
    let pool = setup_pool().await;
    insert(&pool, simple(1)).await;
    let graph = RecordingGraph::default();
    let engine = SyncEngine::new(config(), Arc::new(SqliteStore::new(pool.clone())), Arc::new(graph.clone()));

    engine.product_changed(1, "SKU-1", ChangeMethod::Delete).await.unwrap();
    engine.set_product_sync(1, "SKU-1", Some(false)).await.unwrap();
    // the newer update superseded the pending delete
    assert_eq!(
        queue_rows(&pool).await,
        vec![(1, "update".to_string(), None, "pending".to_string())]
    );

    let reports = engine
        .run_incremental(Some(1), &[ChangeMethod::Update, ChangeMethod::Delete])
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].reserved, 0);
    let calls = graph.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].requests[0].method, HttpMethod::Delete);
}

/// Queue whose deletes always fail, as with a locked database.
struct LockedOnDelete(SqliteStore);

#[async_trait::async_trait]
impl ChangeQueue for LockedOnDelete {
    async fn enqueue(&self, product_id: i64, sku: &str, method: ChangeMethod) -> anyhow::Result<i64> {
        self.0.enqueue(product_id, sku, method).await
    }

    async fn claim(&self, method: ChangeMethod, batch_id: &str, limit: usize) -> anyhow::Result<u64> {
        self.0.claim(method, batch_id, limit).await
    }

    async fn fetch_batch(&self, batch_id: &str) -> anyhow::Result<Vec<PendingChange>> {
        self.0.fetch_batch(batch_id).await
    }

    async fn delete_batch(&self, _batch_id: &str) -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("database is locked"))
    }

    async fn clear_batch(&self, batch_id: &str) -> anyhow::Result<u64> {
        self.0.clear_batch(batch_id).await
    }
}

#[tokio::test]
async fn failed_cleanup_puts_the_reservation_back() {
    let pool = setup_pool().await;
    insert(&pool, simple(1)).await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();
    let store_db = SqliteStore::new(pool.clone());
    let handler = IncrementalUpdateHandler::new(
        Arc::new(store_db.clone()),
        Arc::new(LockedOnDelete(store_db)),
        Arc::new(graph.clone()),
        SyncSettings::default(),
    );

    let err = handler.process(ChangeMethod::Update, &[store()]).await.unwrap_err();
    assert!(format!("{err:#}").contains("database is locked"));
    assert_eq!(graph.calls().await.len(), 1);
    assert_eq!(
        queue_rows(&pool).await,
        vec![(1, "update".to_string(), None, "pending".to_string())]
    );
}

fn two_store_config() -> catalog_sync::config::Config {
    let mut cfg = config();
    cfg.stores[1].sync_enabled = true;
    cfg.stores[1].catalog_id = Some("OUTLET_CATALOG".into());
    cfg.stores[1].access_token = Some("OUTLET_TOKEN".into());
    cfg
}

#[tokio::test]
async fn single_store_run_keeps_changes_for_the_other_stores() {
    let pool = setup_pool().await;
    insert(&pool, Seed { stores: vec![1, 2], ..simple(1) }).await;
    enqueue(&pool, 1, "SKU-1", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();
    let engine = SyncEngine::new(
        two_store_config(),
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(graph.clone()),
    );

    let reports = engine.run_incremental(Some(1), &[ChangeMethod::Update]).await.unwrap();
    assert_eq!(reports[0].reserved, 1);
    assert!(reports[0].released);
    assert!(reports[0].failed_stores.is_empty());
    assert_eq!(
        queue_rows(&pool).await,
        vec![(1, "update".to_string(), None, "pending".to_string())]
    );

    let reports = engine.run_incremental(None, &[ChangeMethod::Update]).await.unwrap();
    assert!(!reports[0].released);
    assert!(queue_rows(&pool).await.is_empty());

    let calls = graph.calls().await;
    let catalogs: Vec<&str> = calls.iter().map(|c| c.entity_id.as_str()).collect();
    assert_eq!(catalogs, vec!["CATALOG_ID", "CATALOG_ID", "OUTLET_CATALOG"]);
    // the outlet identifies products by id
    assert_eq!(json_body(&calls[2].requests[0])["retailer_id"], "1");
}

#[tokio::test]
async fn products_the_catalog_pass_skips_are_deleted() {
    let pool = setup_pool().await;
    insert(&pool, parent(5, "virtual")).await;
    insert(&pool, Seed { sync: Some(false), ..parent(100, "configurable") }).await;
    insert(&pool, variant(101)).await;
    link(&pool, 100, 101, "super").await;
    insert(&pool, variant(7)).await;
    for (id, sku) in [(5, "SKU-5"), (101, "SKU-101"), (7, "SKU-7")] {
        enqueue(&pool, id, sku, ChangeMethod::Update).await;
    }
    let settings = SyncSettings {
        include_other_types: false,
        ..Default::default()
    };
    let graph = RecordingGraph::default();

    handler(&pool, &graph, settings)
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let requests = &graph.calls().await[0].requests;
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.method == HttpMethod::Delete));
    let ids: Vec<String> = requests
        .iter()
        .map(|r| json_body(r)["retailer_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["SKU-5", "SKU-101", "SKU-7"]);
}

#[tokio::test]
async fn other_types_are_updated_when_enabled() {
    let pool = setup_pool().await;
    insert(&pool, parent(5, "virtual")).await;
    enqueue(&pool, 5, "SKU-5", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let requests = &graph.calls().await[0].requests;
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(json_body(&requests[0])["retailer_id"], "SKU-5");
}

#[tokio::test]
async fn disabled_parent_deletes_only_children_nobody_else_publishes() {
    let pool = setup_pool().await;
    insert(&pool, Seed { sync: Some(false), ..parent(100, "configurable") }).await;
    insert(&pool, parent(200, "configurable")).await;
    insert(&pool, variant(101)).await;
    insert(&pool, variant(102)).await;
    link(&pool, 100, 101, "super").await;
    link(&pool, 100, 102, "super").await;
    link(&pool, 200, 102, "super").await;
    enqueue(&pool, 100, "SKU-100", ChangeMethod::Update).await;
    let graph = RecordingGraph::default();

    handler(&pool, &graph, SyncSettings::default())
        .process(ChangeMethod::Update, &[store()])
        .await
        .unwrap();
    let requests = &graph.calls().await[0].requests;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, HttpMethod::Delete);
    assert_eq!(json_body(&requests[0])["retailer_id"], "SKU-101");
    assert_eq!(requests[1].method, HttpMethod::Post);
    assert_eq!(json_body(&requests[1])["item_group_id"], "SKU-200");
}
