#![allow(dead_code)]

use anyhow::{anyhow, Result};
use catalog_sync::config::{self, Config};
use catalog_sync::graph::{BatchRequest, BatchResponse, GraphService, RequestBody};
use catalog_sync::store::StoreContext;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

/// Store 1 of the example configuration: SKU identifiers, catalog `CATALOG_ID`,
/// root category 2.
pub fn store() -> StoreContext {
    StoreContext::resolve(&config().stores[0]).unwrap()
}

#[derive(Debug, Clone)]
pub struct Seed {
    pub id: i64,
    pub sku: String,
    pub type_id: &'static str,
    pub visibility: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub price: Option<f64>,
    pub weight: Option<f64>,
    pub material: Option<String>,
    pub qty: f64,
    pub sync: Option<bool>,
    pub stores: Vec<i64>,
}

pub fn simple(id: i64) -> Seed {
    Seed {
        id,
        sku: format!("SKU-{id}"),
        type_id: "simple",
        visibility: 4,
        name: Some(format!("Product {id}")),
        description: None,
        url: Some(format!("https://shop.test/p/{id}")),
        price: Some(10.0),
        weight: None,
        material: None,
        qty: 5.0,
        sync: None,
        stores: vec![1],
    }
}

pub fn parent(id: i64, type_id: &'static str) -> Seed {
    Seed {
        type_id,
        ..simple(id)
    }
}

/// A variant: simple, not visible on its own.
pub fn variant(id: i64) -> Seed {
    Seed {
        visibility: 1,
        ..simple(id)
    }
}

pub async fn insert_on(conn: &mut SqliteConnection, seed: &Seed) {
    sqlx::query(
        "INSERT INTO products (id, sku, type_id, visibility, name, description, url, price, weight, material, qty, is_in_stock, sync_enabled) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(seed.id)
    .bind(&seed.sku)
    .bind(seed.type_id)
    .bind(seed.visibility)
    .bind(&seed.name)
    .bind(&seed.description)
    .bind(&seed.url)
    .bind(seed.price)
    .bind(seed.weight)
    .bind(&seed.material)
    .bind(seed.qty)
    .bind(seed.sync)
    .execute(&mut *conn)
    .await
    .unwrap();
    for store_id in &seed.stores {
        sqlx::query("INSERT INTO product_stores (product_id, store_id) VALUES (?, ?)")
            .bind(seed.id)
            .bind(*store_id)
            .execute(&mut *conn)
            .await
            .unwrap();
    }
}

pub async fn insert(pool: &SqlitePool, seed: Seed) {
    let mut conn = pool.acquire().await.unwrap();
    insert_on(&mut conn, &seed).await;
}

pub async fn insert_all(pool: &SqlitePool, seeds: impl IntoIterator<Item = Seed>) {
    let mut tx = pool.begin().await.unwrap();
    for seed in seeds {
        insert_on(&mut tx, &seed).await;
    }
    tx.commit().await.unwrap();
}

pub async fn link(pool: &SqlitePool, parent_id: i64, child_id: i64, link_type: &str) {
    sqlx::query("INSERT INTO product_links (parent_id, child_id, link_type) VALUES (?, ?, ?)")
        .bind(parent_id)
        .bind(child_id)
        .bind(link_type)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn media(pool: &SqlitePool, product_id: i64, position: i64, url: &str) {
    sqlx::query("INSERT INTO product_media (product_id, position, url) VALUES (?, ?, ?)")
        .bind(product_id)
        .bind(position)
        .bind(url)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn category(pool: &SqlitePool, id: i64, parent_id: Option<i64>, path: &str, name: &str) {
    let level = path.split('/').count() as i64 - 1;
    sqlx::query(
        "INSERT INTO categories (id, parent_id, path, name, level, position, is_active) VALUES (?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(id)
    .bind(parent_id)
    .bind(path)
    .bind(name)
    .bind(level)
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
}

/// Root (1) > Default Category (2), the store root of the example config.
pub async fn category_root(pool: &SqlitePool) {
    category(pool, 1, None, "1", "Root Catalog").await;
    category(pool, 2, Some(1), "1/2", "Default Category").await;
}

pub async fn assign(pool: &SqlitePool, category_id: i64, product_id: i64) {
    sqlx::query("INSERT INTO category_products (category_id, product_id) VALUES (?, ?)")
        .bind(category_id)
        .bind(product_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn set_id_of(pool: &SqlitePool, store_id: i64, category_id: i64) -> Option<String> {
    sqlx::query_scalar("SELECT set_id FROM category_product_sets WHERE category_id = ? AND store_id = ?")
        .bind(category_id)
        .bind(store_id)
        .fetch_optional(pool)
        .await
        .unwrap()
}

pub async fn queue_rows(pool: &SqlitePool) -> Vec<(i64, String, Option<String>, String)> {
    sqlx::query_as("SELECT product_id, method, batch_id, state FROM pending_changes ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

/// What the recording graph answers with for the next batch.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Every item succeeds; `product_sets` creates get `set-<call>-<idx>`.
    Ok,
    Items(Vec<BatchResponse>),
    /// Answer with only the first `n` default items.
    Truncate(usize),
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub entity_id: String,
    pub access_token: String,
    pub requests: Vec<BatchRequest>,
}

#[derive(Clone, Default)]
pub struct RecordingGraph {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingGraph {
    pub fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn sizes(&self) -> Vec<usize> {
        self.calls().await.iter().map(|c| c.requests.len()).collect()
    }

    fn default_items(call_no: usize, requests: &[BatchRequest]) -> Vec<BatchResponse> {
        requests
            .iter()
            .enumerate()
            .map(|(idx, r)| BatchResponse {
                code: 200,
                body: if r.relative_url.ends_with("/product_sets") {
                    format!(r#"{{"id":"set-{call_no}-{idx}"}}"#)
                } else {
                    r#"{"success":true}"#.to_string()
                },
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl GraphService for RecordingGraph {
    async fn submit_batch(
        &self,
        entity_id: &str,
        access_token: &str,
        requests: &[BatchRequest],
    ) -> Result<Vec<BatchResponse>> {
        let call_no = {
            let mut calls = self.calls.lock().await;
            calls.push(Call {
                entity_id: entity_id.to_string(),
                access_token: access_token.to_string(),
                requests: requests.to_vec(),
            });
            calls.len()
        };
        let reply = self.replies.lock().await.pop_front().unwrap_or(Reply::Ok);
        match reply {
            Reply::Ok => Ok(Self::default_items(call_no, requests)),
            Reply::Items(items) => Ok(items),
            Reply::Truncate(n) => {
                let mut items = Self::default_items(call_no, requests);
                items.truncate(n);
                Ok(items)
            }
            Reply::Fail(msg) => Err(anyhow!(msg)),
        }
    }
}

/// JSON body of a product request.
pub fn json_body(request: &BatchRequest) -> serde_json::Value {
    match &request.body {
        Some(RequestBody::Json(v)) => v.clone(),
        other => panic!("expected JSON body, got {other:?}"),
    }
}

/// Decoded `name`/`filter` of a product set form.
pub fn form_body(request: &BatchRequest) -> (String, serde_json::Value) {
    let Some(RequestBody::Form(form)) = &request.body else {
        panic!("expected form body, got {:?}", request.body);
    };
    let mut name = String::new();
    let mut filter = serde_json::Value::Null;
    for (k, v) in url::form_urlencoded::parse(form.as_bytes()) {
        match k.as_ref() {
            "name" => name = v.into_owned(),
            "filter" => filter = serde_json::from_str(&v).unwrap(),
            _ => {}
        }
    }
    (name, filter)
}
