use super::model::{category_from_row, change_from_row, link_from_row, product_from_row};
use crate::model::{
    Category, ChangeMethod, ChangeState, PendingChange, ProductLink, ProductRecord,
    NOT_VISIBLE_INDIVIDUALLY,
};
use crate::source::{LinkFilter, ProductFilter};
use anyhow::{Context, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::instrument;

pub type Pool = SqlitePool;

const PRODUCT_COLUMNS: &str = "p.id, p.sku, p.type_id, p.visibility, p.name, p.description, \
     p.url, p.price, p.special_price, p.weight, p.material, p.pattern, p.color, p.size, \
     p.brand, p.qty, p.is_in_stock, p.sync_enabled";

const CATEGORY_COLUMNS: &str = "c.id, c.parent_id, c.path, c.name, c.level, c.is_active, \
     c.sync_enabled, s.set_id";

const SYNC_NOT_DISABLED: &str = "(p.sync_enabled IS NULL OR p.sync_enabled <> 0)";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open catalog database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/`, make sure the parent
/// directory exists and ask SQLite to create the file. In-memory and
/// non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) if q.contains("mode=") => format!("sqlite://{}?{}", path, q),
        Some(q) => format!("sqlite://{}?{}&mode=rwc", path, q),
        None => format!("sqlite://{}?mode=rwc", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    qb.push("(");
    {
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
    }
    qb.push(")");
}

fn push_str_list(qb: &mut QueryBuilder<'_, Sqlite>, values: &[&'static str]) {
    qb.push("(");
    {
        let mut sep = qb.separated(", ");
        for v in values {
            sep.push_bind(*v);
        }
    }
    qb.push(")");
}

#[instrument(skip_all)]
pub async fn find_products(
    pool: &Pool,
    filter: &ProductFilter,
    offset: usize,
    limit: usize,
) -> Result<Vec<ProductRecord>> {
    if limit == 0 || filter.ids.as_ref().is_some_and(|ids| ids.is_empty()) {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE 1 = 1"));
    if let Some(store_id) = filter.store_id {
        qb.push(" AND EXISTS (SELECT 1 FROM product_stores ps WHERE ps.product_id = p.id AND ps.store_id = ")
            .push_bind(store_id)
            .push(")");
    }
    if !filter.type_ids.is_empty() {
        let types: Vec<&'static str> = filter.type_ids.iter().map(|t| t.as_str()).collect();
        qb.push(" AND p.type_id IN ");
        push_str_list(&mut qb, &types);
    }
    if !filter.exclude_type_ids.is_empty() {
        let types: Vec<&'static str> = filter.exclude_type_ids.iter().map(|t| t.as_str()).collect();
        qb.push(" AND p.type_id NOT IN ");
        push_str_list(&mut qb, &types);
    }
    if filter.visible_only {
        qb.push(" AND p.visibility <> ").push_bind(NOT_VISIBLE_INDIVIDUALLY);
    }
    if filter.exclude_sync_disabled {
        qb.push(" AND ").push(SYNC_NOT_DISABLED);
    }
    if let Some(ids) = &filter.ids {
        qb.push(" AND p.id IN ");
        push_id_list(&mut qb, ids);
    }
    if let Some(category_id) = filter.category_id {
        qb.push(" AND EXISTS (SELECT 1 FROM category_products cp WHERE cp.product_id = p.id AND cp.category_id = ")
            .push_bind(category_id)
            .push(")");
    }
    if let Some(link_type) = filter.with_children {
        qb.push(
            " AND EXISTS (SELECT 1 FROM product_links l JOIN products c ON c.id = l.child_id \
             WHERE l.parent_id = p.id AND (c.sync_enabled IS NULL OR c.sync_enabled <> 0) AND l.link_type = ",
        )
        .push_bind(link_type.as_str());
        if let Some(store_id) = filter.store_id {
            qb.push(" AND EXISTS (SELECT 1 FROM product_stores cs WHERE cs.product_id = c.id AND cs.store_id = ")
                .push_bind(store_id)
                .push(")");
        }
        qb.push(")");
    }
    qb.push(" ORDER BY p.id LIMIT ")
        .push_bind(limit as i64)
        .push(" OFFSET ")
        .push_bind(offset as i64);

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("failed to query products")?;
    let mut products = rows
        .iter()
        .map(product_from_row)
        .collect::<Result<Vec<_>>>()?;
    attach_media(pool, &mut products).await?;
    Ok(products)
}

async fn attach_media(pool: &Pool, products: &mut [ProductRecord]) -> Result<()> {
    if products.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT product_id, url FROM product_media WHERE product_id IN ");
    push_id_list(&mut qb, &ids);
    qb.push(" ORDER BY product_id, position, id");

    let rows = qb.build().fetch_all(pool).await?;
    let mut media: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        let product_id: i64 = row.get("product_id");
        let url: String = row.get("url");
        media.entry(product_id).or_default().push(url);
    }
    for product in products.iter_mut() {
        if let Some(urls) = media.remove(&product.id) {
            product.media = urls;
        }
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_links(pool: &Pool, filter: &LinkFilter) -> Result<Vec<ProductLink>> {
    let empty = |ids: &Option<Vec<i64>>| ids.as_ref().is_some_and(|v| v.is_empty());
    if empty(&filter.parent_ids) || empty(&filter.child_ids) {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT parent_id, child_id, link_type FROM product_links WHERE 1 = 1");
    if let Some(ids) = &filter.parent_ids {
        qb.push(" AND parent_id IN ");
        push_id_list(&mut qb, ids);
    }
    if let Some(ids) = &filter.child_ids {
        qb.push(" AND child_id IN ");
        push_id_list(&mut qb, ids);
    }
    if let Some(link_type) = filter.link_type {
        qb.push(" AND link_type = ").push_bind(link_type.as_str());
    }
    qb.push(" ORDER BY parent_id, child_id");

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("failed to query product links")?;
    rows.iter().map(link_from_row).collect()
}

#[instrument(skip_all)]
pub async fn find_categories_by_path_prefix(
    pool: &Pool,
    store_id: i64,
    prefix: &str,
    active_only: bool,
) -> Result<Vec<Category>> {
    let prefix = prefix.trim_end_matches('/');
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories c \
         LEFT JOIN category_product_sets s ON s.category_id = c.id AND s.store_id = "
    ));
    qb.push_bind(store_id)
        .push(" WHERE (c.path = ")
        .push_bind(prefix.to_string())
        .push(" OR c.path LIKE ")
        .push_bind(format!("{}/%", prefix))
        .push(")");
    if active_only {
        qb.push(" AND c.is_active = 1");
    }
    qb.push(" ORDER BY c.level, c.position, c.id");

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("failed to query category subtree")?;
    rows.iter().map(category_from_row).collect()
}

#[instrument(skip_all)]
pub async fn find_categories(pool: &Pool, store_id: i64, ids: &[i64]) -> Result<Vec<Category>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories c \
         LEFT JOIN category_product_sets s ON s.category_id = c.id AND s.store_id = "
    ));
    qb.push_bind(store_id).push(" WHERE c.id IN ");
    push_id_list(&mut qb, ids);
    qb.push(" ORDER BY c.level, c.position, c.id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(category_from_row).collect()
}

#[instrument(skip_all)]
pub async fn save_category_set_id(
    pool: &Pool,
    store_id: i64,
    category_id: i64,
    set_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO category_product_sets (category_id, store_id, set_id) VALUES (?, ?, ?) \
         ON CONFLICT(category_id, store_id) DO UPDATE SET set_id = excluded.set_id, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(category_id)
    .bind(store_id)
    .bind(set_id)
    .execute(pool)
    .await
    .context("failed to persist category product set id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn clear_category_set_id(pool: &Pool, store_id: i64, category_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM category_product_sets WHERE category_id = ? AND store_id = ?")
        .bind(category_id)
        .bind(store_id)
        .execute(pool)
        .await
        .context("failed to clear category product set id")?;
    Ok(())
}

pub async fn set_product_sync_flag(pool: &Pool, product_id: i64, enabled: Option<bool>) -> Result<()> {
    sqlx::query("UPDATE products SET sync_enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(product_id)
        .execute(pool)
        .await
        .context("failed to update product sync flag")?;
    Ok(())
}

pub async fn set_category_sync_flag(pool: &Pool, category_id: i64, enabled: Option<bool>) -> Result<()> {
    sqlx::query("UPDATE categories SET sync_enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(category_id)
        .execute(pool)
        .await
        .context("failed to update category sync flag")?;
    Ok(())
}

/// Record a pending change. A newer change for the same (product, method)
/// refreshes the row and detaches it from any in-flight reservation, so the
/// next pass picks it up again. An unreserved change of the opposite method is
/// superseded.
#[instrument(skip_all)]
pub async fn enqueue_change(
    pool: &Pool,
    product_id: i64,
    sku: &str,
    method: ChangeMethod,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM pending_changes WHERE product_id = ? AND method = ? AND batch_id IS NULL",
    )
    .bind(product_id)
    .bind(method.opposite().as_str())
    .execute(&mut *tx)
    .await?;
    let rec = sqlx::query(
        "INSERT INTO pending_changes (product_id, sku, method, state) VALUES (?, ?, ?, ?) \
         ON CONFLICT(product_id, method) DO UPDATE SET sku = excluded.sku, batch_id = NULL, \
         state = excluded.state, created_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(product_id)
    .bind(sku)
    .bind(method.as_str())
    .bind(ChangeState::Pending.as_str())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(rec.get("id"))
}

/// Reserve up to `limit` unreserved changes under `batch_id`. This is a single
/// conditional UPDATE, so concurrent claimers never share a row.
#[instrument(skip_all, fields(method = method.as_str(), batch_id = %batch_id))]
pub async fn claim_changes(
    pool: &Pool,
    method: ChangeMethod,
    batch_id: &str,
    limit: usize,
) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE pending_changes SET batch_id = ?, state = ? \
         WHERE batch_id IS NULL AND id IN ( \
             SELECT id FROM pending_changes WHERE method = ? AND batch_id IS NULL ORDER BY id LIMIT ?)",
    )
    .bind(batch_id)
    .bind(ChangeState::Reserved.as_str())
    .bind(method.as_str())
    .bind(limit as i64)
    .execute(pool)
    .await
    .context("failed to claim pending changes")?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn fetch_changes_by_batch(pool: &Pool, batch_id: &str) -> Result<Vec<PendingChange>> {
    let rows = sqlx::query(
        "SELECT id, product_id, sku, method, batch_id, state, created_at \
         FROM pending_changes WHERE batch_id = ? ORDER BY id",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(change_from_row).collect()
}

#[instrument(skip_all)]
pub async fn delete_changes_by_batch(pool: &Pool, batch_id: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM pending_changes WHERE batch_id = ?")
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn clear_changes_batch(pool: &Pool, batch_id: &str) -> Result<u64> {
    let res = sqlx::query("UPDATE pending_changes SET batch_id = NULL, state = ? WHERE batch_id = ?")
        .bind(ChangeState::Pending.as_str())
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_pending_changes(pool: &Pool, method: Option<ChangeMethod>) -> Result<i64> {
    let count: i64 = match method {
        Some(m) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes WHERE method = ? AND batch_id IS NULL")
                .bind(m.as_str())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes WHERE batch_id IS NULL")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}
