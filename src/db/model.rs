//! Row decoding for the catalog and queue tables.
//!
//! Keep these functions focused on turning rows into entities. Business logic
//! lives in the retrievers and handlers.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::{
    Category, ChangeMethod, ChangeState, Inventory, LinkType, PendingChange, ProductLink,
    ProductRecord, ProductType, RecordKind,
};

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Decode a `products` row. Media is attached separately by the repository.
pub fn product_from_row(row: &SqliteRow) -> Result<ProductRecord> {
    let id: i64 = row.try_get("id")?;
    let type_str: String = row.try_get("type_id")?;
    let type_id = ProductType::parse_type(&type_str)
        .ok_or_else(|| anyhow!("product {} has unknown type {}", id, type_str))?;
    let kind = match type_id {
        ProductType::Simple => RecordKind::Simple,
        _ => RecordKind::Other,
    };

    Ok(ProductRecord {
        id,
        sku: row.try_get("sku")?,
        type_id,
        kind,
        visibility: row.try_get("visibility")?,
        name: non_empty(row.try_get("name")?),
        description: non_empty(row.try_get("description")?),
        url: non_empty(row.try_get("url")?),
        price: row.try_get("price")?,
        special_price: row.try_get("special_price")?,
        weight: row.try_get("weight")?,
        material: non_empty(row.try_get("material")?),
        pattern: non_empty(row.try_get("pattern")?),
        color: non_empty(row.try_get("color")?),
        size: non_empty(row.try_get("size")?),
        brand: non_empty(row.try_get("brand")?),
        inventory: Inventory {
            qty: row.try_get("qty")?,
            in_stock: row.try_get("is_in_stock")?,
        },
        media: Vec::new(),
        sync_enabled: row.try_get("sync_enabled")?,
        parent: None,
    })
}

pub fn link_from_row(row: &SqliteRow) -> Result<ProductLink> {
    let link_str: String = row.try_get("link_type")?;
    Ok(ProductLink {
        parent_id: row.try_get("parent_id")?,
        child_id: row.try_get("child_id")?,
        link_type: LinkType::parse_link(&link_str)
            .ok_or_else(|| anyhow!("unknown link type {}", link_str))?,
    })
}

/// Decode a `categories` row joined with its store-scoped set id.
pub fn category_from_row(row: &SqliteRow) -> Result<Category> {
    Ok(Category {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        path: row.try_get("path")?,
        name: row.try_get("name")?,
        level: row.try_get("level")?,
        is_active: row.try_get("is_active")?,
        sync_enabled: row.try_get("sync_enabled")?,
        set_id: non_empty(row.try_get("set_id")?),
    })
}

pub fn change_from_row(row: &SqliteRow) -> Result<PendingChange> {
    let id: i64 = row.try_get("id")?;
    let method_str: String = row.try_get("method")?;
    let state_str: String = row.try_get("state")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(PendingChange {
        id,
        product_id: row.try_get("product_id")?,
        sku: row.try_get("sku")?,
        method: ChangeMethod::parse_method(&method_str)
            .ok_or_else(|| anyhow!("change {} has unknown method {}", id, method_str))?,
        batch_id: row.try_get("batch_id")?,
        state: ChangeState::parse_state(&state_str)
            .ok_or_else(|| anyhow!("change {} has unknown state {}", id, state_str))?,
        created_at,
    })
}
