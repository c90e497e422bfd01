//! Maps product records onto the remote catalog's item schema.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::graph::{BatchRequest, HttpMethod, RequestBody};
use crate::model::{ProductRecord, RecordKind};
use crate::store::StoreContext;

const TITLE_MAX_CHARS: usize = 150;
const DESCRIPTION_MAX_CHARS: usize = 5000;
const ADDITIONAL_IMAGES_MAX: usize = 20;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("product {product_id} has no {field}")]
    MissingField {
        product_id: i64,
        field: &'static str,
    },
    #[error("product {product_id} has an invalid price {price}")]
    InvalidPrice { product_id: i64, price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Update,
    Delete,
}

/// One item in the remote catalog's schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    #[serde(skip)]
    pub operation: Operation,
    pub retailer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_link: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_image_link: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_weight: Option<String>,
}

impl FeedEntry {
    fn bare(operation: Operation, retailer_id: String) -> Self {
        Self {
            operation,
            retailer_id,
            title: None,
            description: None,
            availability: None,
            inventory: None,
            condition: None,
            price: None,
            sale_price: None,
            link: None,
            image_link: None,
            additional_image_link: Vec::new(),
            brand: None,
            item_group_id: None,
            color: None,
            size: None,
            material: None,
            pattern: None,
            shipping_weight: None,
        }
    }

    pub fn delete(retailer_id: impl Into<String>) -> Self {
        Self::bare(Operation::Delete, retailer_id.into())
    }

    /// Batch item for this entry against `catalog_id`.
    pub fn to_request(&self, catalog_id: &str) -> BatchRequest {
        let relative_url = format!("{}/products", catalog_id);
        match self.operation {
            Operation::Update => BatchRequest::new(
                HttpMethod::Post,
                relative_url,
                Some(RequestBody::Json(json!(self))),
            ),
            Operation::Delete => BatchRequest::new(
                HttpMethod::Delete,
                relative_url,
                Some(RequestBody::Json(json!({ "retailer_id": self.retailer_id }))),
            ),
        }
    }
}

fn clean_text(raw: &str, max_chars: usize) -> String {
    let stripped = TAG_RE.replace_all(raw, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let collapsed = SPACE_RE.replace_all(decoded.trim(), " ");
    collapsed.chars().take(max_chars).collect()
}

fn format_price(amount: f64, currency: &str) -> String {
    format!("{:.2} {}", amount, currency)
}

/// Build the update entry for `product`. With `inventory_only` the entry only
/// carries stock and price fields.
pub fn build_update(
    store: &StoreContext,
    product: &ProductRecord,
    inventory_only: bool,
) -> Result<FeedEntry, BuildError> {
    let missing = |field| BuildError::MissingField {
        product_id: product.id,
        field,
    };

    let retailer_id = store.retailer_id(product);
    if retailer_id.trim().is_empty() {
        return Err(missing("retailer id"));
    }
    let mut entry = FeedEntry::bare(Operation::Update, retailer_id);

    let qty = product.inventory.qty;
    let in_stock = product.inventory.in_stock && qty > 0.0;
    entry.availability = Some(if in_stock { "in stock" } else { "out of stock" });
    entry.inventory = Some(if qty.is_finite() { qty.floor().max(0.0) as i64 } else { 0 });

    let price = match product.price {
        Some(p) if !p.is_finite() || p < 0.0 => {
            return Err(BuildError::InvalidPrice {
                product_id: product.id,
                price: p,
            })
        }
        other => other,
    };
    if let Some(price) = price {
        entry.price = Some(format_price(price, &store.currency));
        entry.sale_price = product
            .special_price
            .filter(|sp| sp.is_finite() && *sp >= 0.0 && *sp < price)
            .map(|sp| format_price(sp, &store.currency));
    }
    if inventory_only {
        return Ok(entry);
    }
    if entry.price.is_none() {
        return Err(missing("price"));
    }

    let title = product
        .name
        .as_deref()
        .map(|n| clean_text(n, TITLE_MAX_CHARS))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| missing("name"))?;
    let description = product
        .description
        .as_deref()
        .map(|d| clean_text(d, DESCRIPTION_MAX_CHARS))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| title.clone());
    let link = product
        .url
        .clone()
        .or_else(|| product.parent.as_ref().and_then(|p| p.url.clone()))
        .ok_or_else(|| missing("url"))?;

    entry.title = Some(title);
    entry.description = Some(description);
    entry.condition = Some("new");
    entry.link = Some(link);
    entry.image_link = product.media.first().cloned();
    entry.additional_image_link = product
        .media
        .iter()
        .skip(1)
        .take(ADDITIONAL_IMAGES_MAX)
        .cloned()
        .collect();
    entry.brand = product
        .brand
        .clone()
        .or_else(|| store.brand.clone())
        .or_else(|| Some(store.name.clone()));
    if product.kind == RecordKind::ConfigurableChild {
        entry.item_group_id = product
            .parent
            .as_ref()
            .map(|p| store.retailer_id_of(p.id, &p.sku));
    }
    entry.color = product.color.clone();
    entry.size = product.size.clone();
    entry.material = product.material.clone();
    entry.pattern = product.pattern.clone();
    entry.shipping_weight = product
        .weight
        .filter(|w| w.is_finite() && *w > 0.0)
        .map(|w| format!("{} kg", w));

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config, ProductIdentifier};
    use crate::model::{Inventory, ParentRef, ProductType};

    fn store() -> StoreContext {
        let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        StoreContext::resolve(&cfg.stores[0]).unwrap()
    }

    fn product() -> ProductRecord {
        ProductRecord {
            id: 7,
            sku: "SKU-7".into(),
            type_id: ProductType::Simple,
            kind: RecordKind::Simple,
            visibility: 4,
            name: Some("Trail Shoe".into()),
            description: Some("<p>Light &amp; <b>fast</b></p>\n\n<br/>".into()),
            url: Some("https://shop.test/trail-shoe".into()),
            price: Some(120.0),
            special_price: Some(99.5),
            weight: Some(0.8),
            material: None,
            pattern: None,
            color: Some("Red".into()),
            size: None,
            brand: None,
            inventory: Inventory { qty: 3.7, in_stock: true },
            media: vec!["a.jpg".into(), "b.jpg".into()],
            sync_enabled: None,
            parent: None,
        }
    }

    #[test]
    fn builds_full_entry() {
        let entry = build_update(&store(), &product(), false).unwrap();
        assert_eq!(entry.retailer_id, "SKU-7");
        assert_eq!(entry.description.as_deref(), Some("Light & fast"));
        assert_eq!(entry.price.as_deref(), Some("120.00 USD"));
        assert_eq!(entry.sale_price.as_deref(), Some("99.50 USD"));
        assert_eq!(entry.inventory, Some(3));
        assert_eq!(entry.availability, Some("in stock"));
        assert_eq!(entry.image_link.as_deref(), Some("a.jpg"));
        assert_eq!(entry.additional_image_link, vec!["b.jpg".to_string()]);
        assert_eq!(entry.brand.as_deref(), Some("Acme"));
        assert_eq!(entry.item_group_id, None);
    }

    #[test]
    fn inventory_only_entry_is_slim() {
        let mut p = product();
        p.name = None;
        p.inventory = Inventory { qty: 0.0, in_stock: true };
        let entry = build_update(&store(), &p, true).unwrap();
        assert_eq!(entry.availability, Some("out of stock"));
        assert_eq!(entry.title, None);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("title").is_none());
        assert!(json.get("operation").is_none());
    }

    #[test]
    fn missing_required_fields_fail() {
        let mut p = product();
        p.name = Some("   ".into());
        assert_eq!(
            build_update(&store(), &p, false).unwrap_err(),
            BuildError::MissingField { product_id: 7, field: "name" }
        );

        let mut p = product();
        p.url = None;
        assert!(matches!(
            build_update(&store(), &p, false),
            Err(BuildError::MissingField { field: "url", .. })
        ));

        let mut p = product();
        p.price = Some(-1.0);
        assert!(matches!(
            build_update(&store(), &p, false),
            Err(BuildError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn variant_uses_parent_group_and_link() {
        let mut s = store();
        s.identifier = ProductIdentifier::Id;
        let mut p = product();
        p.kind = RecordKind::ConfigurableChild;
        p.url = None;
        p.parent = Some(ParentRef {
            id: 70,
            sku: "PARENT".into(),
            name: Some("Parent".into()),
            url: Some("https://shop.test/parent".into()),
        });
        let entry = build_update(&s, &p, false).unwrap();
        assert_eq!(entry.retailer_id, "7");
        assert_eq!(entry.item_group_id.as_deref(), Some("70"));
        assert_eq!(entry.link.as_deref(), Some("https://shop.test/parent"));
    }

    #[test]
    fn requests_target_catalog_products() {
        let entry = build_update(&store(), &product(), false).unwrap();
        let req = entry.to_request("CAT");
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.relative_url, "CAT/products");

        let req = FeedEntry::delete("SKU-7").to_request("CAT");
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(
            req.body,
            Some(RequestBody::Json(json!({ "retailer_id": "SKU-7" })))
        );
    }
}
