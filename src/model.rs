use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host visibility value for products that only exist as part of a parent.
pub const NOT_VISIBLE_INDIVIDUALLY: i64 = 1;

/// Host product type as stored in the catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Simple,
    Configurable,
    Grouped,
    Virtual,
    Bundle,
    Downloadable,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Simple => "simple",
            ProductType::Configurable => "configurable",
            ProductType::Grouped => "grouped",
            ProductType::Virtual => "virtual",
            ProductType::Bundle => "bundle",
            ProductType::Downloadable => "downloadable",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(ProductType::Simple),
            "configurable" => Some(ProductType::Configurable),
            "grouped" => Some(ProductType::Grouped),
            "virtual" => Some(ProductType::Virtual),
            "bundle" => Some(ProductType::Bundle),
            "downloadable" => Some(ProductType::Downloadable),
            _ => None,
        }
    }

    /// Types that are never feed items themselves but fan out into children.
    pub fn is_composite(&self) -> bool {
        matches!(self, ProductType::Configurable | ProductType::Grouped)
    }

    /// Link type that connects a composite product to its children.
    pub fn child_link(&self) -> Option<LinkType> {
        match self {
            ProductType::Configurable => Some(LinkType::Super),
            ProductType::Grouped => Some(LinkType::Grouped),
            _ => None,
        }
    }
}

/// Shape of a record once a retriever has resolved its linkage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Simple,
    ConfigurableChild,
    GroupedChild,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Super,
    Grouped,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Super => "super",
            LinkType::Grouped => "grouped",
        }
    }

    pub fn parent_type(&self) -> ProductType {
        match self {
            LinkType::Super => ProductType::Configurable,
            LinkType::Grouped => ProductType::Grouped,
        }
    }

    pub fn parse_link(s: &str) -> Option<Self> {
        match s {
            "super" => Some(LinkType::Super),
            "grouped" => Some(LinkType::Grouped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub qty: f64,
    pub in_stock: bool,
}

/// Parent attributes a child record points back to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentRef {
    pub id: i64,
    pub sku: String,
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A catalog item as extracted from the host store, ready for the feed builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub id: i64,
    pub sku: String,
    pub type_id: ProductType,
    pub kind: RecordKind,
    pub visibility: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub price: Option<f64>,
    pub special_price: Option<f64>,
    pub weight: Option<f64>,
    pub material: Option<String>,
    pub pattern: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub brand: Option<String>,
    pub inventory: Inventory,
    pub media: Vec<String>,
    /// `None` means the merchant never set the flag, which counts as enabled.
    pub sync_enabled: Option<bool>,
    pub parent: Option<ParentRef>,
}

impl ProductRecord {
    pub fn sync_disabled(&self) -> bool {
        self.sync_enabled == Some(false)
    }

    pub fn visible_alone(&self) -> bool {
        self.visibility != NOT_VISIBLE_INDIVIDUALLY
    }

    /// A parent whose children the catalog publishes: visible and not
    /// switched off.
    pub fn publishes_children(&self) -> bool {
        self.visible_alone() && !self.sync_disabled()
    }

    pub fn parent_ref(&self) -> ParentRef {
        ParentRef {
            id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductLink {
    pub parent_id: i64,
    pub child_id: i64,
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    /// Materialized id path from the tree root, e.g. `1/2/7`.
    pub path: String,
    pub name: String,
    pub level: i64,
    pub is_active: bool,
    pub sync_enabled: Option<bool>,
    /// Remote product set id recorded for the store the category was loaded for.
    pub set_id: Option<String>,
}

impl Category {
    pub fn sync_disabled(&self) -> bool {
        self.sync_enabled == Some(false)
    }

    pub fn path_ids(&self) -> Vec<i64> {
        self.path
            .split('/')
            .filter_map(|p| p.parse::<i64>().ok())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMethod {
    Update,
    Delete,
}

impl ChangeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeMethod::Update => "update",
            ChangeMethod::Delete => "delete",
        }
    }

    pub fn parse_method(s: &str) -> Option<Self> {
        match s {
            "update" => Some(ChangeMethod::Update),
            "delete" => Some(ChangeMethod::Delete),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            ChangeMethod::Update => ChangeMethod::Delete,
            ChangeMethod::Delete => ChangeMethod::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeState {
    Pending,
    Reserved,
}

impl ChangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeState::Pending => "pending",
            ChangeState::Reserved => "reserved",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChangeState::Pending),
            "reserved" => Some(ChangeState::Reserved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingChange {
    pub id: i64,
    pub product_id: i64,
    pub sku: String,
    pub method: ChangeMethod,
    pub batch_id: Option<String>,
    pub state: ChangeState,
    pub created_at: DateTime<Utc>,
}
