//! Paginated, type-specific product extraction.
//!
//! Callers page with increasing offsets until a retriever returns an empty
//! page. Composite retrievers paginate over parents that have at least one
//! eligible child, so a non-empty parent page never produces an empty page.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::SyncSettings;
use crate::model::{LinkType, ProductRecord, RecordKind};
use crate::source::{CatalogSource, LinkFilter, ProductFilter};

mod configurable;
mod grouped;
mod other;
mod simple;

pub use configurable::ConfigurableRetriever;
pub use grouped::GroupedRetriever;
pub use other::OtherRetriever;
pub use simple::SimpleRetriever;

#[async_trait]
pub trait ProductRetriever: Send + Sync {
    fn name(&self) -> &'static str;

    fn set_store_id(&mut self, store_id: i64);

    async fn retrieve(&self, offset: usize, limit: usize) -> Result<Vec<ProductRecord>>;

    /// Page size the caller should use.
    fn limit(&self) -> usize;
}

/// The full set of retrievers a catalog pass walks, in order.
pub fn retrievers_for(
    source: Arc<dyn CatalogSource>,
    settings: &SyncSettings,
    store_id: i64,
) -> Vec<Box<dyn ProductRetriever>> {
    let mut retrievers: Vec<Box<dyn ProductRetriever>> = vec![
        Box::new(SimpleRetriever::new(source.clone(), settings.page_size)),
        Box::new(ConfigurableRetriever::new(source.clone(), settings.parent_page_size)),
        Box::new(GroupedRetriever::new(source.clone(), settings.parent_page_size)),
        Box::new(OtherRetriever::new(
            source,
            settings.page_size,
            settings.include_other_types,
        )),
    ];
    for r in retrievers.iter_mut() {
        r.set_store_id(store_id);
    }
    retrievers
}

pub(crate) fn require_store(store_id: Option<i64>, retriever: &str) -> Result<i64> {
    store_id.ok_or_else(|| anyhow!("{} retriever used before a store id was set", retriever))
}

/// Copy the parent's shared attributes onto a variant that lacks its own, and
/// put the parent's gallery in front of the child's.
pub fn attach_configurable_parent(mut child: ProductRecord, parent: &ProductRecord) -> ProductRecord {
    if child.name.is_none() {
        child.name = parent.name.clone();
    }
    if child.description.is_none() {
        child.description = parent.description.clone();
    }
    if child.weight.is_none() {
        child.weight = parent.weight;
    }
    if child.material.is_none() {
        child.material = parent.material.clone();
    }
    if child.pattern.is_none() {
        child.pattern = parent.pattern.clone();
    }

    let mut media: Vec<String> = parent
        .media
        .iter()
        .filter(|url| !child.media.contains(url))
        .cloned()
        .collect();
    media.append(&mut child.media);
    child.media = media;

    child.kind = RecordKind::ConfigurableChild;
    child.parent = Some(parent.parent_ref());
    child
}

/// Associated products of a grouped product keep their own attributes.
pub fn attach_grouped_parent(mut child: ProductRecord, parent: &ProductRecord) -> ProductRecord {
    child.kind = RecordKind::GroupedChild;
    child.parent = Some(parent.parent_ref());
    child
}

/// Load the eligible children of `parents` and attach each to its owner, the
/// lowest-id eligible parent it is linked to. A child owned by a parent outside
/// `parents` is left for that parent's page, so every child is emitted once.
pub(crate) async fn expand_children(
    source: &dyn CatalogSource,
    store_id: i64,
    parents: &[ProductRecord],
    link_type: LinkType,
) -> Result<Vec<ProductRecord>> {
    if parents.is_empty() {
        return Ok(Vec::new());
    }
    let mut page_ids: Vec<i64> = parents.iter().map(|p| p.id).collect();
    page_ids.sort_unstable();
    let links = source
        .find_links(&LinkFilter {
            parent_ids: Some(page_ids.clone()),
            child_ids: None,
            link_type: Some(link_type),
        })
        .await?;
    let mut child_ids: Vec<i64> = links.iter().map(|l| l.child_id).collect();
    child_ids.sort_unstable();
    child_ids.dedup();
    if child_ids.is_empty() {
        return Ok(Vec::new());
    }

    let owners = owning_parents(source, store_id, &page_ids, &child_ids, link_type).await?;
    let filter = ProductFilter {
        store_id: Some(store_id),
        exclude_sync_disabled: true,
        ids: Some(child_ids.clone()),
        ..Default::default()
    };
    let mut children: HashMap<i64, ProductRecord> = source
        .find_products(&filter, 0, child_ids.len())
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let mut out = Vec::with_capacity(children.len());
    for parent in parents {
        for link in links.iter().filter(|l| l.parent_id == parent.id) {
            if owners.get(&link.child_id) != Some(&parent.id) {
                continue;
            }
            let Some(child) = children.remove(&link.child_id) else {
                continue;
            };
            out.push(match link_type {
                LinkType::Super => attach_configurable_parent(child, parent),
                LinkType::Grouped => attach_grouped_parent(child, parent),
            });
        }
    }
    Ok(out)
}

/// Owner per child: the lowest id among `page_ids` and the store's other
/// eligible parents of the same link type.
async fn owning_parents(
    source: &dyn CatalogSource,
    store_id: i64,
    page_ids: &[i64],
    child_ids: &[i64],
    link_type: LinkType,
) -> Result<HashMap<i64, i64>> {
    let links = source
        .find_links(&LinkFilter {
            parent_ids: None,
            child_ids: Some(child_ids.to_vec()),
            link_type: Some(link_type),
        })
        .await?;
    let mut candidates: HashSet<i64> = page_ids.iter().copied().collect();
    let mut outside: Vec<i64> = links
        .iter()
        .map(|l| l.parent_id)
        .filter(|id| !candidates.contains(id))
        .collect();
    outside.sort_unstable();
    outside.dedup();
    if !outside.is_empty() {
        let filter = ProductFilter {
            store_id: Some(store_id),
            type_ids: vec![link_type.parent_type()],
            visible_only: true,
            exclude_sync_disabled: true,
            ids: Some(outside.clone()),
            ..Default::default()
        };
        candidates.extend(
            source
                .find_products(&filter, 0, outside.len())
                .await?
                .into_iter()
                .map(|p| p.id),
        );
    }

    let mut owners: HashMap<i64, i64> = HashMap::new();
    for link in links.iter().filter(|l| candidates.contains(&l.parent_id)) {
        owners
            .entry(link.child_id)
            .and_modify(|owner| *owner = (*owner).min(link.parent_id))
            .or_insert(link.parent_id);
    }
    Ok(owners)
}
