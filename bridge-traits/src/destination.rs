//! Destination PIM Abstraction
//!
//! Product writes, cursor-paginated search and named relationships on the
//! product-information system the sync writes into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// A destination record as a flat field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field value, treating blank strings as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Body of a create or update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPayload {
    /// Deterministic product key (the destination SKU).
    pub key: String,
    pub attributes: BTreeMap<String, String>,
}

/// Search criteria understood by every destination adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchFilter {
    /// Every product.
    All,
    /// Products whose key is one of the given keys.
    KeyIn(Vec<String>),
    /// Products whose key starts with the prefix.
    KeyPrefix(String),
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub entries: Vec<CatalogEntry>,
    /// Cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Destination catalog trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::destination::{DestinationCatalog, SearchFilter};
///
/// async fn count(dest: &dyn DestinationCatalog) -> Result<usize> {
///     let mut cursor = None;
///     let mut total = 0;
///     loop {
///         let page = dest.search(&SearchFilter::All, cursor.as_deref(), 100).await?;
///         total += page.entries.len();
///         match page.next_cursor {
///             Some(next) => cursor = Some(next),
///             None => return Ok(total),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait DestinationCatalog: Send + Sync {
    /// Create a product and return its destination id.
    async fn create_product(&self, payload: &ProductPayload) -> Result<String>;

    /// Replace the attributes of an existing product.
    async fn update_product(&self, id: &str, payload: &ProductPayload) -> Result<()>;

    /// Cursor-paginated search.
    async fn search(
        &self,
        filter: &SearchFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SearchPage>;

    /// Attach `related_ids` to `owner_id` under a named relationship.
    async fn attach_related(
        &self,
        owner_id: &str,
        relationship: &str,
        related_ids: &[String],
    ) -> Result<()>;

    /// Attach one media asset to a product.
    async fn attach_media(&self, product_id: &str, url: &str) -> Result<()>;

    /// Names of the relationship types configured on the destination.
    async fn relationship_types(&self) -> Result<Vec<String>>;
}
