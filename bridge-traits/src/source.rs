//! Source Marketplace Abstraction
//!
//! The marketplace side of a sync: listings fetched by identifier, and the
//! asynchronous reporting job that enumerates every active listing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// One listing as returned by the marketplace API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceListing {
    pub external_id: String,
    /// Identifier of the variation parent, if this listing is a child.
    pub parent_id: Option<String>,
    /// Flat descriptive attributes (title, brand, identifiers, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Child identifiers reported by the API when this listing is a parent.
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Untouched API payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SourceListing {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            parent_id: None,
            attributes: BTreeMap::new(),
            child_ids: Vec::new(),
            image_urls: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_urls.push(url.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of a batched fetch.
///
/// Batched marketplace endpoints answer partially: identifiers the API could
/// not resolve come back in `errors` keyed by identifier, while the call
/// itself succeeds.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub listings: Vec<SourceListing>,
    pub errors: BTreeMap<String, String>,
}

/// Parameters of a reporting job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub report_type: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ReportRequest {
    pub fn new(report_type: impl Into<String>) -> Self {
        Self {
            report_type: report_type.into(),
            options: BTreeMap::new(),
        }
    }
}

/// Opaque handle to a submitted reporting job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Queued,
    Running,
    Done,
    Failed(String),
    Cancelled,
}

impl ReportStatus {
    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Cancelled)
    }
}

/// Marketplace catalog trait
///
/// Implementations wrap the vendor API and must surface throttling as
/// [`BridgeError::RateLimited`](crate::error::BridgeError::RateLimited) with
/// the parsed wait.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::{SourceCatalog, ReportRequest};
///
/// async fn all_ids(source: &dyn SourceCatalog) -> Result<Vec<String>> {
///     let handle = source.submit_report(ReportRequest::new("active_listings")).await?;
///     // poll report_status(&handle) until terminal ...
///     source.download_report(&handle).await
/// }
/// ```
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Fetch listings by identifier. The batch size is chosen by the caller.
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<FetchOutcome>;

    /// Submit an asynchronous reporting job.
    async fn submit_report(&self, request: ReportRequest) -> Result<ReportHandle>;

    /// Poll the state of a reporting job.
    async fn report_status(&self, handle: &ReportHandle) -> Result<ReportStatus>;

    /// Download the identifiers listed by a finished reporting job.
    async fn download_report(&self, handle: &ReportHandle) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_builder() {
        let listing = SourceListing::new("B0001")
            .with_attribute("title", "Trail Runner")
            .with_parent("B0000")
            .with_image("https://img.example/1.jpg");

        assert_eq!(listing.external_id, "B0001");
        assert_eq!(listing.parent_id.as_deref(), Some("B0000"));
        assert_eq!(listing.attributes.get("title").map(String::as_str), Some("Trail Runner"));
        assert_eq!(listing.image_urls.len(), 1);
    }

    #[test]
    fn test_report_status_terminal() {
        assert!(!ReportStatus::Queued.is_terminal());
        assert!(!ReportStatus::Running.is_terminal());
        assert!(ReportStatus::Done.is_terminal());
        assert!(ReportStatus::Failed("quota".to_string()).is_terminal());
        assert!(ReportStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_listing_deserializes_with_missing_collections() {
        let listing: SourceListing =
            serde_json::from_str(r#"{"external_id":"B1","parent_id":null}"#).unwrap();
        assert!(listing.attributes.is_empty());
        assert!(listing.child_ids.is_empty());
        assert!(listing.payload.is_null());
    }
}
