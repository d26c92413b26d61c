//! In-memory marketplace and PIM used by the pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{
    CatalogEntry, DestinationCatalog, FetchOutcome, ProductPayload, ReportHandle, ReportRequest,
    ReportStatus, SearchFilter, SearchPage, SourceCatalog, SourceListing,
};
use core_runtime::config::RateLimitSettings;
use core_runtime::SyncConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Source
// ============================================================================

pub struct FakeSource {
    listings: AsyncMutex<BTreeMap<String, SourceListing>>,
    report_ids: AsyncMutex<Vec<String>>,
    polls_before_done: usize,
    pub fetch_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(listings: Vec<SourceListing>, report_ids: Vec<&str>) -> Self {
        Self {
            listings: AsyncMutex::new(
                listings
                    .into_iter()
                    .map(|l| (l.external_id.clone(), l))
                    .collect(),
            ),
            report_ids: AsyncMutex::new(report_ids.into_iter().map(str::to_string).collect()),
            polls_before_done: 2,
            fetch_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        }
    }

    /// Forget every listing, so any later fetch comes back empty.
    pub async fn clear(&self) {
        self.listings.lock().await.clear();
        self.report_ids.lock().await.clear();
    }

    pub fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
            + self.status_calls.load(Ordering::SeqCst)
            + self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCatalog for FakeSource {
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<FetchOutcome> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let listings = self.listings.lock().await;

        let mut outcome = FetchOutcome::default();
        for id in ids {
            match listings.get(id) {
                Some(listing) => outcome.listings.push(listing.clone()),
                None => {
                    outcome
                        .errors
                        .insert(id.clone(), "listing not found".to_string());
                }
            }
        }
        Ok(outcome)
    }

    async fn submit_report(&self, request: ReportRequest) -> Result<ReportHandle> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReportHandle {
            id: format!("report-{}", request.report_type),
        })
    }

    async fn report_status(&self, _handle: &ReportHandle) -> Result<ReportStatus> {
        let polls = self.status_calls.fetch_add(1, Ordering::SeqCst);
        if polls < self.polls_before_done {
            Ok(ReportStatus::Running)
        } else {
            Ok(ReportStatus::Done)
        }
    }

    async fn download_report(&self, _handle: &ReportHandle) -> Result<Vec<String>> {
        Ok(self.report_ids.lock().await.clone())
    }
}

// ============================================================================
// Destination
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub owner: String,
    pub relationship: String,
    pub related: Vec<String>,
}

pub struct FakeDestination {
    entries: AsyncMutex<BTreeMap<String, CatalogEntry>>,
    links: AsyncMutex<Vec<Link>>,
    media: AsyncMutex<Vec<(String, String)>>,
    relationship_types: Vec<String>,
    /// Relationship calls still to refuse with a long retry hint.
    throttled_links: AtomicUsize,
    throttle_hint: Duration,
    /// Refuse relationship writes outright.
    reject_links: AtomicBool,
    /// Cancelled once this many products have been created.
    cancel_after_creates: AsyncMutex<Option<(usize, CancellationToken)>>,
    next_id: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub link_calls: AtomicUsize,
}

impl FakeDestination {
    pub fn new(catalog: Vec<CatalogEntry>) -> Self {
        Self {
            entries: AsyncMutex::new(catalog.into_iter().map(|e| (e.id.clone(), e)).collect()),
            links: AsyncMutex::new(Vec::new()),
            media: AsyncMutex::new(Vec::new()),
            relationship_types: vec!["variations".to_string(), "canonical_listings".to_string()],
            throttled_links: AtomicUsize::new(0),
            throttle_hint: Duration::from_secs(120),
            reject_links: AtomicBool::new(false),
            cancel_after_creates: AsyncMutex::new(None),
            next_id: AtomicUsize::new(1),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            link_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_relationship_types(mut self, types: &[&str]) -> Self {
        self.relationship_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Refuse the next `calls` relationship writes with a `retry_after`
    /// longer than any executor will wait in place.
    pub fn throttle_links(self, calls: usize) -> Self {
        self.throttled_links.store(calls, Ordering::SeqCst);
        self
    }

    /// Change the throttle budget of a destination already in use.
    pub fn set_throttled_links(&self, calls: usize) {
        self.throttled_links.store(calls, Ordering::SeqCst);
    }

    pub fn set_reject_links(&self, reject: bool) {
        self.reject_links.store(reject, Ordering::SeqCst);
    }

    /// Cancel `token` as soon as `creates` products exist.
    pub async fn cancel_after_creates(&self, creates: usize, token: CancellationToken) {
        *self.cancel_after_creates.lock().await = Some((creates, token));
    }

    pub async fn product_count(&self, key_prefix: &str) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.field("sku").map_or(false, |sku| sku.starts_with(key_prefix)))
            .count()
    }

    pub async fn remove_entry(&self, id: &str) {
        self.entries.lock().await.remove(id);
    }

    /// Destination id of the product created for `key`.
    pub async fn id_for_key(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .values()
            .find(|e| e.field("sku") == Some(key))
            .map(|e| e.id.clone())
    }

    pub async fn links(&self, relationship: &str) -> Vec<Link> {
        self.links
            .lock()
            .await
            .iter()
            .filter(|l| l.relationship == relationship)
            .cloned()
            .collect()
    }

    pub async fn media(&self) -> Vec<(String, String)> {
        self.media.lock().await.clone()
    }

    fn entry_from(id: &str, payload: &ProductPayload) -> CatalogEntry {
        let mut entry = CatalogEntry::new(id).with_field("sku", payload.key.clone());
        for (name, value) in &payload.attributes {
            entry = entry.with_field(name.clone(), value.clone());
        }
        entry
    }
}

#[async_trait]
impl DestinationCatalog for FakeDestination {
    async fn create_product(&self, payload: &ProductPayload) -> Result<String> {
        let created = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("pim-new-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries
            .lock()
            .await
            .insert(id.clone(), Self::entry_from(&id, payload));
        if let Some((limit, token)) = self.cancel_after_creates.lock().await.as_ref() {
            if created >= *limit {
                token.cancel();
            }
        }
        Ok(id)
    }

    async fn update_product(&self, id: &str, payload: &ProductPayload) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(id) {
            return Err(BridgeError::NotFound(id.to_string()));
        }
        entries.insert(id.to_string(), Self::entry_from(id, payload));
        Ok(())
    }

    async fn search(
        &self,
        filter: &SearchFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SearchPage> {
        let entries = self.entries.lock().await;
        let matching: Vec<CatalogEntry> = entries
            .values()
            .filter(|entry| match filter {
                SearchFilter::All => true,
                SearchFilter::KeyIn(keys) => entry
                    .field("sku")
                    .map_or(false, |sku| keys.iter().any(|k| k == sku)),
                SearchFilter::KeyPrefix(prefix) => entry
                    .field("sku")
                    .map_or(false, |sku| sku.starts_with(prefix.as_str())),
            })
            .cloned()
            .collect();

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (offset + page_size).min(matching.len());
        Ok(SearchPage {
            entries: matching[offset.min(end)..end].to_vec(),
            next_cursor: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn attach_related(
        &self,
        owner_id: &str,
        relationship: &str,
        related_ids: &[String],
    ) -> Result<()> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .throttled_links
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(BridgeError::RateLimited {
                retry_after: Some(self.throttle_hint),
                message: "relationship quota exhausted".to_string(),
            });
        }
        if self.reject_links.load(Ordering::SeqCst) {
            return Err(BridgeError::InvalidRequest(format!("{} cannot own {}", owner_id, relationship)));
        }

        let mut related = related_ids.to_vec();
        related.sort();
        self.links.lock().await.push(Link {
            owner: owner_id.to_string(),
            relationship: relationship.to_string(),
            related,
        });
        Ok(())
    }

    async fn attach_media(&self, product_id: &str, url: &str) -> Result<()> {
        self.media
            .lock()
            .await
            .push((product_id.to_string(), url.to_string()));
        Ok(())
    }

    async fn relationship_types(&self) -> Result<Vec<String>> {
        Ok(self.relationship_types.clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Listings of one variation family plus a stand-alone product.
///
/// `P0001` is not in the report and is only reachable through its
/// children.
pub fn listings() -> Vec<SourceListing> {
    vec![
        SourceListing::new("B0001")
            .with_attribute("title", "Trail Runner")
            .with_attribute("upc", "012345678905")
            .with_image("https://img.example/b0001.jpg"),
        SourceListing::new("B0002")
            .with_attribute("title", "Fresh Foam Runner 9 Wide")
            .with_attribute("model_number", "m1080")
            .with_parent("P0001"),
        SourceListing::new("B0003")
            .with_attribute("title", "Fresh Foam Runner 10 Narrow")
            .with_attribute("upc", "099999999999")
            .with_parent("P0001"),
        SourceListing::new("P0001").with_attribute("title", "Fresh Foam Runner"),
    ]
}

/// `count` stand-alone listings with no identifiers the matcher can use.
pub fn bulk_listings(count: usize) -> Vec<SourceListing> {
    (0..count)
        .map(|n| {
            SourceListing::new(format!("BULK{:05}", n))
                .with_attribute("title", format!("Bulk Item {}", n))
        })
        .collect()
}

pub fn report_ids() -> Vec<&'static str> {
    vec!["B0001", "B0002", "B0003"]
}

/// Canonical products already in the PIM, plus one earlier sync product
/// that must never be matched.
pub fn catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new("pim-1001")
            .with_field("sku", "NB-TRAIL-1001")
            .with_field("upc", "012345678905"),
        CatalogEntry::new("pim-1002").with_field("sku", "M1080-W-09"),
        CatalogEntry::new("pim-0900")
            .with_field("sku", "SRC-OLD-1")
            .with_field("upc", "099999999999"),
    ]
}

/// Defaults tightened so a test run takes milliseconds.
pub fn fast_config(checkpoint_dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.checkpoint_dir = Some(checkpoint_dir.to_path_buf());
    config.batch.chunk_size = 2;
    config.batch.checkpoint_interval = 2;
    config.batch.inter_chunk_delay_ms = 0;
    config.source_rate = RateLimitSettings::new(10_000.0, 1_000);
    config.destination_rate = RateLimitSettings::new(10_000.0, 1_000);
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 1;
    config.retry.max_backoff_ms = 10;
    config.retry.max_wait_ms = 50;
    config.report.poll_interval_ms = 1;
    config.report.timeout_ms = 5_000;
    config.load.deferred_cooldown_max_ms = 20;
    config
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub destination: Arc<FakeDestination>,
}

impl Harness {
    pub fn new(destination: FakeDestination) -> Self {
        Self {
            source: Arc::new(FakeSource::new(listings(), report_ids())),
            destination: Arc::new(destination),
        }
    }
}
