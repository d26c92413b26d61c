//! Records of a sync run.

use crate::error::{CatalogError, Result};
use bridge_traits::SourceListing;
use core_runtime::config::MatchStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source identifier to destination id, for every product written.
pub type IdMapping = BTreeMap<String, String>;

// ============================================================================
// Source
// ============================================================================

/// A marketplace listing as extracted.
///
/// Immutable after extraction except for one parent enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub external_id: String,
    pub parent_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub is_parent: bool,
    pub child_ids: Vec<String>,
    pub image_urls: Vec<String>,
    pub raw: serde_json::Value,
    #[serde(default)]
    enriched: bool,
}

impl SourceRecord {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            parent_id: None,
            attributes: BTreeMap::new(),
            is_parent: false,
            child_ids: Vec::new(),
            image_urls: Vec::new(),
            raw: serde_json::Value::Null,
            enriched: false,
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

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// Attribute value, treating blank strings as absent.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_enriched(&self) -> bool {
        self.enriched
    }

    /// Mark the record as a variation parent of `children`.
    ///
    /// Children already listed by the API are kept; new ones are appended
    /// in the given order without duplicates. Fails on a second call.
    pub fn enrich_as_parent(&mut self, children: impl IntoIterator<Item = String>) -> Result<()> {
        if self.enriched {
            return Err(CatalogError::AlreadyEnriched(self.external_id.clone()));
        }

        for child in children {
            if child != self.external_id && !self.child_ids.contains(&child) {
                self.child_ids.push(child);
            }
        }
        self.is_parent = !self.child_ids.is_empty();
        self.enriched = true;
        Ok(())
    }
}

impl From<SourceListing> for SourceRecord {
    fn from(listing: SourceListing) -> Self {
        Self {
            is_parent: !listing.child_ids.is_empty(),
            external_id: listing.external_id,
            parent_id: listing.parent_id.filter(|p| !p.trim().is_empty()),
            attributes: listing.attributes,
            child_ids: listing.child_ids,
            image_urls: listing.image_urls,
            raw: listing.payload,
            enriched: false,
        }
    }
}

// ============================================================================
// Destination
// ============================================================================

/// The PIM product a source record maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    /// Destination id; `None` until the product is created.
    pub id: Option<String>,
    /// Deterministic key generated from the source identifier.
    pub key: String,
    pub source_id: String,
    pub attributes: BTreeMap<String, String>,
    /// No product with this key existed when the record was transformed.
    pub is_new: bool,
    /// Canonical product this record is linked to, once matched.
    pub canonical_id: Option<String>,
}

impl DestinationRecord {
    pub fn payload(&self) -> bridge_traits::ProductPayload {
        bridge_traits::ProductPayload {
            key: self.key.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

// ============================================================================
// Match result
// ============================================================================

/// Canonical identity of one source record.
///
/// Either matched (canonical id present, confidence in `(0, 1]`, strategy
/// set) or orphan (no id, confidence 0, no strategy). Fields are private so
/// no other combination can be built; deserialization re-checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MatchResultRepr", into = "MatchResultRepr")]
pub struct MatchResult {
    source_id: String,
    canonical_id: Option<String>,
    strategy: Option<MatchStrategy>,
    confidence: f64,
}

impl MatchResult {
    pub fn matched(
        source_id: impl Into<String>,
        canonical_id: impl Into<String>,
        strategy: MatchStrategy,
        confidence: f64,
    ) -> Result<Self> {
        let source_id = source_id.into();
        let canonical_id = canonical_id.into();

        if canonical_id.trim().is_empty() {
            return Err(CatalogError::InvalidMatch {
                source_id,
                reason: "canonical id is empty".to_string(),
            });
        }
        if !(confidence > 0.0 && confidence <= 1.0) {
            return Err(CatalogError::InvalidMatch {
                source_id,
                reason: format!("confidence {} outside (0, 1]", confidence),
            });
        }

        Ok(Self {
            source_id,
            canonical_id: Some(canonical_id),
            strategy: Some(strategy),
            confidence,
        })
    }

    pub fn orphan(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            canonical_id: None,
            strategy: None,
            confidence: 0.0,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn canonical_id(&self) -> Option<&str> {
        self.canonical_id.as_deref()
    }

    pub fn strategy(&self) -> Option<MatchStrategy> {
        self.strategy
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_matched(&self) -> bool {
        self.canonical_id.is_some()
    }
}

#[derive(Serialize, Deserialize)]
struct MatchResultRepr {
    source_id: String,
    canonical_id: Option<String>,
    strategy: Option<MatchStrategy>,
    confidence: f64,
}

impl TryFrom<MatchResultRepr> for MatchResult {
    type Error = CatalogError;

    fn try_from(repr: MatchResultRepr) -> Result<Self> {
        match (repr.canonical_id, repr.strategy) {
            (Some(canonical_id), Some(strategy)) => {
                MatchResult::matched(repr.source_id, canonical_id, strategy, repr.confidence)
            }
            (None, None) if repr.confidence == 0.0 => Ok(MatchResult::orphan(repr.source_id)),
            _ => Err(CatalogError::InvalidMatch {
                source_id: repr.source_id,
                reason: "canonical id, strategy and confidence disagree".to_string(),
            }),
        }
    }
}

impl From<MatchResult> for MatchResultRepr {
    fn from(result: MatchResult) -> Self {
        Self {
            source_id: result.source_id,
            canonical_id: result.canonical_id,
            strategy: result.strategy,
            confidence: result.confidence,
        }
    }
}
