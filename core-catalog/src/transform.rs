//! Source to destination mapping.

use crate::classification::{self, DEFAULT_MAX_DEPTH};
use crate::error::{CatalogError, Result};
use crate::models::{DestinationRecord, SourceRecord};
use std::collections::HashMap;

/// Attribute carrying the originating marketplace identifier.
pub const SOURCE_ID_ATTRIBUTE: &str = "source_id";
/// Attribute filled from the deepest classification path.
pub const CATEGORY_ATTRIBUTE: &str = "category";
/// Attribute holding the generated key of the variation parent.
pub const PARENT_KEY_ATTRIBUTE: &str = "parent_key";

#[derive(Debug, Clone)]
pub struct Transformer {
    key_prefix: String,
    max_classification_depth: usize,
}

impl Transformer {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            max_classification_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_classification_depth(mut self, depth: usize) -> Self {
        self.max_classification_depth = depth.max(1);
        self
    }

    /// Deterministic destination key for a source identifier.
    pub fn generated_key(&self, external_id: &str) -> String {
        format!("{}{}", self.key_prefix, external_id.trim())
    }

    /// Map one source record.
    ///
    /// `existing` maps destination keys already present to their ids; a hit
    /// makes the record an update of that product.
    pub fn transform(
        &self,
        record: &SourceRecord,
        existing: &HashMap<String, String>,
    ) -> Result<DestinationRecord> {
        if record.external_id.trim().is_empty() {
            return Err(CatalogError::MissingAttribute {
                external_id: record.external_id.clone(),
                attribute: "external_id".to_string(),
            });
        }

        let key = self.generated_key(&record.external_id);
        let mut attributes = record.attributes.clone();
        attributes.insert(SOURCE_ID_ATTRIBUTE.to_string(), record.external_id.clone());

        if !attributes.contains_key(CATEGORY_ATTRIBUTE) {
            if let Some(category) =
                classification::deepest_category(&record.raw, self.max_classification_depth)
            {
                attributes.insert(CATEGORY_ATTRIBUTE.to_string(), category);
            }
        }

        if let Some(parent) = &record.parent_id {
            attributes.insert(PARENT_KEY_ATTRIBUTE.to_string(), self.generated_key(parent));
        }

        let id = existing.get(&key).cloned();
        Ok(DestinationRecord {
            is_new: id.is_none(),
            id,
            key,
            source_id: record.external_id.clone(),
            attributes,
            canonical_id: None,
        })
    }

    /// Map every record, keeping input order.
    pub fn transform_all(
        &self,
        records: &[SourceRecord],
        existing: &HashMap<String, String>,
    ) -> Result<Vec<DestinationRecord>> {
        records
            .iter()
            .map(|record| self.transform(record, existing))
            .collect()
    }
}
