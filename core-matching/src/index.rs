//! Lookup tables over the destination catalog snapshot.

use crate::normalize::Normalizer;
use bridge_traits::CatalogEntry;
use core_runtime::config::MatchingConfig;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Counters from building a [`CatalogIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub indexed: usize,
    pub skipped_excluded: usize,
    pub collisions: usize,
}

/// Which table a lookup goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexKind {
    Primary,
    Secondary,
    Model,
    Sku,
    ExactSku,
}

impl IndexKind {
    fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Primary => "primary",
            IndexKind::Secondary => "secondary",
            IndexKind::Model => "model",
            IndexKind::Sku => "sku",
            IndexKind::ExactSku => "exact_sku",
        }
    }
}

/// Normalized identifier to destination id, one table per identifier kind.
///
/// Entries whose SKU carries an excluded prefix are products this system
/// created itself and never become match targets. When two entries share a
/// key the first one wins.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    primary: HashMap<String, String>,
    secondary: HashMap<String, String>,
    model: HashMap<String, String>,
    sku: HashMap<String, String>,
    exact_sku: HashMap<String, String>,
    stats: IndexStats,
}

impl CatalogIndex {
    pub fn build(entries: &[CatalogEntry], config: &MatchingConfig, normalizer: &Normalizer) -> Self {
        let fields = &config.catalog_fields;
        let mut index = Self::default();

        for entry in entries {
            let id = entry.id.trim();
            if id.is_empty() {
                continue;
            }

            let sku = entry.field(&fields.sku);
            if let Some(sku) = sku {
                let upper = sku.to_uppercase();
                if config
                    .excluded_prefixes
                    .iter()
                    .any(|prefix| upper.starts_with(&prefix.to_uppercase()))
                {
                    index.stats.skipped_excluded += 1;
                    continue;
                }
            }

            let normalized = |name: &str| entry.field(name).and_then(|v| normalizer.normalize(v));

            if let Some(key) = normalized(&fields.primary_id) {
                index.insert(IndexKind::Primary, key, id);
            }
            if let Some(key) = normalized(&fields.secondary_id) {
                index.insert(IndexKind::Secondary, key, id);
            }
            if let Some(key) = normalized(&fields.model_number) {
                index.insert(IndexKind::Model, key, id);
            }
            if let Some(sku) = sku {
                if let Some(key) = normalizer.normalize(sku) {
                    index.insert(IndexKind::Sku, key, id);
                }
                index.insert(IndexKind::ExactSku, sku.to_uppercase(), id);
            }
            index.stats.indexed += 1;
        }

        debug!(
            indexed = index.stats.indexed,
            skipped_excluded = index.stats.skipped_excluded,
            collisions = index.stats.collisions,
            "Built catalog index"
        );
        index
    }

    fn insert(&mut self, kind: IndexKind, key: String, id: &str) {
        let collided = match self.table_mut(kind).entry(key) {
            Entry::Occupied(occupied) if occupied.get() != id => {
                debug!(
                    index = kind.as_str(),
                    key = %occupied.key(),
                    kept = %occupied.get(),
                    ignored = %id,
                    "Index key collision"
                );
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(id.to_string());
                false
            }
        };
        if collided {
            self.stats.collisions += 1;
        }
    }

    fn table_mut(&mut self, kind: IndexKind) -> &mut HashMap<String, String> {
        match kind {
            IndexKind::Primary => &mut self.primary,
            IndexKind::Secondary => &mut self.secondary,
            IndexKind::Model => &mut self.model,
            IndexKind::Sku => &mut self.sku,
            IndexKind::ExactSku => &mut self.exact_sku,
        }
    }

    pub(crate) fn get(&self, kind: IndexKind, key: &str) -> Option<&str> {
        let table = match kind {
            IndexKind::Primary => &self.primary,
            IndexKind::Secondary => &self.secondary,
            IndexKind::Model => &self.model,
            IndexKind::Sku => &self.sku,
            IndexKind::ExactSku => &self.exact_sku,
        };
        table.get(key).map(String::as_str)
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.stats.indexed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, upc: &str, sku: &str) -> CatalogEntry {
        CatalogEntry::new(id).with_field("upc", upc).with_field("sku", sku)
    }

    fn build(entries: &[CatalogEntry]) -> CatalogIndex {
        let config = MatchingConfig::default();
        CatalogIndex::build(entries, &config, &Normalizer::from_config(&config))
    }

    #[test]
    fn test_normalized_and_exact_tables() {
        let index = build(&[entry("pim-1", "012345678905", "m1080-w-09")]);

        assert_eq!(index.get(IndexKind::Primary, "12345678905"), Some("pim-1"));
        assert_eq!(index.get(IndexKind::Sku, "M1080W09"), Some("pim-1"));
        assert_eq!(index.get(IndexKind::ExactSku, "M1080-W-09"), Some("pim-1"));
        assert_eq!(index.stats().indexed, 1);
    }

    #[test]
    fn test_excluded_prefix_skipped() {
        let index = build(&[
            entry("pim-1", "111111111111", "SRC-B001"),
            entry("pim-2", "222222222222", "src-B002"),
            entry("pim-3", "333333333333", "CAN-1"),
        ]);

        assert_eq!(index.get(IndexKind::Primary, "111111111111"), None);
        assert_eq!(index.get(IndexKind::Primary, "222222222222"), None);
        assert_eq!(index.get(IndexKind::Primary, "333333333333"), Some("pim-3"));
        assert_eq!(index.stats().skipped_excluded, 2);
    }

    #[test]
    fn test_first_entry_wins_on_collision() {
        let index = build(&[
            entry("pim-1", "123456789012", "A-1"),
            entry("pim-2", "0123456789012", "A-2"),
        ]);

        assert_eq!(index.get(IndexKind::Primary, "123456789012"), Some("pim-1"));
        assert_eq!(index.stats().collisions, 1);
    }

    #[test]
    fn test_blank_id_ignored() {
        let index = build(&[entry(" ", "123456789012", "A-1")]);
        assert!(index.is_empty());
    }
}
