//! Strategy-ordered canonical resolution.

use crate::error::Result;
use crate::index::{CatalogIndex, IndexKind, IndexStats};
use crate::normalize::Normalizer;
use crate::size_pattern::SizeParser;
use bridge_traits::CatalogEntry;
use core_catalog::{MatchResult, SourceRecord};
use core_runtime::config::{MatchStrategy, MatchingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const PRIMARY_CONFIDENCE: f64 = 1.0;
const SECONDARY_CONFIDENCE: f64 = 0.95;
const MODEL_CONFIDENCE: f64 = 0.8;
const MODEL_TO_SKU_CONFIDENCE: f64 = 0.85;
const BRAND_MODEL_CONFIDENCE: f64 = 0.7;

/// Counts from one [`CanonicalMatcher::match_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub total: usize,
    pub matched: usize,
    pub orphans: usize,
    /// Matches per strategy name.
    pub by_strategy: BTreeMap<String, usize>,
}

impl MatchSummary {
    fn record(&mut self, result: &MatchResult) {
        self.total += 1;
        match result.strategy() {
            Some(strategy) => {
                self.matched += 1;
                *self.by_strategy.entry(strategy.as_str().to_string()).or_default() += 1;
            }
            None => self.orphans += 1,
        }
    }
}

/// Resolves the canonical destination product for source records.
///
/// Built once per run over the destination catalog; matching itself is pure
/// and does not touch either API.
#[derive(Debug)]
pub struct CanonicalMatcher {
    config: MatchingConfig,
    normalizer: Normalizer,
    sizes: SizeParser,
    index: CatalogIndex,
}

impl CanonicalMatcher {
    pub fn build(config: MatchingConfig, catalog: &[CatalogEntry]) -> Result<Self> {
        let normalizer = Normalizer::from_config(&config);
        let sizes = SizeParser::new(&config.width_words)?;
        let index = CatalogIndex::build(catalog, &config, &normalizer);

        info!(
            catalog_entries = catalog.len(),
            indexed = index.stats().indexed,
            skipped_excluded = index.stats().skipped_excluded,
            "Canonical matcher ready"
        );

        Ok(Self {
            config,
            normalizer,
            sizes,
            index,
        })
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Resolve one record, stopping at the first strategy that hits.
    pub fn match_record(&self, record: &SourceRecord) -> MatchResult {
        for strategy in &self.config.strategy_order {
            let Some((canonical_id, confidence)) = self.try_strategy(*strategy, record) else {
                continue;
            };

            match MatchResult::matched(&record.external_id, canonical_id, *strategy, confidence) {
                Ok(result) => {
                    debug!(
                        source_id = %record.external_id,
                        canonical_id = %canonical_id,
                        strategy = strategy.as_str(),
                        confidence,
                        "Matched source record"
                    );
                    return result;
                }
                Err(e) => {
                    warn!(source_id = %record.external_id, error = %e, "Discarding invalid match");
                }
            }
        }

        debug!(source_id = %record.external_id, "No canonical record found");
        MatchResult::orphan(&record.external_id)
    }

    /// Resolve every record; results keep input order.
    pub fn match_all(&self, records: &[SourceRecord]) -> (Vec<MatchResult>, MatchSummary) {
        let mut summary = MatchSummary::default();
        let results = records
            .iter()
            .map(|record| {
                let result = self.match_record(record);
                summary.record(&result);
                result
            })
            .collect();

        info!(
            total = summary.total,
            matched = summary.matched,
            orphans = summary.orphans,
            "Matching finished"
        );
        (results, summary)
    }

    fn try_strategy(&self, strategy: MatchStrategy, record: &SourceRecord) -> Option<(&str, f64)> {
        let fields = &self.config.source_fields;
        match strategy {
            MatchStrategy::PrimaryId => {
                let key = self.normalized(record, &fields.primary_id)?;
                self.lookup(IndexKind::Primary, &key, PRIMARY_CONFIDENCE)
            }
            MatchStrategy::SecondaryId => {
                // Some vendors store the secondary code under the primary field.
                let key = self.normalized(record, &fields.secondary_id)?;
                self.lookup(IndexKind::Secondary, &key, SECONDARY_CONFIDENCE)
                    .or_else(|| self.lookup(IndexKind::Primary, &key, SECONDARY_CONFIDENCE))
            }
            MatchStrategy::ModelNumber => {
                let key = self.normalized(record, &fields.model_number)?;
                self.lookup(IndexKind::Model, &key, MODEL_CONFIDENCE)
            }
            MatchStrategy::ModelToSku => {
                let key = self.normalized(record, &fields.model_number)?;
                self.lookup(IndexKind::Sku, &key, MODEL_TO_SKU_CONFIDENCE)
            }
            MatchStrategy::SizePattern => {
                let model = record.attribute(&fields.model_number)?;
                let parsed = self.sizes.parse(record.attribute(&fields.title)?)?;
                self.sizes
                    .candidates(model, &parsed, &self.config.width_guesses)
                    .into_iter()
                    .find_map(|(sku, confidence)| self.lookup(IndexKind::ExactSku, &sku, confidence))
            }
            MatchStrategy::BrandModel => {
                let brand = record.attribute(&fields.brand)?;
                let model = record.attribute(&fields.model_number)?;
                let key = self.normalizer.normalize(&format!("{}{}", brand, model))?;
                self.lookup(IndexKind::Sku, &key, BRAND_MODEL_CONFIDENCE)
            }
        }
    }

    fn normalized(&self, record: &SourceRecord, field: &str) -> Option<String> {
        record
            .attribute(field)
            .and_then(|value| self.normalizer.normalize(value))
    }

    fn lookup(&self, kind: IndexKind, key: &str, confidence: f64) -> Option<(&str, f64)> {
        self.index.get(kind, key).map(|id| (id, confidence))
    }
}
