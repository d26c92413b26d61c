//! # Sync Configuration
//!
//! Settings for one catalog sync deployment.
//!
//! ## Overview
//!
//! A [`SyncConfig`] is assembled either through [`SyncConfig::builder`] or
//! from a JSON document ([`SyncConfig::from_json`]). Both paths end in
//! [`SyncConfig::validate`], so an invalid value fails at startup instead of
//! halfway through a run.
//!
//! Every section has defaults; a JSON document only needs the keys it
//! overrides.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{RateLimitSettings, SyncConfig};
//!
//! let config = SyncConfig::builder()
//!     .checkpoint_dir("/var/lib/catalog-sync/checkpoints")
//!     .source_rate(RateLimitSettings::new(0.5, 1))
//!     .workers(2)
//!     .build()
//!     .expect("invalid sync configuration");
//! ```
//!
//! ```ignore
//! let config = SyncConfig::from_json(r#"{
//!     "batch": { "chunk_size": 20 },
//!     "matching": { "width_guesses": ["W", "M"] }
//! }"#)?;
//! ```

use crate::error::{Error, Result};
use crate::logging::LogSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Top-level configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub batch: BatchSettings,
    /// Token bucket for the marketplace API.
    pub source_rate: RateLimitSettings,
    /// Token bucket for the PIM API.
    pub destination_rate: RateLimitSettings,
    pub retry: RetrySettings,
    pub matching: MatchingConfig,
    pub load: LoadSettings,
    pub report: ReportSettings,
    pub logging: LogSettings,
    /// Where checkpoints and artifacts live. Defaults to
    /// `<data dir>/checkpoints` of the injected filesystem.
    pub checkpoint_dir: Option<PathBuf>,
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(document: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json(&document)
    }

    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        self.source_rate.validate("source_rate")?;
        self.destination_rate.validate("destination_rate")?;
        self.retry.validate()?;
        self.matching.validate()?;
        self.load.validate()?;
        self.report.validate()?;
        self.logging.validate()?;

        if let Some(dir) = &self.checkpoint_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config(
                    "Checkpoint directory cannot be empty".to_string(),
                ));
            }
        }

        // Listings created by the sync must never be taken for canonical ones.
        if !self
            .matching
            .excluded_prefixes
            .iter()
            .any(|prefix| self.load.source_key_prefix.starts_with(prefix.as_str()))
        {
            return Err(Error::Config(format!(
                "Source key prefix '{}' must be covered by matching.excluded_prefixes",
                self.load.source_key_prefix
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Identifiers per source fetch call.
    pub chunk_size: usize,
    /// Pause between consecutive chunks.
    pub inter_chunk_delay_ms: u64,
    /// Concurrent workers within one load phase.
    pub workers: usize,
    /// Items between mid-phase checkpoint saves.
    pub checkpoint_interval: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            inter_chunk_delay_ms: 500,
            workers: 3,
            checkpoint_interval: 25,
        }
    }
}

impl BatchSettings {
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("batch.chunk_size must be at least 1".to_string()));
        }
        if self.workers == 0 || self.workers > 16 {
            return Err(Error::Config(
                "batch.workers must be between 1 and 16".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Config(
                "batch.checkpoint_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained permits per second.
    pub rate_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimitSettings {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            rate_per_second,
            burst,
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if !self.rate_per_second.is_finite() || self.rate_per_second <= 0.0 {
            return Err(Error::Config(format!(
                "{}.rate_per_second must be a positive number",
                section
            )));
        }
        if self.burst == 0 {
            return Err(Error::Config(format!("{}.burst must be at least 1", section)));
        }
        Ok(())
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate_per_second: 2.0,
            burst: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per operation, first call included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    /// Cap on a single exponential backoff step.
    pub max_backoff_ms: u64,
    /// Longest server-requested wait honored in place; longer hints defer.
    pub max_wait_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 60_000,
            max_wait_ms: 60_000,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        if self.max_backoff_ms < self.initial_delay_ms {
            return Err(Error::Config(
                "retry.max_backoff_ms cannot be lower than retry.initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strategies of the canonical matcher, in their default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Primary global identifier (UPC).
    PrimaryId,
    /// Secondary identifier (EAN), with a cross-check against the primary index.
    SecondaryId,
    /// Manufacturer model number against destination model numbers.
    ModelNumber,
    /// Manufacturer model number against destination SKUs.
    ModelToSku,
    /// Model number plus size/width parsed from the title.
    SizePattern,
    /// Brand and model concatenated.
    BrandModel,
}

impl MatchStrategy {
    pub const ALL: [MatchStrategy; 6] = [
        MatchStrategy::PrimaryId,
        MatchStrategy::SecondaryId,
        MatchStrategy::ModelNumber,
        MatchStrategy::ModelToSku,
        MatchStrategy::SizePattern,
        MatchStrategy::BrandModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::PrimaryId => "primary_id",
            MatchStrategy::SecondaryId => "secondary_id",
            MatchStrategy::ModelNumber => "model_number",
            MatchStrategy::ModelToSku => "model_to_sku",
            MatchStrategy::SizePattern => "size_pattern",
            MatchStrategy::BrandModel => "brand_model",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MatchStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| Error::Config(format!("Unknown match strategy: {}", s)))
    }
}

/// Attribute names carrying each identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchFieldNames {
    pub primary_id: String,
    pub secondary_id: String,
    pub model_number: String,
    pub sku: String,
    pub brand: String,
    pub title: String,
}

impl Default for MatchFieldNames {
    fn default() -> Self {
        Self {
            primary_id: "upc".to_string(),
            secondary_id: "ean".to_string(),
            model_number: "model_number".to_string(),
            sku: "sku".to_string(),
            brand: "brand".to_string(),
            title: "title".to_string(),
        }
    }
}

impl MatchFieldNames {
    fn validate(&self, section: &str) -> Result<()> {
        let names = [
            ("primary_id", &self.primary_id),
            ("secondary_id", &self.secondary_id),
            ("model_number", &self.model_number),
            ("sku", &self.sku),
            ("brand", &self.brand),
            ("title", &self.title),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(Error::Config(format!(
                    "{}.{} cannot be empty",
                    section, key
                )));
            }
        }
        Ok(())
    }
}

/// A width word recognised in titles and the code used in SKUs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidthWord {
    pub word: String,
    pub code: String,
}

impl WidthWord {
    pub fn new(word: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Strategy priority; the first hit wins.
    pub strategy_order: Vec<MatchStrategy>,
    /// Destination SKUs starting with one of these are never canonical.
    pub excluded_prefixes: Vec<String>,
    /// Disable to compare identifiers after trim and uppercase only.
    pub normalize: bool,
    /// All-numeric codes shorter than this keep their leading zeros.
    pub min_numeric_length: usize,
    /// Attribute names on source records.
    pub source_fields: MatchFieldNames,
    /// Field names on destination catalog entries.
    pub catalog_fields: MatchFieldNames,
    pub width_words: Vec<WidthWord>,
    /// Width codes tried, in order, when the title carries no width.
    pub width_guesses: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            strategy_order: MatchStrategy::ALL.to_vec(),
            excluded_prefixes: vec!["SRC-".to_string()],
            normalize: true,
            min_numeric_length: 8,
            source_fields: MatchFieldNames::default(),
            catalog_fields: MatchFieldNames::default(),
            width_words: vec![
                WidthWord::new("extra wide", "X"),
                WidthWord::new("narrow", "N"),
                WidthWord::new("medium", "M"),
                WidthWord::new("regular", "M"),
                WidthWord::new("wide", "W"),
            ],
            width_guesses: vec!["M".to_string(), "W".to_string()],
        }
    }
}

impl MatchingConfig {
    fn validate(&self) -> Result<()> {
        if self.strategy_order.is_empty() {
            return Err(Error::Config(
                "matching.strategy_order must list at least one strategy".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for strategy in &self.strategy_order {
            if !seen.insert(strategy) {
                return Err(Error::Config(format!(
                    "matching.strategy_order lists '{}' twice",
                    strategy
                )));
            }
        }
        if self.excluded_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(
                "matching.excluded_prefixes cannot contain an empty prefix".to_string(),
            ));
        }
        if self.min_numeric_length == 0 {
            return Err(Error::Config(
                "matching.min_numeric_length must be at least 1".to_string(),
            ));
        }
        self.source_fields.validate("matching.source_fields")?;
        self.catalog_fields.validate("matching.catalog_fields")?;
        for width in &self.width_words {
            if width.word.trim().is_empty() || width.code.trim().is_empty() {
                return Err(Error::Config(
                    "matching.width_words entries need a word and a code".to_string(),
                ));
            }
        }
        if self.width_guesses.iter().any(|code| code.trim().is_empty()) {
            return Err(Error::Config(
                "matching.width_guesses cannot contain an empty code".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    /// Relationship linking a parent product to its variations.
    pub hierarchy_relationship: String,
    /// Relationship linking a canonical product to its source listings.
    pub canonical_relationship: String,
    /// Refuse to write anything when the relationships are not configured.
    pub fail_fast_on_missing_relationship: bool,
    /// Upper bound for the end-of-phase wait before retrying deferrals.
    pub deferred_cooldown_max_ms: u64,
    pub search_page_size: usize,
    /// Prefix of the destination key generated from a source identifier.
    pub source_key_prefix: String,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            hierarchy_relationship: "variations".to_string(),
            canonical_relationship: "canonical_listings".to_string(),
            fail_fast_on_missing_relationship: true,
            deferred_cooldown_max_ms: 300_000,
            search_page_size: 100,
            source_key_prefix: "SRC-".to_string(),
        }
    }
}

impl LoadSettings {
    pub fn deferred_cooldown_max(&self) -> Duration {
        Duration::from_millis(self.deferred_cooldown_max_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.hierarchy_relationship.trim().is_empty()
            || self.canonical_relationship.trim().is_empty()
        {
            return Err(Error::Config(
                "load relationship names cannot be empty".to_string(),
            ));
        }
        if self.search_page_size == 0 {
            return Err(Error::Config(
                "load.search_page_size must be at least 1".to_string(),
            ));
        }
        if self.source_key_prefix.is_empty() {
            return Err(Error::Config(
                "load.source_key_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub report_type: String,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            report_type: "active_listings".to_string(),
            poll_interval_ms: 15_000,
            timeout_ms: 1_800_000,
        }
    }
}

impl ReportSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.report_type.trim().is_empty() {
            return Err(Error::Config("report.report_type cannot be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "report.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms < self.poll_interval_ms {
            return Err(Error::Config(
                "report.timeout_ms cannot be shorter than one poll interval".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn checkpoint_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.checkpoint_dir = Some(path.into());
        self
    }

    pub fn batch(mut self, batch: BatchSettings) -> Self {
        self.config.batch = batch;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.batch.chunk_size = chunk_size;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.batch.workers = workers;
        self
    }

    pub fn source_rate(mut self, rate: RateLimitSettings) -> Self {
        self.config.source_rate = rate;
        self
    }

    pub fn destination_rate(mut self, rate: RateLimitSettings) -> Self {
        self.config.destination_rate = rate;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn matching(mut self, matching: MatchingConfig) -> Self {
        self.config.matching = matching;
        self
    }

    pub fn load(mut self, load: LoadSettings) -> Self {
        self.config.load = load;
        self
    }

    pub fn report(mut self, report: ReportSettings) -> Self {
        self.config.report = report;
        self
    }

    pub fn logging(mut self, logging: LogSettings) -> Self {
        self.config.logging = logging;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
