//! # Canonical Matching
//!
//! Resolves which destination product is the canonical record for each
//! source listing.
//!
//! ## Overview
//!
//! The matcher is built once per run from the full destination catalog
//! ([`CatalogIndex`]) and then answers per record, trying strategies in the
//! configured priority order:
//!
//! | Strategy | Lookup | Confidence |
//! |----------|--------|------------|
//! | `primary_id` | primary identifier | 1.0 |
//! | `secondary_id` | secondary identifier, then the primary index | 0.95 |
//! | `model_number` | model number against model numbers | 0.8 |
//! | `model_to_sku` | model number against SKUs | 0.85 |
//! | `size_pattern` | `{model}-{width}-{size}` / `{model}-{size}` from the title | 0.9 / 0.88 |
//! | `brand_model` | brand + model against SKUs | 0.7 |
//!
//! A record no strategy resolves is an orphan.

pub mod error;
pub mod index;
pub mod matcher;
pub mod normalize;
pub mod size_pattern;

pub use error::{MatchingError, Result};
pub use index::{CatalogIndex, IndexStats};
pub use matcher::{CanonicalMatcher, MatchSummary};
pub use normalize::Normalizer;
pub use size_pattern::{SizeParser, SizeWidth};
