//! # Catalog Model
//!
//! Typed records flowing through a sync run and the pure transformations
//! applied to them.
//!
//! - [`SourceRecord`] - a marketplace listing, enriched once with its
//!   variation children
//! - [`DestinationRecord`] - the PIM product a source record becomes
//! - [`MatchResult`] - canonical identity of a source record; constructors
//!   enforce `matched == canonical id present`
//! - [`Transformer`] - source to destination mapping with deterministic keys
//! - [`classification`] - leaf category paths from nested classification trees
//! - [`parents`] - variation parent discovery and enrichment

pub mod classification;
pub mod error;
pub mod models;
pub mod parents;
pub mod transform;

pub use bridge_traits::CatalogEntry;
pub use error::{CatalogError, Result};
pub use models::{DestinationRecord, IdMapping, MatchResult, SourceRecord};
pub use transform::Transformer;
