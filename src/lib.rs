//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-matching`). Host binaries can depend
//! on `catalog-sync-workspace` and enable the documented features without
//! wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreDependencies, CoreService, RunRequest, SyncConfig, SyncReport};

#[cfg(feature = "matching-only")]
pub use core_matching::CanonicalMatcher;
