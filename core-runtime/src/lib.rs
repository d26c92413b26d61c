//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the catalog sync core:
//! - Run configuration (`SyncConfig`) with fail-fast validation
//! - Logging and tracing infrastructure
//! - Event bus carrying typed sync events
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its settings types, its
//! logging conventions and the event channel the orchestrator reports on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SyncConfig;
pub use error::{Error, Result};
