//! # Host Bridge Traits
//!
//! Collaborator contracts that the sync core depends on but does not implement.
//!
//! ## Overview
//!
//! This crate defines the boundary between the sync core and the systems it
//! talks to. Each trait represents a capability the core requires; concrete
//! adapters (HTTP clients for a marketplace or a PIM, local filesystems) live
//! outside the core and are injected at startup.
//!
//! ## Traits
//!
//! ### Catalog systems
//! - [`SourceCatalog`](source::SourceCatalog) - Marketplace listings by id, plus the
//!   asynchronous reporting job used to enumerate every listing
//! - [`DestinationCatalog`](destination::DestinationCatalog) - PIM product writes,
//!   cursor-paginated search and named relationships
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Checkpoint and artifact files
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall-clock source for deterministic testing
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to a host pipeline
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters must
//! translate vendor throttling responses into
//! [`BridgeError::RateLimited`](error::BridgeError::RateLimited) with the
//! parsed wait, so the core never has to read human-readable error text. The
//! [`http`] module provides the status/header classification adapters use.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across the worker pool.

pub mod destination;
pub mod error;
pub mod http;
pub mod log;
pub mod source;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use destination::{
    CatalogEntry, DestinationCatalog, ProductPayload, SearchFilter, SearchPage,
};
pub use http::HttpResponse;
pub use log::{LogEntry, LogLevel, LoggerSink};
pub use source::{FetchOutcome, ReportHandle, ReportRequest, ReportStatus, SourceCatalog, SourceListing};
pub use storage::FileSystemAccess;
pub use time::{Clock, FixedClock, SystemClock};
