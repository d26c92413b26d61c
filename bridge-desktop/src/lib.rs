//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, with platform data directories
//!   resolved through `dirs`
//!
//! Catalog adapters (`SourceCatalog`, `DestinationCatalog`) are vendor
//! specific and are supplied by the host.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TokioFileSystem;
//! use bridge_traits::FileSystemAccess;
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let dir = fs.get_data_directory().await.unwrap();
//!     println!("checkpoints live under {}", dir.display());
//! }
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
