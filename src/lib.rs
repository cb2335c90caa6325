//! Pixcache - a two-tier image cache.
//!
//! Decoded images are kept in a size-bounded in-memory LRU, backed by
//! losslessly re-encoded files on disk, with remote URLs or bundled resources
//! as the source of truth.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "pixcache";
