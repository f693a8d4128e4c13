//! Session driver for cfgcache.
//!
//! Ties the codec engine to configuration and I/O: builds the canonical
//! registry, runs store and load sessions over streams or files, and
//! classifies failures for the caller that decides whether to reuse,
//! rebuild or discard a cache entry.
//!
//! # Key Types
//!
//! - [`CacheEngine`]: store/load entry points, round-trip verification, header checks
//! - [`CacheConfig`]: compression, buffer sizing, problem limit, determinism mode
//! - [`CacheError`]: fatal failures, with [`CacheError::is_invalidating`]
//! - [`default_registry`]: the one ordered list of built-in codecs

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod runtime;

pub use config::{CacheConfig, ENV_PREFIX};
pub use engine::{CacheEngine, LoadOutcome, RoundtripReport, StoreOutcome};
pub use error::{CacheError, CacheResult};
pub use registry::default_registry;
pub use runtime::build_runtime;
