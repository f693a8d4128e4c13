//! Foundation types for cfgcache.
//!
//! This crate provides the graph-level types shared by the codec engine and
//! its callers. Every other cfgcache crate depends on `cfgcache-types`.
//!
//! # Key Types
//!
//! - [`Value`]: Nullable handle to one node of a cached object graph; identity is the allocation
//! - [`SharedCell`]: Set-once cell used to close reference cycles
//! - [`Problem`]: Non-fatal failure to store or load one value
//! - [`ProblemReporter`]: Ordered per-session problem sink
//! - [`PropertyTrace`]: Path from the root value to the value being processed

pub mod cell;
pub mod error;
pub mod problem;
pub mod value;

pub use cell::SharedCell;
pub use error::TypeError;
pub use problem::{Problem, ProblemPhase, ProblemReporter, PropertyTrace, TraceSegment};
pub use value::Value;
