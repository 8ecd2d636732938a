//! Shared model for the cinder profiling query pipeline.
//!
//! This crate contains the label model, profile-type coordinates, the stack
//! tree and flamebearer encoder, and the wire contract consumed from
//! ingesters. It is synchronous and I/O-free; the querier crate drives it.

pub mod error;
pub mod intern;
pub mod protocol;
pub mod selector;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{flamegraph::*, labels::*, profile::*, tree::*};
