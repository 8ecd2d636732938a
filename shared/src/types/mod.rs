//! Core data model: labels, profile types, trees, flamebearers.

pub mod flamegraph;
pub mod labels;
pub mod profile;
pub mod tree;
