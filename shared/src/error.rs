//! Model-level error types

use thiserror::Error;

/// Errors produced while parsing or validating query model inputs.
///
/// All of these surface as invalid-argument responses at the HTTP edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid profile type {0:?}: expected name:sample_type:sample_unit:period_type:period_unit")]
    InvalidProfileType(String),

    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("query must contain a profile-type selection")]
    MissingProfileType,

    #[error("cannot parse {0:?} to a valid timestamp")]
    InvalidTimestamp(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}
