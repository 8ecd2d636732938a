//! Query error taxonomy

use thiserror::Error;

use cinder_shared::error::ModelError;

/// Errors surfaced by the fan-out coordinator.
///
/// Per-ingester failures below the quorum budget are logged and absorbed,
/// so they never appear here; only quorum loss does.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("quorum lost: {succeeded} of {required} required ingesters succeeded")]
    QuorumLost { succeeded: usize, required: usize },

    #[error("query cancelled")]
    Cancelled,

    #[error("internal: {0}")]
    Internal(String),
}

impl From<ModelError> for QueryError {
    fn from(err: ModelError) -> Self {
        QueryError::InvalidArgument(err.to_string())
    }
}
