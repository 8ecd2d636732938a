//! Querier configuration

use std::time::Duration;

/// Runtime configuration for the querier service.
#[derive(Debug, Clone)]
pub struct QuerierConfig {
    /// Listen address for the query HTTP server
    pub listen_addr: String,

    /// Ingester instance addresses forming the replica ring
    pub ingesters: Vec<String>,

    /// Number of ingester failures tolerated per fan-out.
    /// The quorum is `ingesters.len() - max_errors`.
    pub max_errors: usize,

    /// Time to keep awaiting outstanding ingester calls once the quorum
    /// has been reached, before cancelling them.
    pub extra_query_delay: Duration,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            listen_addr: std::env::var("CINDER_QUERIER_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:4100".to_string()),
            ingesters: Vec::new(),
            max_errors: 0,
            extra_query_delay: Duration::ZERO,
        }
    }
}

impl QuerierConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ingesters.is_empty() && self.max_errors >= self.ingesters.len() {
            anyhow::bail!(
                "max_errors ({}) must be smaller than the number of ingesters ({})",
                self.max_errors,
                self.ingesters.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_error_budget_at_ring_size() {
        let config = QuerierConfig {
            ingesters: vec!["a:4101".to_string(), "b:4101".to_string()],
            max_errors: 2,
            ..QuerierConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_accepts_tolerated_minority() {
        let config = QuerierConfig {
            ingesters: vec!["a:4101".to_string(), "b:4101".to_string(), "c:4101".to_string()],
            max_errors: 1,
            ..QuerierConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
