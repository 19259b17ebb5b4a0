//! Error types for envmon-cache

use envmon_model::{Granularity, StationId};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store rejected a fetch; cache state is untouched
    #[error("Backing store fetch failed for {tenant}/{granularity} stations {stations:?}: {cause:#}")]
    Backend {
        tenant: String,
        granularity: Granularity,
        stations: Vec<StationId>,
        cause: anyhow::Error,
    },

    /// The fetch exceeded its deadline; no negative entries are created
    #[error("Backing store fetch timed out after {elapsed:?} for {tenant}/{granularity}")]
    Timeout {
        tenant: String,
        granularity: Granularity,
        elapsed: Duration,
    },

    #[error("Invalid cache configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CacheError {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Timeout { .. } | CacheError::Backend { .. })
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_carries_context() {
        let err = CacheError::Backend {
            tenant: "site-a".to_string(),
            granularity: Granularity::Hourly,
            stations: vec![1, 2],
            cause: anyhow::anyhow!("connection reset"),
        };
        let msg = err.to_string();
        assert!(msg.contains("site-a/hourly"));
        assert!(msg.contains("[1, 2]"));
        assert!(msg.contains("connection reset"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_timeout_error() {
        let err = CacheError::Timeout {
            tenant: "site-a".to_string(),
            granularity: Granularity::Realtime,
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(
            err.to_string(),
            "Backing store fetch timed out after 3s for site-a/realtime"
        );
    }

    #[test]
    fn test_from_anyhow_error() {
        let err: CacheError = anyhow::anyhow!("test error").into();
        assert!(matches!(err, CacheError::Other(_)));
        assert!(!err.is_transient());
    }
}
