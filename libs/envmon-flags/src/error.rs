//! Flag Engine Error Types

use envmon_cache::CacheError;
use envmon_model::{FactorId, Granularity, StationId};
use thiserror::Error;

/// Result type for flag operations
pub type Result<T> = std::result::Result<T, FlagError>;

/// Flag engine errors
#[derive(Debug, Error)]
pub enum FlagError {
    /// Region expression failed to parse
    #[error("Invalid region expression '{expr}': {reason}")]
    InvalidRegion { expr: String, reason: String },

    /// Invariance rule does not have the single `=h` / `>=h` shape
    #[error("Invalid invariance rule for flag '{flag}': {reason}")]
    InvalidInvarianceRule { flag: String, reason: String },

    #[error("Flag catalog has no NORMAL flag")]
    CatalogMissingNormal,

    #[error("Flag catalog has more than one NORMAL flag: {0:?}")]
    CatalogMultipleNormal(Vec<String>),

    #[error("Flag catalog has no OVERPROOF flag")]
    CatalogMissingOverproof,

    #[error("Duplicate flag name: {0}")]
    DuplicateFlag(String),

    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    #[error("No flag catalog loaded for tenant '{0}'")]
    CatalogNotLoaded(String),

    /// Reading exposes no statistic usable by the rules
    #[error("Unusable reading {tenant}/{station}/{factor} at {timestamp}: {reason}")]
    InputShape {
        tenant: String,
        station: StationId,
        factor: FactorId,
        timestamp: String,
        reason: String,
    },

    /// Backing store failed while evaluating a reading
    #[error("Backing store error for {tenant}/{granularity}/{station}/{factor} at {timestamp}: {source}")]
    Backend {
        tenant: String,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        timestamp: String,
        source: CacheError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlagError {
    /// Errors that concern one reading only and must not abort a batch
    pub fn is_input_shape(&self) -> bool {
        matches!(self, FlagError::InputShape { .. })
    }
}

impl From<serde_yaml::Error> for FlagError {
    fn from(err: serde_yaml::Error) -> Self {
        FlagError::Config(err.to_string())
    }
}
