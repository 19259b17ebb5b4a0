//! Error types for envmon-model

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid granularity: '{0}'. Valid values: realtime, 10min, hourly, daily")]
    InvalidGranularity(String),

    #[error("Invalid flag effect: '{0}'")]
    InvalidEffect(String),

    /// The reading carries no statistic usable for its granularity
    #[error("Reading {station}:{factor}@{timestamp} has no {expected} statistic")]
    MissingStatistic {
        station: u32,
        factor: u32,
        timestamp: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
