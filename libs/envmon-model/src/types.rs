//! Core identifiers and the sampling granularity.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant (site) identifier. All cache keys are tenant-scoped.
pub type TenantId = String;

/// Monitored station identifier.
pub type StationId = u32;

/// Measured factor: a monitor ID or a per-station monitor-code ID,
/// depending on how the tenant is configured.
pub type FactorId = u32;

/// Factor used by the synthetic negative-cache reading.
pub const PLACEHOLDER_FACTOR: FactorId = 0;

// ============================================================================
// Granularity
// ============================================================================

/// Sampling interval class of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    /// Instantaneous values pushed as they arrive
    #[serde(rename = "realtime", alias = "rt")]
    Realtime,

    /// 10-minute aggregates
    #[serde(rename = "10min", alias = "minute10")]
    TenMinute,

    /// Hourly aggregates
    #[serde(rename = "hourly", alias = "hour")]
    Hourly,

    /// Daily aggregates
    #[serde(rename = "daily", alias = "day")]
    Daily,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Granularity; 4] = [
        Granularity::Realtime,
        Granularity::TenMinute,
        Granularity::Hourly,
        Granularity::Daily,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Realtime => "realtime",
            Granularity::TenMinute => "10min",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }

    /// Interval granularities carry avg/min/max/count instead of an instant value
    pub fn is_interval(&self) -> bool {
        !matches!(self, Granularity::Realtime)
    }

    /// Whether readings of this granularity take part in the stuck-value check.
    ///
    /// Real-time and 10-minute data are exempt.
    pub fn checks_invariance(&self) -> bool {
        matches!(self, Granularity::Hourly | Granularity::Daily)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" | "rt" => Ok(Granularity::Realtime),
            "10min" | "minute10" => Ok(Granularity::TenMinute),
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            _ => Err(ModelError::InvalidGranularity(s.to_string())),
        }
    }
}
