//! Readings - one observation of one factor at one station

use crate::effect::FlagEffect;
use crate::error::{ModelError, Result};
use crate::types::{FactorId, Granularity, StationId, TenantId, PLACEHOLDER_FACTOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate statistics of an interval reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u32,
}

/// Statistics carried by a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statistics {
    /// Real-time instant value
    Instant { value: f64 },
    /// 10-minute / hourly / daily aggregate
    Interval(IntervalStats),
    /// No statistic at all (negative-cache placeholder or malformed input)
    Empty,
}

/// One observation
///
/// Everything but `flag` and `effect` is immutable once created; those two
/// are rewritten by the flag engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub tenant: TenantId,
    pub granularity: Granularity,
    pub station: StationId,
    pub factor: FactorId,
    pub timestamp: DateTime<Utc>,
    pub stats: Statistics,
    /// Flag name, empty when never classified
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub effect: FlagEffect,
}

impl Reading {
    /// Real-time reading with an instant value
    pub fn instant(
        tenant: impl Into<TenantId>,
        station: StationId,
        factor: FactorId,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            granularity: Granularity::Realtime,
            station,
            factor,
            timestamp,
            stats: Statistics::Instant { value },
            flag: String::new(),
            effect: FlagEffect::EMPTY,
        }
    }

    /// Interval reading (10-minute, hourly or daily)
    pub fn interval(
        tenant: impl Into<TenantId>,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        timestamp: DateTime<Utc>,
        stats: IntervalStats,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            granularity,
            station,
            factor,
            timestamp,
            stats: Statistics::Interval(stats),
            flag: String::new(),
            effect: FlagEffect::EMPTY,
        }
    }

    /// Synthetic empty reading marking a station with no backing rows
    pub fn placeholder(
        tenant: impl Into<TenantId>,
        granularity: Granularity,
        station: StationId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            granularity,
            station,
            factor: PLACEHOLDER_FACTOR,
            timestamp,
            stats: Statistics::Empty,
            flag: String::new(),
            effect: FlagEffect::EMPTY,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.factor == PLACEHOLDER_FACTOR && matches!(self.stats, Statistics::Empty)
    }

    /// Builder-style flag assignment
    pub fn with_flag(mut self, flag: impl Into<String>, effect: FlagEffect) -> Self {
        self.flag = flag.into();
        self.effect = effect;
        self
    }

    /// Statistic the flag rules are evaluated against.
    ///
    /// Instant value for real-time readings, average for interval readings.
    /// Any other combination is an input-shape error.
    pub fn primary_value(&self) -> Result<f64> {
        match (self.granularity.is_interval(), &self.stats) {
            (false, Statistics::Instant { value }) => Ok(*value),
            (true, Statistics::Interval(stats)) => Ok(stats.avg),
            (is_interval, _) => Err(ModelError::MissingStatistic {
                station: self.station,
                factor: self.factor,
                timestamp: self.timestamp.to_rfc3339(),
                expected: if is_interval { "average" } else { "instant" },
            }),
        }
    }
}
