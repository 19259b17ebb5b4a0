//! Cache configuration

use crate::error::{CacheError, Result};
use envmon_model::Granularity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lookback for real-time data: 2 hours
pub const DEFAULT_REALTIME_LOOKBACK_SECS: u64 = 2 * 3600;
/// Default lookback for 10-minute data: 6 hours
pub const DEFAULT_TEN_MINUTE_LOOKBACK_SECS: u64 = 6 * 3600;
/// Default lookback for hourly data: 3 days
pub const DEFAULT_HOURLY_LOOKBACK_SECS: u64 = 3 * 86400;
/// Default lookback for daily data: 30 days
pub const DEFAULT_DAILY_LOOKBACK_SECS: u64 = 30 * 86400;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 200;

/// Recent-value cache settings
///
/// Lookback windows bound the "latest reading" query issued on a cache miss:
/// high-frequency data only needs a short window, daily data a long one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub realtime_lookback_secs: u64,
    pub ten_minute_lookback_secs: u64,
    pub hourly_lookback_secs: u64,
    pub daily_lookback_secs: u64,
    /// Deadline applied to every backing-store query
    pub fetch_timeout_secs: u64,
    /// Maximum stations per "latest" query
    pub fetch_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            realtime_lookback_secs: DEFAULT_REALTIME_LOOKBACK_SECS,
            ten_minute_lookback_secs: DEFAULT_TEN_MINUTE_LOOKBACK_SECS,
            hourly_lookback_secs: DEFAULT_HOURLY_LOOKBACK_SECS,
            daily_lookback_secs: DEFAULT_DAILY_LOOKBACK_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    /// Lookback window for `granularity`; fails when the configured seconds
    /// do not fit a signed duration
    pub fn lookback(&self, granularity: Granularity) -> Result<chrono::Duration> {
        let secs = match granularity {
            Granularity::Realtime => self.realtime_lookback_secs,
            Granularity::TenMinute => self.ten_minute_lookback_secs,
            Granularity::Hourly => self.hourly_lookback_secs,
            Granularity::Daily => self.daily_lookback_secs,
        };
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                CacheError::Config(format!(
                    "{} lookback of {} s is out of range",
                    granularity, secs
                ))
            })
    }

    /// Check every lookback window
    pub fn validate(&self) -> Result<()> {
        for granularity in Granularity::ALL {
            self.lookback(granularity)?;
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Batch size, never zero
    pub fn batch_size(&self) -> usize {
        self.fetch_batch_size.max(1)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_lookback_grows_with_granularity() {
        let config = CacheConfig::default();
        let windows: Vec<_> = Granularity::ALL
            .iter()
            .map(|g| config.lookback(*g).unwrap())
            .collect();
        assert!(windows.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            config.lookback(Granularity::Realtime).unwrap(),
            chrono::Duration::hours(2)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_lookback_is_rejected() {
        let wrapped = CacheConfig {
            realtime_lookback_secs: u64::MAX,
            ..CacheConfig::default()
        };
        assert!(matches!(
            wrapped.lookback(Granularity::Realtime),
            Err(CacheError::Config(_))
        ));
        assert!(wrapped.validate().is_err());

        let huge = CacheConfig {
            daily_lookback_secs: 10_000_000_000_000_000,
            ..CacheConfig::default()
        };
        assert!(huge.lookback(Granularity::Daily).is_err());
        assert!(huge.lookback(Granularity::Hourly).is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"fetch_timeout_secs": 3, "fetch_batch_size": 0}"#).unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.daily_lookback_secs, DEFAULT_DAILY_LOOKBACK_SECS);
    }
}
