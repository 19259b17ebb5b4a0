//! In-memory backing store
//!
//! Holds readings in a plain vector. Counts every query so tests can assert
//! how often the cache went to the store, and supports injected failures and
//! latency for error-path tests.

use crate::store::BackingStore;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envmon_model::{FactorId, Granularity, Reading, StationId};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Reading>>,
    latest_calls: AtomicUsize,
    window_calls: AtomicUsize,
    failure: RwLock<Option<String>>,
    failing_stations: RwLock<FxHashSet<StationId>>,
    delay: RwLock<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reading: Reading) {
        self.rows.write().push(reading);
    }

    pub fn insert_many(&self, readings: impl IntoIterator<Item = Reading>) {
        self.rows.write().extend(readings);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of `fetch_latest` calls served so far
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_statistic_window` calls served so far
    pub fn window_calls(&self) -> usize {
        self.window_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent query fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Make `fetch_latest` fail for any batch naming one of `stations`
    pub fn fail_stations(&self, stations: impl IntoIterator<Item = StationId>) {
        self.failing_stations.write().extend(stations);
    }

    pub fn clear_failure(&self) {
        *self.failure.write() = None;
        self.failing_stations.write().clear();
    }

    /// Delay every subsequent query by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    async fn simulate_io(&self) -> Result<()> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.read().clone();
        if let Some(message) = failure {
            bail!(message);
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn fetch_latest(
        &self,
        tenant: &str,
        granularity: Granularity,
        stations: &[StationId],
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;
        if let Some(station) = stations
            .iter()
            .find(|s| self.failing_stations.read().contains(*s))
        {
            bail!("station {} unavailable", station);
        }

        let rows = self.rows.read();
        let mut latest: FxHashMap<(StationId, FactorId), &Reading> = FxHashMap::default();
        for row in rows.iter().filter(|r| {
            r.tenant == tenant
                && r.granularity == granularity
                && r.timestamp >= since
                && stations.contains(&r.station)
        }) {
            latest
                .entry((row.station, row.factor))
                .and_modify(|held| {
                    if row.timestamp > held.timestamp {
                        *held = row;
                    }
                })
                .or_insert(row);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn fetch_statistic_window(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        let rows = self.rows.read();
        let mut window: Vec<&Reading> = rows
            .iter()
            .filter(|r| {
                r.tenant == tenant
                    && r.granularity == granularity
                    && r.station == station
                    && r.factor == factor
                    && r.timestamp > from
                    && r.timestamp <= to
            })
            .collect();
        window.sort_by_key(|r| r.timestamp);
        Ok(window
            .into_iter()
            .filter_map(|r| r.primary_value().ok())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::TimeZone;
    use envmon_model::IntervalStats;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn hourly(station: StationId, factor: FactorId, hour: u32, avg: f64) -> Reading {
        Reading::interval(
            "t1",
            Granularity::Hourly,
            station,
            factor,
            at(hour),
            IntervalStats {
                avg,
                min: avg,
                max: avg,
                count: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_latest_picks_max_timestamp_per_factor() {
        let store = MemoryStore::new();
        store.insert_many([
            hourly(1, 101, 1, 1.0),
            hourly(1, 101, 3, 3.0),
            hourly(1, 102, 2, 2.0),
            hourly(2, 101, 4, 4.0),
        ]);

        let mut rows = store
            .fetch_latest("t1", Granularity::Hourly, &[1], at(0))
            .await
            .unwrap();
        rows.sort_by_key(|r| r.factor);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, at(3));
        assert_eq!(rows[1].factor, 102);
        assert_eq!(store.latest_calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_latest_honors_since() {
        let store = MemoryStore::new();
        store.insert(hourly(1, 101, 1, 1.0));

        let rows = store
            .fetch_latest("t1", Granularity::Hourly, &[1], at(2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_statistic_window_is_half_open_and_ordered() {
        let store = MemoryStore::new();
        store.insert_many([
            hourly(1, 101, 4, 4.0),
            hourly(1, 101, 2, 2.0),
            hourly(1, 101, 3, 3.0),
            hourly(1, 101, 5, 5.0),
        ]);

        let values = store
            .fetch_statistic_window("t1", Granularity::Hourly, 1, 101, at(2), at(4))
            .await
            .unwrap();
        assert_eq!(values, vec![3.0, 4.0]);
        assert_eq!(store.window_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_with("disk on fire");
        let err = store
            .fetch_latest("t1", Granularity::Hourly, &[1], at(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk on fire"));

        store.clear_failure();
        assert!(store
            .fetch_latest("t1", Granularity::Hourly, &[1], at(0))
            .await
            .is_ok());
    }
}
