//! Backing store abstraction
//!
//! The recent-value cache never persists anything itself. On a miss it asks a
//! backing store for the newest rows, and the flag engine asks it for the
//! statistic history used by the stuck-sensor check.
//!
//! Implementations:
//! - `SqliteStore`: SQLite-backed store (feature `sqlite-backend`)
//! - `MemoryStore`: in-process store for tests and tooling

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envmon_model::{FactorId, Granularity, Reading, StationId};

#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Newest reading per (station, factor) among `stations`, restricted to
    /// rows with `timestamp >= since`.
    async fn fetch_latest(
        &self,
        tenant: &str,
        granularity: Granularity,
        stations: &[StationId],
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// Primary statistic values of one station/factor in `(from, to]`, oldest first.
    ///
    /// Rows without a usable statistic are skipped.
    async fn fetch_statistic_window(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>>;
}
