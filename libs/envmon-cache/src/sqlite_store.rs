//! SQLite-backed store
//!
//! One `readings` table keyed by (tenant, granularity, station, factor, ts).
//! Timestamps are stored as Unix milliseconds. Real-time rows fill `value`;
//! interval rows fill the avg/min/max/count columns.

use crate::error::{CacheError, Result};
use crate::store::BackingStore;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envmon_model::{
    FactorId, FlagEffect, Granularity, IntervalStats, Reading, StationId, Statistics,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    tenant       TEXT    NOT NULL,
    granularity  TEXT    NOT NULL,
    station_id   INTEGER NOT NULL,
    factor_id    INTEGER NOT NULL,
    ts           INTEGER NOT NULL,
    value        REAL,
    avg_value    REAL,
    min_value    REAL,
    max_value    REAL,
    sample_count INTEGER,
    flag         TEXT    NOT NULL DEFAULT '',
    effect       INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant, granularity, station_id, factor_id, ts)
);
CREATE INDEX IF NOT EXISTS idx_readings_latest
    ON readings (tenant, granularity, station_id, ts);
"#;

const READING_COLUMNS: &str =
    "r.station_id, r.factor_id, r.ts, r.value, r.avg_value, r.min_value, r.max_value, \
     r.sample_count, r.flag, r.effect";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file in WAL mode
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Other(e.into()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        info!("Reading store opened: {}", path.display());
        Ok(Self { pool })
    }

    /// Private in-memory database on a single pinned connection
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Reading schema ready");
        Ok(())
    }

    /// Insert a reading, replacing any row with the same key and timestamp
    pub async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        let (value, interval) = match &reading.stats {
            Statistics::Instant { value } => (Some(*value), None),
            Statistics::Interval(stats) => (None, Some(*stats)),
            Statistics::Empty => (None, None),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO readings \
             (tenant, granularity, station_id, factor_id, ts, value, avg_value, min_value, \
              max_value, sample_count, flag, effect) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reading.tenant)
        .bind(reading.granularity.as_str())
        .bind(i64::from(reading.station))
        .bind(i64::from(reading.factor))
        .bind(reading.timestamp.timestamp_millis())
        .bind(value)
        .bind(interval.map(|s| s.avg))
        .bind(interval.map(|s| s.min))
        .bind(interval.map(|s| s.max))
        .bind(interval.map(|s| i64::from(s.count)))
        .bind(&reading.flag)
        .bind(i64::from(reading.effect.bits()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_many(&self, readings: &[Reading]) -> Result<()> {
        for reading in readings {
            self.insert_reading(reading).await?;
        }
        Ok(())
    }
}

fn decode_reading(tenant: &str, granularity: Granularity, row: &SqliteRow) -> anyhow::Result<Reading> {
    let ts: i64 = row.try_get("ts")?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(ts)
        .ok_or_else(|| anyhow!("timestamp out of range: {}", ts))?;

    let stats = if granularity.is_interval() {
        let avg: Option<f64> = row.try_get("avg_value")?;
        let min: Option<f64> = row.try_get("min_value")?;
        let max: Option<f64> = row.try_get("max_value")?;
        let count: Option<i64> = row.try_get("sample_count")?;
        match (avg, min, max) {
            (Some(avg), Some(min), Some(max)) => Statistics::Interval(IntervalStats {
                avg,
                min,
                max,
                count: count.unwrap_or(0) as u32,
            }),
            _ => Statistics::Empty,
        }
    } else {
        match row.try_get::<Option<f64>, _>("value")? {
            Some(value) => Statistics::Instant { value },
            None => Statistics::Empty,
        }
    };

    let station: i64 = row.try_get("station_id")?;
    let factor: i64 = row.try_get("factor_id")?;
    let effect: i64 = row.try_get("effect")?;

    Ok(Reading {
        tenant: tenant.to_string(),
        granularity,
        station: station as StationId,
        factor: factor as FactorId,
        timestamp,
        stats,
        flag: row.try_get("flag")?,
        effect: FlagEffect::from_bits_truncate(effect as u32),
    })
}

#[async_trait]
impl BackingStore for SqliteStore {
    async fn fetch_latest(
        &self,
        tenant: &str,
        granularity: Granularity,
        stations: &[StationId],
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Reading>> {
        if stations.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(READING_COLUMNS);
        qb.push(
            " FROM readings r JOIN (SELECT station_id, factor_id, MAX(ts) AS max_ts \
             FROM readings WHERE tenant = ",
        );
        qb.push_bind(tenant.to_string());
        qb.push(" AND granularity = ");
        qb.push_bind(granularity.as_str());
        qb.push(" AND ts >= ");
        qb.push_bind(since.timestamp_millis());
        qb.push(" AND station_id IN (");
        let mut ids = qb.separated(", ");
        for station in stations {
            ids.push_bind(i64::from(*station));
        }
        ids.push_unseparated(")");
        qb.push(
            " GROUP BY station_id, factor_id) m \
             ON r.station_id = m.station_id AND r.factor_id = m.factor_id AND r.ts = m.max_ts \
             WHERE r.tenant = ",
        );
        qb.push_bind(tenant.to_string());
        qb.push(" AND r.granularity = ");
        qb.push_bind(granularity.as_str());

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| decode_reading(tenant, granularity, row))
            .collect()
    }

    async fn fetch_statistic_window(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<f64>> {
        let column = if granularity.is_interval() {
            "avg_value"
        } else {
            "value"
        };
        let sql = format!(
            "SELECT {column} FROM readings \
             WHERE tenant = ? AND granularity = ? AND station_id = ? AND factor_id = ? \
             AND ts > ? AND ts <= ? AND {column} IS NOT NULL ORDER BY ts"
        );

        let values: Vec<f64> = sqlx::query_scalar(&sql)
            .bind(tenant)
            .bind(granularity.as_str())
            .bind(i64::from(station))
            .bind(i64::from(factor))
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::TimeZone;

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
                min: avg - 1.0,
                max: avg + 1.0,
                count: 12,
            },
        )
    }

    async fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_fetch_latest_returns_newest_row_per_factor() {
        let store = store().await;
        store
            .insert_many(&[
                hourly(1, 101, 1, 10.0),
                hourly(1, 101, 3, 30.0).with_flag("N", FlagEffect::NORMAL),
                hourly(1, 102, 2, 20.0),
                hourly(2, 101, 4, 40.0),
                hourly(3, 101, 5, 50.0),
            ])
            .await
            .unwrap();

        let mut rows = store
            .fetch_latest("t1", Granularity::Hourly, &[1, 2], at(0))
            .await
            .unwrap();
        rows.sort_by_key(|r| (r.station, r.factor));

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], hourly(1, 101, 3, 30.0).with_flag("N", FlagEffect::NORMAL));
        assert_eq!(rows[1].timestamp, at(2));
        assert_eq!(rows[2].station, 2);
    }

    #[tokio::test]
    async fn test_fetch_latest_respects_since_and_tenant() {
        let store = store().await;
        store.insert_reading(&hourly(1, 101, 1, 10.0)).await.unwrap();
        let mut other = hourly(1, 101, 6, 60.0);
        other.tenant = "t2".to_string();
        store.insert_reading(&other).await.unwrap();

        let rows = store
            .fetch_latest("t1", Granularity::Hourly, &[1], at(2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_realtime_round_trip() {
        let store = store().await;
        let reading = Reading::instant("t1", 7, 201, at(9), 3.25);
        store.insert_reading(&reading).await.unwrap();

        let rows = store
            .fetch_latest("t1", Granularity::Realtime, &[7], at(0))
            .await
            .unwrap();
        assert_eq!(rows, vec![reading]);
    }

    #[tokio::test]
    async fn test_statistic_window() {
        let store = store().await;
        store
            .insert_many(&[
                hourly(1, 101, 2, 2.0),
                hourly(1, 101, 3, 3.0),
                hourly(1, 101, 4, 4.0),
                hourly(1, 101, 5, 5.0),
            ])
            .await
            .unwrap();

        let values = store
            .fetch_statistic_window("t1", Granularity::Hourly, 1, 101, at(2), at(4))
            .await
            .unwrap();
        assert_eq!(values, vec![3.0, 4.0]);
    }
}
