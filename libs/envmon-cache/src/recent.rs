//! Recent-value cache
//!
//! Holds the freshest reading per (tenant, granularity, station, factor).
//!
//! ```text
//! tenants ──▶ TenantPool ──▶ GranularityPool ──▶ StationPool
//! Layer<tenant>  Layer<granularity>  Layer<station>   RwLock<factor → Reading>
//! ```
//!
//! Each level has its own lock, taken top-down and released before the next
//! level is touched, so a writer only contends with writers of the same
//! station. Missing stations are read through from the backing store; rows
//! fetched on a miss are written back by a detached task that goes through
//! the same freshness-checked `update` path as live traffic.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::layer::Layer;
use crate::store::BackingStore;
use chrono::{DateTime, Utc};
use envmon_model::{
    FactorId, Granularity, Reading, StationId, SystemTimeProvider, TenantId, TimeProvider,
    PLACEHOLDER_FACTOR,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Readings returned by `get`: station → factor → freshest reading
pub type StationReadings = HashMap<StationId, HashMap<FactorId, Reading>>;

type GranularityPool = Layer<StationId, StationPool>;
type TenantPool = Layer<Granularity, GranularityPool>;

// ============================================================================
// Station pool (leaf layer)
// ============================================================================

enum Lookup {
    Hit(HashMap<FactorId, Reading>),
    Negative,
    Miss,
}

enum Upsert {
    Applied,
    Rejected,
    /// The pool was cleared after the caller looked it up
    Detached(Reading),
}

/// Factor-keyed entries of one station
struct StationPool {
    entries: RwLock<FxHashMap<FactorId, Reading>>,
    /// Set under the entries lock once the pool is unlinked from the cache
    detached: AtomicBool,
}

impl StationPool {
    fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            detached: AtomicBool::new(false),
        }
    }

    /// Replace the entry only if `reading` is strictly newer.
    ///
    /// Ties keep the held entry. The whole reading (value, flag and effect
    /// mask) is swapped under one exclusive lock. A detached pool hands the
    /// reading back untouched.
    fn upsert(&self, reading: Reading) -> Upsert {
        let mut entries = self.entries.write();
        if self.detached.load(Ordering::Relaxed) {
            return Upsert::Detached(reading);
        }
        if let Some(held) = entries.get(&reading.factor) {
            if held.timestamp >= reading.timestamp {
                return Upsert::Rejected;
            }
        }
        if !reading.is_placeholder() {
            entries.remove(&PLACEHOLDER_FACTOR);
        }
        entries.insert(reading.factor, reading);
        Upsert::Applied
    }

    /// Record a confirmed-empty station; no-op once any entry exists
    fn mark_absent(&self, placeholder: Reading) -> bool {
        let mut entries = self.entries.write();
        if !entries.is_empty() || self.detached.load(Ordering::Relaxed) {
            return false;
        }
        entries.insert(PLACEHOLDER_FACTOR, placeholder);
        true
    }

    fn lookup(&self) -> Lookup {
        let entries = self.entries.read();
        if entries.is_empty() {
            return Lookup::Miss;
        }
        let readings: HashMap<FactorId, Reading> = entries
            .iter()
            .filter(|(_, r)| !r.is_placeholder())
            .map(|(factor, r)| (*factor, r.clone()))
            .collect();
        if readings.is_empty() {
            Lookup::Negative
        } else {
            Lookup::Hit(readings)
        }
    }

    fn get(&self, factor: FactorId) -> Option<Reading> {
        self.entries
            .read()
            .get(&factor)
            .filter(|r| !r.is_placeholder())
            .cloned()
    }

    /// Called after unlinking; later writers see the flag and retry
    fn detach(&self) {
        let mut entries = self.entries.write();
        self.detached.store(true, Ordering::Relaxed);
        entries.clear();
    }

    /// (real entries, negative entries)
    fn counts(&self) -> (usize, usize) {
        let entries = self.entries.read();
        let negative = entries.values().filter(|r| r.is_placeholder()).count();
        (entries.len() - negative, negative)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    backing_fetches: AtomicU64,
    layers_created: AtomicU64,
    updates_applied: AtomicU64,
    updates_rejected: AtomicU64,
}

/// Point-in-time view of cache occupancy and activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tenants: usize,
    pub granularity_pools: usize,
    pub station_pools: usize,
    pub entries: usize,
    pub negative_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub backing_fetches: u64,
    /// Intermediate pools (tenant, granularity, station) ever allocated
    pub layers_created: u64,
    pub updates_applied: u64,
    pub updates_rejected: u64,
}

// ============================================================================
// RecentCache
// ============================================================================

struct CacheInner {
    tenants: Layer<TenantId, TenantPool>,
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn TimeProvider>,
    config: CacheConfig,
    counters: CacheCounters,
    backfills: Mutex<Vec<JoinHandle<()>>>,
}

/// Layered read-through/write-through cache of the latest readings
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct RecentCache {
    inner: Arc<CacheInner>,
}

impl RecentCache {
    pub fn new(store: Arc<dyn BackingStore>, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemTimeProvider))
    }

    /// Create with a custom clock (lookback windows and placeholder timestamps)
    pub fn with_clock(
        store: Arc<dyn BackingStore>,
        config: CacheConfig,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                tenants: Layer::new(),
                store,
                clock,
                config,
                counters: CacheCounters::default(),
                backfills: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Freshest cached readings for `stations`.
    ///
    /// Stations absent from the cache are fetched from the backing store in
    /// batches bounded by `fetch_batch_size`. Fetched rows are returned
    /// immediately and written back by a detached task. Stations that yield
    /// no rows become negative entries and are omitted from the result.
    ///
    /// If a batch fails, the other batches are still cached and the first
    /// error is returned.
    pub async fn get(
        &self,
        tenant: &str,
        granularity: Granularity,
        stations: &[StationId],
    ) -> Result<StationReadings> {
        let counters = &self.inner.counters;
        let mut result = StationReadings::new();
        let mut missing = Vec::new();
        let mut seen = FxHashSet::default();

        for &station in stations {
            if !seen.insert(station) {
                continue;
            }
            match self.inner.lookup(tenant, granularity, station) {
                Lookup::Hit(readings) => {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    result.insert(station, readings);
                },
                Lookup::Negative => {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                },
                Lookup::Miss => {
                    counters.misses.fetch_add(1, Ordering::Relaxed);
                    missing.push(station);
                },
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        let now = self.inner.clock.now();
        let lookback = self.inner.config.lookback(granularity)?;
        let since = now.checked_sub_signed(lookback).ok_or_else(|| {
            CacheError::Config(format!(
                "{} lookback of {} reaches before the earliest timestamp",
                granularity, lookback
            ))
        })?;
        let batches: Vec<&[StationId]> = missing.chunks(self.inner.config.batch_size()).collect();
        let outcomes = futures::future::join_all(
            batches
                .iter()
                .map(|batch| self.fetch_latest(tenant, granularity, batch, since)),
        )
        .await;

        let mut first_error = None;
        let mut fetched = Vec::new();
        for (batch, outcome) in batches.into_iter().zip(outcomes) {
            let rows = match outcome {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Cache fill failed for {}/{}: {}", tenant, granularity, e);
                    first_error.get_or_insert(e);
                    continue;
                },
            };

            let mut found = FxHashSet::default();
            for row in rows {
                if row.granularity != granularity || !batch.contains(&row.station) {
                    warn!(
                        "Backing store returned unrequested row {}:{}@{} ({}), ignored",
                        row.station, row.factor, row.timestamp, row.granularity
                    );
                    continue;
                }
                found.insert(row.station);
                let slot = result.entry(row.station).or_default();
                let newer = slot
                    .get(&row.factor)
                    .map_or(true, |held| row.timestamp > held.timestamp);
                if newer {
                    slot.insert(row.factor, row.clone());
                }
                fetched.push(row);
            }

            for &station in batch.iter().filter(|s| !found.contains(*s)) {
                if self.inner.mark_absent(tenant, granularity, station) {
                    debug!("Negative cache entry: {}/{}/{}", tenant, granularity, station);
                }
            }
        }

        if !fetched.is_empty() {
            self.spawn_backfill(tenant, granularity, fetched);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Freshest reading for a single key
    pub async fn get_one(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
    ) -> Result<Option<Reading>> {
        if let Some(reading) = self.inner.get_cached(tenant, granularity, station, factor) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(reading));
        }
        let mut readings = self.get(tenant, granularity, &[station]).await?;
        Ok(readings
            .remove(&station)
            .and_then(|mut factors| factors.remove(&factor)))
    }

    /// Insert or replace the entry for `reading`'s key if it is strictly newer.
    ///
    /// Missing tenant/granularity/station pools are created on the way down.
    /// Returns whether the cached value changed; losing a freshness race is
    /// reported as `false`, not as an error.
    pub fn update(&self, tenant: &str, reading: Reading) -> bool {
        self.inner.update(tenant, reading)
    }

    /// Drop every cached entry of `station` across all granularities
    pub fn clear(&self, tenant: &str, station: StationId) -> bool {
        let Some(tenant_pool) = self.inner.tenants.get(tenant) else {
            return false;
        };
        let mut removed = false;
        for granularity in Granularity::ALL {
            if let Some(station_pool) = tenant_pool
                .get(&granularity)
                .and_then(|pool| pool.remove(&station))
            {
                station_pool.detach();
                removed = true;
            }
        }
        if removed {
            debug!("Cache cleared: {}/{}", tenant, station);
        }
        removed
    }

    /// Drop a whole tenant
    pub fn clear_tenant(&self, tenant: &str) -> bool {
        let Some(tenant_pool) = self.inner.tenants.remove(tenant) else {
            return false;
        };
        for granularity_pool in tenant_pool.values() {
            for station_pool in granularity_pool.values() {
                station_pool.detach();
            }
        }
        debug!("Cache cleared: tenant {}", tenant);
        true
    }

    /// Primary statistic history of one key in `(from, to]`, read from the
    /// backing store under the configured deadline
    pub async fn statistic_window(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let started = Instant::now();
        let fetch = self
            .inner
            .store
            .fetch_statistic_window(tenant, granularity, station, factor, from, to);
        match tokio::time::timeout(self.inner.config.fetch_timeout(), fetch).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(cause)) => Err(CacheError::Backend {
                tenant: tenant.to_string(),
                granularity,
                stations: vec![station],
                cause,
            }),
            Err(_) => Err(CacheError::Timeout {
                tenant: tenant.to_string(),
                granularity,
                elapsed: started.elapsed(),
            }),
        }
    }

    /// Wait for every detached write-back task spawned so far
    pub async fn flush_backfills(&self) {
        let pending = std::mem::take(&mut *self.inner.backfills.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                warn!("Cache backfill task failed: {}", e);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let mut stats = CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            backing_fetches: counters.backing_fetches.load(Ordering::Relaxed),
            layers_created: counters.layers_created.load(Ordering::Relaxed),
            updates_applied: counters.updates_applied.load(Ordering::Relaxed),
            updates_rejected: counters.updates_rejected.load(Ordering::Relaxed),
            ..CacheStats::default()
        };

        for tenant_pool in self.inner.tenants.values() {
            stats.tenants += 1;
            for granularity_pool in tenant_pool.values() {
                stats.granularity_pools += 1;
                for station_pool in granularity_pool.values() {
                    stats.station_pools += 1;
                    let (entries, negative) = station_pool.counts();
                    stats.entries += entries;
                    stats.negative_entries += negative;
                }
            }
        }
        stats
    }

    async fn fetch_latest(
        &self,
        tenant: &str,
        granularity: Granularity,
        stations: &[StationId],
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        self.inner
            .counters
            .backing_fetches
            .fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let fetch = self
            .inner
            .store
            .fetch_latest(tenant, granularity, stations, since);

        match tokio::time::timeout(self.inner.config.fetch_timeout(), fetch).await {
            Ok(Ok(rows)) => {
                debug!(
                    "Fetched {} rows for {}/{} ({} stations) in {:?}",
                    rows.len(),
                    tenant,
                    granularity,
                    stations.len(),
                    started.elapsed()
                );
                Ok(rows)
            },
            Ok(Err(cause)) => Err(CacheError::Backend {
                tenant: tenant.to_string(),
                granularity,
                stations: stations.to_vec(),
                cause,
            }),
            Err(_) => Err(CacheError::Timeout {
                tenant: tenant.to_string(),
                granularity,
                elapsed: started.elapsed(),
            }),
        }
    }

    fn spawn_backfill(&self, tenant: &str, granularity: Granularity, rows: Vec<Reading>) {
        let inner = Arc::clone(&self.inner);
        let tenant = tenant.to_string();
        let handle = tokio::spawn(async move {
            let total = rows.len();
            let applied = rows
                .into_iter()
                .map(|row| inner.update(&tenant, row))
                .filter(|changed| *changed)
                .count();
            debug!(
                "Backfill {}/{}: {} of {} rows applied",
                tenant, granularity, applied, total
            );
        });

        let mut pending = self.inner.backfills.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

impl CacheInner {
    fn lookup(&self, tenant: &str, granularity: Granularity, station: StationId) -> Lookup {
        let Some(tenant_pool) = self.tenants.get(tenant) else {
            return Lookup::Miss;
        };
        let Some(granularity_pool) = tenant_pool.get(&granularity) else {
            return Lookup::Miss;
        };
        match granularity_pool.get(&station) {
            Some(station_pool) => station_pool.lookup(),
            None => Lookup::Miss,
        }
    }

    fn get_cached(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
        factor: FactorId,
    ) -> Option<Reading> {
        self.tenants
            .get(tenant)?
            .get(&granularity)?
            .get(&station)?
            .get(factor)
    }

    fn station_pool(
        &self,
        tenant: &str,
        granularity: Granularity,
        station: StationId,
    ) -> Arc<StationPool> {
        let (tenant_pool, tenant_created) = self.tenants.get_or_create(tenant, Layer::new);
        let (granularity_pool, granularity_created) =
            tenant_pool.get_or_create(&granularity, Layer::new);
        let (station_pool, station_created) =
            granularity_pool.get_or_create(&station, StationPool::new);

        let created = [tenant_created, granularity_created, station_created]
            .iter()
            .filter(|c| **c)
            .count();
        if created > 0 {
            self.counters
                .layers_created
                .fetch_add(created as u64, Ordering::Relaxed);
        }
        station_pool
    }

    fn update(&self, tenant: &str, mut reading: Reading) -> bool {
        let changed = loop {
            let pool = self.station_pool(tenant, reading.granularity, reading.station);
            match pool.upsert(reading) {
                Upsert::Applied => break true,
                Upsert::Rejected => break false,
                Upsert::Detached(returned) => reading = returned,
            }
        };
        let counter = if changed {
            &self.counters.updates_applied
        } else {
            &self.counters.updates_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
        changed
    }

    fn mark_absent(&self, tenant: &str, granularity: Granularity, station: StationId) -> bool {
        let placeholder = Reading::placeholder(tenant, granularity, station, self.clock.now());
        self.station_pool(tenant, granularity, station)
            .mark_absent(placeholder)
    }
}
