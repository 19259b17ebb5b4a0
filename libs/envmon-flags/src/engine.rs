//! Reading classification
//!
//! One pass per reading:
//!
//! 1. MANUAL readings are left as they are.
//! 2. Invariance flags, in catalog order: a stuck statistic over the rule's
//!    window selects the flag (hourly and daily data only).
//! 3. Region flags, in catalog order: the first rule containing the primary
//!    statistic selects the flag.
//! 4. Otherwise the catalog's NORMAL flag.
//!
//! The previous flag's effect bits are swapped for the selected flag's and
//! the reading is published to the recent-value cache.

use crate::catalog::{FlagCatalog, FlagDefinition};
use crate::config::ConfigSource;
use crate::error::{FlagError, Result};
use crate::rule::{FlagRule, TENANT_WIDE_STATION};
use chrono::{DateTime, Duration, Utc};
use envmon_cache::RecentCache;
use envmon_model::{FactorId, FlagEffect, Reading, StationId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of classifying a batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub classified: Vec<Reading>,
    /// Readings skipped because they carry no usable statistic
    pub skipped: Vec<FlagError>,
}

pub struct FlagEngine {
    config: Arc<dyn ConfigSource>,
    cache: RecentCache,
}

impl FlagEngine {
    pub fn new(config: Arc<dyn ConfigSource>, cache: RecentCache) -> Self {
        Self { config, cache }
    }

    pub fn cache(&self) -> &RecentCache {
        &self.cache
    }

    /// Classify `reading`, publish it to the cache and return it
    pub async fn classify(&self, mut reading: Reading) -> Result<Reading> {
        if reading.effect.contains(FlagEffect::MANUAL) {
            debug!(
                "Manual flag kept: {}/{}/{} @ {}",
                reading.tenant, reading.station, reading.factor, reading.timestamp
            );
            self.cache.update(&reading.tenant, reading.clone());
            return Ok(reading);
        }

        let value = reading
            .primary_value()
            .map_err(|e| FlagError::InputShape {
                tenant: reading.tenant.clone(),
                station: reading.station,
                factor: reading.factor,
                timestamp: reading.timestamp.to_rfc3339(),
                reason: e.to_string(),
            })?;

        let catalog = self.config.load_flag_catalog(&reading.tenant).await?;
        let selected = match self.select_invariance(&catalog, &reading).await? {
            Some(definition) => definition,
            None => match self.select_region(&catalog, &reading, value).await? {
                Some(definition) => definition,
                None => catalog.normal(),
            },
        };

        let previous = catalog.effect_of(&reading.flag);
        reading.effect = reading.effect.replace(previous, selected.effect);
        reading.flag = selected.name.clone();

        debug!(
            "Classified {}/{}/{}/{} @ {} value {} as {} ({})",
            reading.tenant,
            reading.granularity,
            reading.station,
            reading.factor,
            reading.timestamp,
            value,
            reading.flag,
            reading.effect
        );

        self.cache.update(&reading.tenant, reading.clone());
        Ok(reading)
    }

    /// Classify readings in order.
    ///
    /// Input-shape failures are logged and skipped; any other error aborts
    /// the batch.
    pub async fn classify_batch(&self, readings: Vec<Reading>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome {
            classified: Vec::with_capacity(readings.len()),
            skipped: Vec::new(),
        };

        for reading in readings {
            match self.classify(reading).await {
                Ok(classified) => outcome.classified.push(classified),
                Err(e) if e.is_input_shape() => {
                    warn!("Reading skipped: {}", e);
                    outcome.skipped.push(e);
                },
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    async fn select_invariance<'c>(
        &self,
        catalog: &'c FlagCatalog,
        reading: &Reading,
    ) -> Result<Option<&'c FlagDefinition>> {
        if !reading.granularity.checks_invariance() {
            return Ok(None);
        }

        for definition in catalog.iter().filter(|d| d.is_invariance()) {
            let Some(rule) = self
                .rule_for(&reading.tenant, reading.station, reading.factor, &definition.name)
                .await?
            else {
                continue;
            };
            let hours = rule.invariance_hours()?;
            let since = Duration::try_milliseconds((hours * 3_600_000.0) as i64)
                .and_then(|window| reading.timestamp.checked_sub_signed(window))
                .ok_or_else(|| FlagError::InvalidInvarianceRule {
                    flag: rule.flag.clone(),
                    reason: format!(
                        "window of {} h reaches before the earliest timestamp from {}",
                        hours, reading.timestamp
                    ),
                })?;
            if self.is_stuck(reading, since).await? {
                return Ok(Some(definition));
            }
        }
        Ok(None)
    }

    async fn select_region<'c>(
        &self,
        catalog: &'c FlagCatalog,
        reading: &Reading,
        value: f64,
    ) -> Result<Option<&'c FlagDefinition>> {
        for definition in catalog.iter().filter(|d| !d.is_invariance()) {
            let rule = self
                .rule_for(&reading.tenant, reading.station, reading.factor, &definition.name)
                .await?;
            if rule.is_some_and(|rule| rule.is_in_region(value)) {
                return Ok(Some(definition));
            }
        }
        Ok(None)
    }

    /// Station rule, falling back to the tenant-wide rule
    async fn rule_for(
        &self,
        tenant: &str,
        station: StationId,
        factor: FactorId,
        flag: &str,
    ) -> Result<Option<Arc<FlagRule>>> {
        if let Some(rule) = self.config.load_flag_rule(tenant, station, factor, flag).await? {
            return Ok(Some(rule));
        }
        if station == TENANT_WIDE_STATION {
            return Ok(None);
        }
        self.config
            .load_flag_rule(tenant, TENANT_WIDE_STATION, factor, flag)
            .await
    }

    /// At least two values in `(since, ts]`, all equal
    async fn is_stuck(&self, reading: &Reading, since: DateTime<Utc>) -> Result<bool> {
        let values = self
            .cache
            .statistic_window(
                &reading.tenant,
                reading.granularity,
                reading.station,
                reading.factor,
                since,
                reading.timestamp,
            )
            .await
            .map_err(|source| FlagError::Backend {
                tenant: reading.tenant.clone(),
                granularity: reading.granularity,
                station: reading.station,
                factor: reading.factor,
                timestamp: reading.timestamp.to_rfc3339(),
                source,
            })?;

        Ok(match values.split_first() {
            Some((first, rest)) if !rest.is_empty() => {
                rest.iter().all(|v| (v - first).abs() < f64::EPSILON)
            },
            _ => false,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::registry::TenantConfigRegistry;
    use chrono::TimeZone;
    use envmon_cache::{CacheConfig, MemoryStore};
    use envmon_model::{Granularity, IntervalStats};
    use tracing_test::traced_test;

    const DOC: &str = r#"
tenants:
  - tenant: t1
    flags:
      - name: STUCK
        effects: [DATA_INVARIANCE]
      - name: HIGH
        effects: [OVERPROOF]
      - name: N
        effects: [NORMAL]
    rules:
      - factor: 201
        flag: HIGH
        region: ">100"
      - factor: 201
        flag: STUCK
        region: "=3"
"#;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn hourly(hour: u32, avg: f64) -> Reading {
        Reading::interval(
            "t1",
            Granularity::Hourly,
            1,
            201,
            at(hour),
            IntervalStats {
                avg,
                min: avg,
                max: avg,
                count: 12,
            },
        )
    }

    fn engine(store: Arc<MemoryStore>) -> FlagEngine {
        let registry = TenantConfigRegistry::from_yaml_str(DOC).unwrap();
        FlagEngine::new(
            Arc::new(registry),
            RecentCache::new(store, CacheConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_stuck_series_selects_invariance_flag() {
        let store = Arc::new(MemoryStore::new());
        store.insert_many([hourly(8, 150.0), hourly(9, 150.0), hourly(10, 150.0)]);
        let engine = engine(Arc::clone(&store));

        // Stuck wins over the HIGH region match that would also apply
        let classified = engine.classify(hourly(10, 150.0)).await.unwrap();
        assert_eq!(classified.flag, "STUCK");
        assert_eq!(classified.effect, FlagEffect::DATA_INVARIANCE);
        assert_eq!(store.window_calls(), 1);
    }

    #[tokio::test]
    async fn test_single_row_window_is_not_stuck() {
        let store = Arc::new(MemoryStore::new());
        // 07:00 is outside (07:00, 10:00]
        store.insert_many([hourly(7, 12.0), hourly(10, 12.0)]);
        let engine = engine(Arc::clone(&store));

        let classified = engine.classify(hourly(10, 12.0)).await.unwrap();
        assert_eq!(classified.flag, "N");
    }

    #[tokio::test]
    async fn test_changing_series_falls_through_to_region() {
        let store = Arc::new(MemoryStore::new());
        store.insert_many([hourly(9, 120.0), hourly(10, 130.0)]);
        let engine = engine(Arc::clone(&store));

        let classified = engine.classify(hourly(10, 130.0)).await.unwrap();
        assert_eq!(classified.flag, "HIGH");
    }

    #[tokio::test]
    async fn test_realtime_skips_invariance_check() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&store));

        let reading = Reading::instant("t1", 1, 201, at(10), 12.0);
        let classified = engine.classify(reading).await.unwrap();
        assert_eq!(classified.flag, "N");
        assert_eq!(store.window_calls(), 0);
    }

    #[tokio::test]
    async fn test_previous_effect_bits_are_replaced() {
        let engine = engine(Arc::new(MemoryStore::new()));

        let reading = Reading::instant("t1", 1, 201, at(10), 50.0)
            .with_flag("HIGH", FlagEffect::OVERPROOF | FlagEffect::PUSH);
        let classified = engine.classify(reading).await.unwrap();

        assert_eq!(classified.flag, "N");
        assert_eq!(classified.effect, FlagEffect::NORMAL | FlagEffect::PUSH);
    }

    #[tokio::test]
    async fn test_backend_failure_carries_reading_context() {
        let store = Arc::new(MemoryStore::new());
        store.fail_with("timeout talking to archive");
        let engine = engine(Arc::clone(&store));

        let err = engine.classify(hourly(10, 1.0)).await.unwrap_err();
        assert!(matches!(err, FlagError::Backend { station: 1, factor: 201, .. }));
        assert_eq!(engine.cache().stats().entries, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_skipped_reading_is_logged() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut broken = hourly(10, 1.0);
        broken.stats = envmon_model::Statistics::Empty;

        let outcome = engine.classify_batch(vec![broken]).await.unwrap();
        assert!(outcome.classified.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(logs_contain("Reading skipped"));
    }

    /// Hands out rules without save-time checks
    struct UncheckedRules {
        catalog: Arc<FlagCatalog>,
        rule: Arc<FlagRule>,
    }

    #[async_trait::async_trait]
    impl ConfigSource for UncheckedRules {
        async fn load_flag_catalog(&self, _tenant: &str) -> Result<Arc<FlagCatalog>> {
            Ok(Arc::clone(&self.catalog))
        }

        async fn load_flag_rule(
            &self,
            _tenant: &str,
            _station: StationId,
            _factor: FactorId,
            flag: &str,
        ) -> Result<Option<Arc<FlagRule>>> {
            Ok((flag == self.rule.flag).then(|| Arc::clone(&self.rule)))
        }
    }

    #[tokio::test]
    async fn test_oversized_invariance_window_is_config_error() {
        let catalog = FlagCatalog::new(vec![
            FlagDefinition::new("STUCK", "", FlagEffect::DATA_INVARIANCE),
            FlagDefinition::new("HIGH", "", FlagEffect::OVERPROOF),
            FlagDefinition::new("N", "", FlagEffect::NORMAL),
        ])
        .unwrap();
        let config = UncheckedRules {
            catalog: Arc::new(catalog),
            rule: Arc::new(FlagRule::new(0, 201, "STUCK", "=1e10").unwrap()),
        };
        let store = Arc::new(MemoryStore::new());
        let engine = FlagEngine::new(
            Arc::new(config),
            RecentCache::new(store.clone(), CacheConfig::default()),
        );

        let err = engine.classify(hourly(10, 1.0)).await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidInvarianceRule { ref flag, .. } if flag == "STUCK"));
        assert_eq!(store.window_calls(), 0);
    }

    #[tokio::test]
    async fn test_window_before_earliest_timestamp_is_config_error() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut reading = hourly(10, 1.0);
        reading.timestamp = DateTime::<Utc>::MIN_UTC + Duration::hours(1);

        let err = engine.classify(reading).await.unwrap_err();
        assert!(matches!(err, FlagError::InvalidInvarianceRule { .. }));
    }

    #[test]
    fn test_oversized_invariance_window_rejected_on_load() {
        let doc = DOC.replace("region: \"=3\"", "region: \"=1e10\"");
        assert!(matches!(
            TenantConfigRegistry::from_yaml_str(&doc),
            Err(FlagError::InvalidInvarianceRule { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_config_error() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let err = engine
            .classify(Reading::instant("t9", 1, 201, at(10), 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::CatalogNotLoaded(_)));
    }
}
