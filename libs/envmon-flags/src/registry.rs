//! In-process tenant configuration registry
//!
//! Holds one immutable `TenantConfig` snapshot per tenant. Every mutation
//! builds a new snapshot and swaps it in, so evaluations in flight keep the
//! catalog and rules they started with.

use crate::catalog::{FlagCatalog, FlagDefinition};
use crate::config::ConfigSource;
use crate::error::{FlagError, Result};
use crate::rule::FlagRule;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use envmon_model::{FactorId, FlagEffect, StationId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type RuleKey = (StationId, FactorId, String);

/// Snapshot of one tenant's catalog and rules
#[derive(Debug, Clone)]
pub struct TenantConfig {
    catalog: Arc<FlagCatalog>,
    rules: FxHashMap<RuleKey, Arc<FlagRule>>,
}

impl TenantConfig {
    pub fn catalog(&self) -> &Arc<FlagCatalog> {
        &self.catalog
    }

    pub fn rule(&self, station: StationId, factor: FactorId, flag: &str) -> Option<&Arc<FlagRule>> {
        self.rules.get(&(station, factor, flag.to_string()))
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<FlagRule>> {
        self.rules.values()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// YAML documents
// ============================================================================

/// Flag entry as written in YAML; effects are listed by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagEntry {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub effects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub station: StationId,
    pub factor: FactorId,
    pub flag: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDocument {
    pub tenant: String,
    pub flags: Vec<FlagEntry>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub tenants: Vec<TenantDocument>,
}

impl ConfigDocument {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl TenantDocument {
    /// Validate into a catalog plus rules without touching any registry
    pub fn build(&self) -> Result<(FlagCatalog, Vec<FlagRule>)> {
        let definitions = self
            .flags
            .iter()
            .map(|entry| {
                let effect = FlagEffect::from_names(entry.effects.iter().map(String::as_str))
                    .map_err(|e| FlagError::Config(format!("flag '{}': {}", entry.name, e)))?;
                Ok(FlagDefinition::new(&entry.name, &entry.label, effect))
            })
            .collect::<Result<Vec<_>>>()?;
        let catalog = FlagCatalog::new(definitions)?;

        let mut rules = Vec::with_capacity(self.rules.len());
        for entry in &self.rules {
            let definition = catalog
                .get(&entry.flag)
                .ok_or_else(|| FlagError::UnknownFlag(entry.flag.clone()))?;
            let rule = FlagRule::new(entry.station, entry.factor, &entry.flag, &entry.region)?;
            rule.validate_for(definition)?;
            rules.push(rule);
        }
        Ok((catalog, rules))
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct TenantConfigRegistry {
    tenants: DashMap<String, Arc<TenantConfig>>,
}

impl TenantConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a YAML configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let document = ConfigDocument::from_yaml_str(yaml)?;
        let registry = Self::new();
        for tenant in &document.tenants {
            registry.load_document(tenant)?;
        }
        Ok(registry)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| FlagError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Replace one tenant's configuration with the document's contents
    pub fn load_document(&self, document: &TenantDocument) -> Result<()> {
        let (catalog, rules) = document.build()?;
        let rules = rules
            .into_iter()
            .map(|rule| ((rule.station, rule.factor, rule.flag.clone()), Arc::new(rule)))
            .collect();

        self.tenants.insert(
            document.tenant.clone(),
            Arc::new(TenantConfig {
                catalog: Arc::new(catalog),
                rules,
            }),
        );
        info!(
            "Flag config loaded for tenant {}: {} flags, {} rules",
            document.tenant,
            document.flags.len(),
            document.rules.len()
        );
        Ok(())
    }

    /// Install a new catalog, keeping rules whose flags still exist.
    ///
    /// Fails without changes if a kept rule no longer fits its definition.
    pub fn save_catalog(&self, tenant: &str, catalog: FlagCatalog) -> Result<()> {
        let catalog = Arc::new(catalog);

        // Entry lock held across validation and swap so concurrent rule
        // edits are either carried over or applied on top
        match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(mut entry) => {
                let rules = carry_rules(&catalog, &entry.get().rules)?;
                entry.insert(Arc::new(TenantConfig {
                    catalog: Arc::clone(&catalog),
                    rules,
                }));
            },
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(TenantConfig {
                    catalog: Arc::clone(&catalog),
                    rules: FxHashMap::default(),
                }));
            },
        }

        info!("Flag catalog saved for tenant {}: {} flags", tenant, catalog.len());
        Ok(())
    }

    /// Insert or replace a rule after checking it against the catalog
    pub fn save_rule(&self, tenant: &str, rule: FlagRule) -> Result<()> {
        self.mutate(tenant, |config| {
            let definition = config
                .catalog
                .get(&rule.flag)
                .ok_or_else(|| FlagError::UnknownFlag(rule.flag.clone()))?;
            rule.validate_for(definition)?;
            config
                .rules
                .insert((rule.station, rule.factor, rule.flag.clone()), Arc::new(rule));
            Ok(())
        })
    }

    /// Re-parse and replace the expression of an existing rule
    pub fn update_rule(
        &self,
        tenant: &str,
        station: StationId,
        factor: FactorId,
        flag: &str,
        expression: &str,
    ) -> Result<()> {
        self.mutate(tenant, |config| {
            let key = (station, factor, flag.to_string());
            let mut rule = config
                .rules
                .get(&key)
                .map(|r| FlagRule::clone(r))
                .ok_or_else(|| {
                    FlagError::Config(format!("no rule for {}/{}/{}", station, factor, flag))
                })?;
            rule.set_expression(expression)?;
            let definition = config
                .catalog
                .get(flag)
                .ok_or_else(|| FlagError::UnknownFlag(flag.to_string()))?;
            rule.validate_for(definition)?;
            config.rules.insert(key, Arc::new(rule));
            Ok(())
        })
    }

    pub fn delete_rule(
        &self,
        tenant: &str,
        station: StationId,
        factor: FactorId,
        flag: &str,
    ) -> Result<bool> {
        let mut removed = false;
        self.mutate(tenant, |config| {
            removed = config
                .rules
                .remove(&(station, factor, flag.to_string()))
                .is_some();
            Ok(())
        })?;
        Ok(removed)
    }

    pub fn remove_tenant(&self, tenant: &str) -> bool {
        self.tenants.remove(tenant).is_some()
    }

    pub fn snapshot(&self, tenant: &str) -> Option<Arc<TenantConfig>> {
        self.tenants.get(tenant).map(|entry| Arc::clone(entry.value()))
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tenants.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Copy-on-write update of one tenant; the shard lock is held only for
    /// the in-memory clone and swap
    fn mutate(&self, tenant: &str, f: impl FnOnce(&mut TenantConfig) -> Result<()>) -> Result<()> {
        let mut entry = self
            .tenants
            .get_mut(tenant)
            .ok_or_else(|| FlagError::CatalogNotLoaded(tenant.to_string()))?;
        let mut next = TenantConfig::clone(entry.value());
        f(&mut next)?;
        *entry.value_mut() = Arc::new(next);
        Ok(())
    }
}

/// Rules of `current` whose flag survives in `catalog`, re-validated
fn carry_rules(
    catalog: &FlagCatalog,
    current: &FxHashMap<RuleKey, Arc<FlagRule>>,
) -> Result<FxHashMap<RuleKey, Arc<FlagRule>>> {
    let mut rules = FxHashMap::default();
    for (key, rule) in current {
        match catalog.get(&rule.flag) {
            Some(definition) => {
                rule.validate_for(definition)?;
                rules.insert(key.clone(), Arc::clone(rule));
            },
            None => debug!(
                "Dropping rule {}/{}/{} of removed flag",
                rule.station, rule.factor, rule.flag
            ),
        }
    }
    Ok(rules)
}

#[async_trait]
impl ConfigSource for TenantConfigRegistry {
    async fn load_flag_catalog(&self, tenant: &str) -> Result<Arc<FlagCatalog>> {
        self.snapshot(tenant)
            .map(|config| Arc::clone(&config.catalog))
            .ok_or_else(|| FlagError::CatalogNotLoaded(tenant.to_string()))
    }

    async fn load_flag_rule(
        &self,
        tenant: &str,
        station: StationId,
        factor: FactorId,
        flag: &str,
    ) -> Result<Option<Arc<FlagRule>>> {
        let config = self
            .snapshot(tenant)
            .ok_or_else(|| FlagError::CatalogNotLoaded(tenant.to_string()))?;
        Ok(config.rule(station, factor, flag).cloned())
    }
}
