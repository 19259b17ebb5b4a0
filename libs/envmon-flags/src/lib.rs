//! Reading Flag Classification
//!
//! Assigns a quality flag to each reading from per-tenant catalogs of flag
//! definitions and per-station region rules, and publishes the classified
//! reading to the recent-value cache.
//!
//! # Modules
//!
//! - `region`: the `>=10,<=20;=0` region grammar
//! - `catalog`: ordered flag definitions with save-time validation
//! - `rule`: region rules scoped to station/factor/flag
//! - `config` / `registry`: configuration lookup and its in-process store
//! - `engine`: the classification pass

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod region;
pub mod registry;
pub mod rule;

pub use catalog::{FlagCatalog, FlagDefinition};
pub use config::ConfigSource;
pub use engine::{BatchOutcome, FlagEngine};
pub use error::{FlagError, Result};
pub use region::{Comparator, Condition, RegionSet};
pub use registry::{ConfigDocument, TenantConfig, TenantConfigRegistry, TenantDocument};
pub use rule::{FlagRule, TENANT_WIDE_STATION};
