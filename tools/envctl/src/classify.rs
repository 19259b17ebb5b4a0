//! `envctl classify`
//!
//! Reads a JSON array of readings, assigns flags against a YAML flag
//! configuration and stores each result before classifying the next. The
//! stuck-value check reads the same database, so it sees earlier readings of
//! the same file as well as earlier runs.

use crate::settings::EnvctlSettings;
use anyhow::{Context, Result};
use colored::*;
use envmon_cache::{RecentCache, SqliteStore};
use envmon_flags::{FlagEngine, TenantConfigRegistry};
use envmon_model::{FlagEffect, Reading, Statistics};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn handle_command(
    settings: &EnvctlSettings,
    db: &Path,
    rules: &Path,
    input: &Path,
) -> Result<()> {
    let classified = run(settings, db, rules, input).await?;

    println!(
        "{:<10} {:<8} {:<8} {:<25} {:>12} {:<10} {}",
        "granularity".bold(),
        "station".bold(),
        "factor".bold(),
        "timestamp".bold(),
        "value".bold(),
        "flag".bold(),
        "effect".bold()
    );
    for reading in &classified.readings {
        let flag = if reading.effect.contains(FlagEffect::NORMAL) {
            reading.flag.green()
        } else {
            reading.flag.yellow()
        };
        let effects: Vec<&str> = reading.effect.names().collect();
        println!(
            "{:<10} {:<8} {:<8} {:<25} {:>12} {:<10} {}",
            reading.granularity.as_str(),
            reading.station,
            reading.factor,
            reading.timestamp.to_rfc3339(),
            display_value(reading),
            flag,
            effects.join("|")
        );
    }

    println!(
        "\n{} classified, {} skipped",
        classified.readings.len().to_string().green(),
        classified.skipped.len().to_string().yellow()
    );
    for reason in &classified.skipped {
        println!("  {} {}", "skipped:".yellow(), reason);
    }
    Ok(())
}

pub(crate) struct ClassifyRun {
    pub readings: Vec<Reading>,
    pub skipped: Vec<String>,
}

pub(crate) async fn run(
    settings: &EnvctlSettings,
    db: &Path,
    rules: &Path,
    input: &Path,
) -> Result<ClassifyRun> {
    let registry = TenantConfigRegistry::from_yaml_file(rules)
        .with_context(|| format!("load flag configuration {}", rules.display()))?;

    let json = std::fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?;
    let readings: Vec<Reading> =
        serde_json::from_str(&json).with_context(|| format!("parse {}", input.display()))?;
    info!("Classifying {} readings from {}", readings.len(), input.display());

    let store = SqliteStore::connect(db).await?;
    store.init_schema().await?;

    let cache = RecentCache::new(Arc::new(store.clone()), settings.cache.clone());
    let engine = FlagEngine::new(Arc::new(registry), cache);

    let mut result = ClassifyRun {
        readings: Vec::with_capacity(readings.len()),
        skipped: Vec::new(),
    };
    for reading in readings {
        match engine.classify(reading).await {
            Ok(classified) => {
                store.insert_reading(&classified).await?;
                result.readings.push(classified);
            },
            Err(e) if e.is_input_shape() => {
                warn!("Reading skipped: {}", e);
                result.skipped.push(e.to_string());
            },
            Err(e) => return Err(e.into()),
        }
    }

    engine.cache().flush_backfills().await;
    debug!("Cache stats after run: {:?}", engine.cache().stats());
    Ok(result)
}

pub(crate) fn display_value(reading: &Reading) -> String {
    match &reading.stats {
        Statistics::Instant { value } => format!("{:.3}", value),
        Statistics::Interval(stats) => format!("{:.3}", stats.avg),
        Statistics::Empty => "-".to_string(),
    }
}
