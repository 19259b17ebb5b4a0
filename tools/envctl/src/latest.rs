//! `envctl latest`

use crate::classify::display_value;
use crate::settings::EnvctlSettings;
use anyhow::Result;
use colored::*;
use envmon_cache::{RecentCache, SqliteStore, StationReadings};
use envmon_model::{Granularity, Reading, StationId};
use std::path::Path;
use std::sync::Arc;

pub async fn handle_command(
    settings: &EnvctlSettings,
    db: &Path,
    tenant: &str,
    granularity: Granularity,
    stations: &[StationId],
) -> Result<()> {
    let readings = fetch(settings, db, tenant, granularity, stations).await?;

    println!(
        "{} {} ({})",
        "Latest readings for".bold(),
        tenant.cyan(),
        granularity
    );
    for station in stations {
        let rows = sorted_rows(&readings, *station);
        if rows.is_empty() {
            println!("  station {}: {}", station, "no data".dimmed());
            continue;
        }
        println!("  station {}:", station.to_string().bold());
        for reading in rows {
            println!(
                "    factor {:<6} {:>12} {:<10} {}",
                reading.factor,
                display_value(reading),
                reading.flag,
                reading.timestamp.to_rfc3339()
            );
        }
    }
    Ok(())
}

async fn fetch(
    settings: &EnvctlSettings,
    db: &Path,
    tenant: &str,
    granularity: Granularity,
    stations: &[StationId],
) -> Result<StationReadings> {
    let store = SqliteStore::connect(db).await?;
    store.init_schema().await?;
    let cache = RecentCache::new(Arc::new(store), settings.cache.clone());
    Ok(cache.get(tenant, granularity, stations).await?)
}

fn sorted_rows(readings: &StationReadings, station: StationId) -> Vec<&Reading> {
    let mut rows: Vec<&Reading> = readings
        .get(&station)
        .map(|factors| factors.values().collect())
        .unwrap_or_default();
    rows.sort_by_key(|r| r.factor);
    rows
}
