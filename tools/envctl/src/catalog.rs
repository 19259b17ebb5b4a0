//! `envctl catalog`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use envmon_flags::{ConfigDocument, TenantConfigRegistry};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Validate every tenant catalog and rule in a document
    Validate {
        /// YAML configuration document
        file: PathBuf,
    },

    /// Print catalogs in evaluation order with their rules
    Show {
        /// YAML configuration document
        file: PathBuf,

        /// Only this tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },
}

pub fn handle_command(cmd: CatalogCommands) -> Result<()> {
    match cmd {
        CatalogCommands::Validate { file } => validate(&file),
        CatalogCommands::Show { file, tenant } => show(&file, tenant.as_deref()),
    }
}

/// Validate tenant by tenant so one bad tenant does not hide the others
fn validate(file: &Path) -> Result<()> {
    let document = read_document(file)?;
    let mut failures = 0;

    for tenant in &document.tenants {
        match tenant.build() {
            Ok((catalog, rules)) => println!(
                "{} {}: {} flags, {} rules",
                "[OK]".green(),
                tenant.tenant,
                catalog.len(),
                rules.len()
            ),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "[FAIL]".red(), tenant.tenant, e);
            },
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} tenants invalid", failures, document.tenants.len());
    }
    Ok(())
}

fn show(file: &Path, only: Option<&str>) -> Result<()> {
    let registry = TenantConfigRegistry::from_yaml_file(file)?;

    for tenant in registry.tenants() {
        if only.is_some_and(|t| t != tenant) {
            continue;
        }
        let Some(config) = registry.snapshot(&tenant) else {
            continue;
        };

        println!("{}", tenant.bold());
        for (idx, def) in config.catalog().iter().enumerate() {
            let effects: Vec<&str> = def.effect.names().collect();
            println!(
                "  {:>2}. {:<12} {:<24} {}",
                idx + 1,
                def.name.cyan(),
                def.label,
                effects.join("|").dimmed()
            );
        }

        let mut rules: Vec<_> = config.rules().collect();
        rules.sort_by(|a, b| (a.station, a.factor, &a.flag).cmp(&(b.station, b.factor, &b.flag)));
        for rule in rules {
            let scope = if rule.is_tenant_wide() {
                "*".to_string()
            } else {
                rule.station.to_string()
            };
            println!(
                "      station {:<6} factor {:<6} {:<12} {}",
                scope,
                rule.factor,
                rule.flag,
                rule.expression()
            );
        }
    }
    Ok(())
}

fn read_document(file: &Path) -> Result<ConfigDocument> {
    let yaml = std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    ConfigDocument::from_yaml_str(&yaml).with_context(|| format!("parse {}", file.display()))
}
