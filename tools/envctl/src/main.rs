//! envctl - operator tool for envmon
//!
//! Checks region expressions, validates flag configuration documents,
//! classifies reading files against a SQLite store and prints the freshest
//! cached readings.

mod catalog;
mod classify;
mod latest;
mod region;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use envmon_model::{Granularity, StationId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "envctl")]
#[command(about = "Environmental monitoring flag and cache tool")]
#[command(long_about = "Environmental monitoring flag and cache tool

Examples:
  envctl region '>=10,<=20;=0' 15 25 0          # Evaluate a region expression
  envctl catalog validate flags.yaml            # Validate catalogs and rules
  envctl classify --db data.db --rules flags.yaml --input readings.json
  envctl latest --db data.db --tenant site-a --granularity hourly 1001 1002")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Tool configuration file (YAML/TOML/JSON); ENVMON_* variables override it
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate values against a region expression
    Region {
        /// Expression such as ">=10,<=20;=0"
        expr: String,

        /// Values to test
        #[arg(allow_negative_numbers = true)]
        values: Vec<f64>,
    },

    /// Flag catalog documents
    Catalog {
        #[command(subcommand)]
        command: catalog::CatalogCommands,
    },

    /// Classify readings from a JSON file and store them
    Classify {
        /// SQLite database (created if missing)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Flag configuration document
        #[arg(short, long)]
        rules: PathBuf,

        /// JSON array of readings
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the freshest reading per factor
    Latest {
        /// SQLite database
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(short, long)]
        tenant: String,

        /// realtime, 10min, hourly or daily
        #[arg(short, long, default_value = "realtime")]
        granularity: Granularity,

        /// Station ids
        #[arg(required = true)]
        stations: Vec<StationId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut settings = settings::EnvctlSettings::load(cli.config.as_deref())?;
    if cli.verbose {
        settings.log.level = "debug".to_string();
    }
    settings.log.ansi &= !cli.no_color;
    common::logging::init_with_config(settings.log.clone()).context("initialize logging")?;

    match cli.command {
        Commands::Region { expr, values } => region::handle_command(&expr, &values),
        Commands::Catalog { command } => catalog::handle_command(command),
        Commands::Classify { db, rules, input } => {
            let db = settings.database_path(db)?;
            classify::handle_command(&settings, &db, &rules, &input).await
        },
        Commands::Latest {
            db,
            tenant,
            granularity,
            stations,
        } => {
            let db = settings.database_path(db)?;
            latest::handle_command(&settings, &db, &tenant, granularity, &stations).await
        },
    }
}
