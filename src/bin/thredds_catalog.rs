//! thredds-catalog: inspect the catalogs a Hyrax THREDDS service would serve.
//!
//! ## Example Usage
//!
//! ```bash
//! # Processed root catalog
//! thredds-catalog --content-path ./content --bes-root /data show thredds/catalog.xml
//!
//! # Raw BES-derived catalog for a datasetScan directory
//! thredds-catalog --config hyrax.json show thredds/data/sst/catalog.xml --raw
//!
//! # Registered keys and the catalog graph
//! thredds-catalog --config hyrax.json keys
//! thredds-catalog --config hyrax.json tree
//!
//! # Cache statistics after resolving some paths
//! thredds-catalog --config hyrax.json stats thredds/data/catalog.xml --json
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use hyrax_thredds::thredds_cache::Catalog;
use hyrax_thredds::{CatalogService, CatalogServiceConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "thredds-catalog", author, version, about)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the root catalog (overrides the config file).
    #[arg(long, value_name = "DIR")]
    content_path: Option<PathBuf>,

    /// Directory served by the BES provider (overrides the config file).
    #[arg(long, value_name = "DIR")]
    bes_root: Option<PathBuf>,

    /// URL prefix of catalog keys (overrides the config file).
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Read static catalogs from disk on every access.
    #[arg(long)]
    no_memory_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a catalog document.
    Show {
        /// Request path or catalog key (e.g. thredds/data/catalog.xml).
        path: String,
        /// Print the document before ingest processing.
        #[arg(long)]
        raw: bool,
    },
    /// List registered catalog keys.
    Keys,
    /// Print the catalog graph.
    Tree,
    /// Resolve the given paths, then print cache statistics.
    Stats {
        paths: Vec<String>,
        /// Emit JSON instead of a report.
        #[arg(long)]
        json: bool,
    },
    /// Rebuild a catalog in place and print its digest before and after.
    Reload { path: String },
}

impl Cli {
    fn service_config(&self) -> Result<CatalogServiceConfig> {
        let mut config = CatalogServiceConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.content_path {
            config.content_path = path.clone();
        }
        if let Some(root) = &self.bes_root {
            config.bes_root = root.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.thredds_prefix = prefix.clone();
        }
        if self.no_memory_cache {
            config.use_memory_cache = false;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let service = CatalogService::init(cli.service_config()?)?;
    let result = run(&service, cli.command);
    service.shutdown();
    result
}

fn run(service: &CatalogService, command: Command) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Show { path, raw } => {
            if !service.write_catalog(&path, raw, &mut out)? {
                return Err(anyhow!("No catalog for '{}'", path));
            }
            writeln!(out)?;
        }
        Command::Keys => {
            for key in service.manager().keys() {
                writeln!(out, "{}", key)?;
            }
        }
        Command::Tree => {
            write!(out, "{}", service.manager().tree())?;
        }
        Command::Stats { paths, json } => {
            for path in &paths {
                if let Err(e) = service.lookup(path) {
                    eprintln!("{}: {:#}", path, e);
                }
            }
            let snapshot = service.manager().metrics().snapshot();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&snapshot)?)?;
            } else {
                write!(out, "{}", snapshot.format_report())?;
            }
        }
        Command::Reload { path } => {
            let catalog = service
                .lookup(&path)?
                .ok_or_else(|| anyhow!("No catalog for '{}'", path))?;
            let before = catalog.content_digest()?;
            service.manager().reload_catalog(catalog.catalog_key())?;
            let after = catalog.content_digest()?;
            writeln!(out, "{}", catalog.catalog_key())?;
            writeln!(out, "  before: {}", before)?;
            writeln!(out, "  after:  {}", after)?;
        }
    }
    Ok(())
}
