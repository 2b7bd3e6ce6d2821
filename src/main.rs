//! Dataport command-line client
//!
//! Runs a read operation against the configured backend and prints the
//! resulting envelope as JSON.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dataport::common::types::{Pagination, SortCondition};
use dataport::{connect, DataportConfig, InMemorySessionStore, QueryFilter, QueryParams};

#[derive(Parser, Debug)]
#[command(name = "dataport")]
#[command(author, version, about = "Query a data backend through a dataport adapter", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dataport.toml", env = "DATAPORT_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch matching records
    Fetch(QueryArgs),

    /// Fetch one page of records with pagination metadata
    FetchMany(QueryArgs),

    /// Count matching records
    Count {
        resource: String,

        /// Filter tree as JSON, e.g. '{"status":"active"}'
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    resource: String,

    /// Filter tree as JSON, e.g. '{"views":{"operator":"gt","value":10}}'
    #[arg(long)]
    filter: Option<String>,

    /// Sort key as field:asc or field:desc, repeatable
    #[arg(long)]
    sort: Vec<String>,

    /// Relation path to include, repeatable
    #[arg(long)]
    include: Vec<String>,

    /// Field to select, repeatable
    #[arg(long)]
    field: Vec<String>,

    /// Page number, 1-indexed
    #[arg(long, requires = "per_page")]
    page: Option<u64>,

    #[arg(long)]
    per_page: Option<u64>,
}

impl QueryArgs {
    fn to_params(&self) -> Result<QueryParams> {
        let mut params = QueryParams::new();
        if let Some(filter) = parse_filter(self.filter.as_deref())? {
            params = params.filter(filter);
        }
        for sort in &self.sort {
            params = params.sort(parse_sort(sort)?);
        }
        for path in &self.include {
            params = params.include(path.clone());
        }
        for field in &self.field {
            params = params.field(field.clone());
        }
        if let Some(per_page) = self.per_page {
            params = params.paginate(Pagination::new(self.page.unwrap_or(1), per_page));
        }
        Ok(params)
    }
}

fn parse_filter(raw: Option<&str>) -> Result<Option<QueryFilter>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw).context("--filter is not valid JSON")?;
    Ok(Some(QueryFilter::from_json(&value)?))
}

fn parse_sort(raw: &str) -> Result<SortCondition> {
    let (field, order) = raw.split_once(':').unwrap_or((raw, "asc"));
    if field.is_empty() {
        bail!("sort key '{raw}' has no field");
    }
    match order.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortCondition::asc(field)),
        "desc" => Ok(SortCondition::desc(field)),
        other => Err(anyhow!("unknown sort order '{other}', expected asc or desc")),
    }
}

fn load_config(path: &Path) -> Result<DataportConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    } else {
        info!("Using default configuration");
        Ok(DataportConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let config = load_config(&cli.config)?;
    let adapter = connect(&config, Arc::new(InMemorySessionStore::new()))?;
    debug!(backend = ?config.backend, "adapter ready");

    let response = match &cli.command {
        Commands::Fetch(args) => adapter.fetch(&args.resource, &args.to_params()?).await?,
        Commands::FetchMany(args) => adapter.fetch_many(&args.resource, &args.to_params()?).await?,
        Commands::Count { resource, filter } => {
            let filter = parse_filter(filter.as_deref())?;
            adapter.count(resource, filter.as_ref()).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
