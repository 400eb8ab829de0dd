use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

use crate::config::Config;
use crate::enrichment::{EnrichmentCache, GeoIpCountries, UaParserAgents};
use crate::pipeline::IngestionPipeline;

mod classifier;
mod config;
mod db;
mod enrichment;
mod error;
mod models;
mod parser;
mod pipeline;
mod record;

/// Loads identifier resolution redirects from web server access logs into SQLite
#[derive(Parser)]
#[command(name = "resolverlog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: trace, debug, info, warn, error, off (default: RUST_LOG, then info)
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<LevelFilter>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an access log
    Ingest {
        /// Access log file, or `-` to read standard input
        log_file: String,

        /// SQLite database to write to
        #[arg(short, long, value_name = "FILE", default_value = config::DEFAULT_DATABASE)]
        database: PathBuf,

        /// Maximum records to process (default: all)
        #[arg(short, long, value_name = "N")]
        max_rows: Option<usize>,

        /// MaxMind country database
        #[arg(long, value_name = "FILE", env = "RESOLVERLOG_GEO_DB", default_value = config::DEFAULT_GEO_DATABASE)]
        geo_db: PathBuf,

        /// ua-parser regexes.yaml
        #[arg(long, value_name = "FILE", env = "RESOLVERLOG_UA_REGEXES", default_value = config::DEFAULT_UA_REGEXES)]
        ua_regexes: PathBuf,

        /// Final HTTP status counted as a resolution (repeatable)
        #[arg(long = "status", value_name = "CODE")]
        statuses: Vec<u16>,

        /// Records written per batch
        #[arg(long, value_name = "N", default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Copy a database, recomputing every row id
    Rekey {
        /// Existing database
        source: PathBuf,
        /// Database to write to
        dest: PathBuf,
    },
    /// Copy a database into ClickHouse
    Export {
        /// SQLite database to read
        #[arg(short, long, value_name = "FILE", default_value = config::DEFAULT_DATABASE)]
        database: PathBuf,

        /// ClickHouse HTTP endpoint
        #[arg(long, value_name = "URL", env = "RESOLVERLOG_CLICKHOUSE_URL", default_value = config::DEFAULT_CLICKHOUSE_URL)]
        url: String,

        /// ClickHouse user
        #[arg(long, env = "RESOLVERLOG_CLICKHOUSE_USER")]
        user: Option<String>,

        /// ClickHouse password
        #[arg(long, env = "RESOLVERLOG_CLICKHOUSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Destination table
        #[arg(long, value_name = "TABLE", default_value = config::DEFAULT_CLICKHOUSE_TABLE)]
        table: String,

        /// Rows per insert
        #[arg(long, value_name = "N", default_value_t = config::DEFAULT_EXPORT_BATCH_SIZE)]
        batch_size: usize,
    },
}

fn init_tracing(level: Option<LevelFilter>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = match level {
        Some(level) => EnvFilter::default().add_directive(level.into()),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env()
            .context("Invalid RUST_LOG filter")?,
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level)?;

    match cli.command {
        Commands::Ingest {
            log_file,
            database,
            max_rows,
            geo_db,
            ua_regexes,
            statuses,
            batch_size,
        } => {
            let mut config = Config {
                database,
                geo_database: geo_db,
                ua_regexes,
                batch_size,
                max_records: max_rows,
                ..Config::default()
            };
            if !statuses.is_empty() {
                config.redirect_statuses = statuses;
            }
            ingest(&config, &log_file)
        }
        Commands::Rekey { source, dest } => run_rekey(&source, &dest),
        Commands::Export {
            database,
            url,
            user,
            password,
            table,
            batch_size,
        } => {
            let mut client = clickhouse::Client::default().with_url(url);
            if let Some(user) = user {
                client = client.with_user(user);
            }
            if let Some(password) = password {
                client = client.with_password(password);
            }
            run_export(&database, &client, &table, batch_size)
        }
    }
}

fn open_input(log_file: &str) -> Result<Box<dyn BufRead>> {
    if log_file == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(log_file).with_context(|| format!("Failed to open log {}", log_file))?;
    Ok(Box::new(BufReader::new(file)))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn ingest(config: &Config, log_file: &str) -> Result<()> {
    let countries = GeoIpCountries::open(&config.geo_database).with_context(|| {
        format!(
            "Failed to open geo database {}",
            config.geo_database.display()
        )
    })?;
    let agents = UaParserAgents::open(&config.ua_regexes)?;

    ensure_parent_dir(&config.database)?;
    let pool = db::init(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let mut con = pool.get()?;

    let entries = parser::entries(open_input(log_file)?);

    let mut pipeline = IngestionPipeline::new(config, EnrichmentCache::new(countries, agents));
    let summary = pipeline
        .run(&mut con, entries)
        .with_context(|| format!("Failed to ingest {}", log_file))?;

    debug!(
        hosts = pipeline.enrichment().cached_hosts(),
        user_agents = pipeline.enrichment().cached_user_agents(),
        "enrichment cache size"
    );
    info!(
        entries = summary.entries,
        processed = summary.processed,
        inserted = summary.stored.inserted,
        duplicates = summary.stored.duplicates,
        older_than_watermark = summary.older_than_watermark,
        capped = summary.capped,
        "Processed {} rows",
        summary.processed
    );
    info!("{} rows stored in {}", db::count_rows(&con)?, config.database.display());
    Ok(())
}

fn run_rekey(source: &Path, dest: &Path) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("Database {} does not exist", source.display());
    }
    let src_pool = db::init(source)
        .with_context(|| format!("Failed to open database {}", source.display()))?;
    ensure_parent_dir(dest)?;
    let dest_pool =
        db::init(dest).with_context(|| format!("Failed to open database {}", dest.display()))?;

    let src = src_pool.get()?;
    let mut dest = dest_pool.get()?;
    let summary = db::rekey(&src, &mut dest, config::DEFAULT_BATCH_SIZE)?;
    info!(
        "{} rows processed, {} written",
        summary.read, summary.written.inserted
    );
    Ok(())
}

fn run_export(database: &Path, client: &clickhouse::Client, table: &str, batch_size: usize) -> Result<()> {
    if !database.exists() {
        anyhow::bail!("Database {} does not exist", database.display());
    }
    let pool = db::init(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let con = pool.get()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let exported = db::export(&con, client, table, batch_size, &runtime)
        .with_context(|| format!("Failed to export to {}", table))?;
    info!("Inserted {} rows into {}", exported, table);
    Ok(())
}
