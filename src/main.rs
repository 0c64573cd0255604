//! sqlrest command line
//!
//! Builds schema snapshots from store metadata and compiles requests into the
//! SQL statements the compiler would send to a store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use sqlrest::common::config::SqlRestConfig;
use sqlrest::query::cache::{load_snapshot, persist_snapshot};
use sqlrest::query::{
    build_snapshot, ColumnDefinition, CompiledStatement, Database, MemoryStore, QueryCompiler,
    RawSchema, RequestParams, TableChanges,
};

#[derive(Parser, Debug)]
#[command(name = "sqlrest")]
#[command(about = "REST-style query compiler for SQLite-compatible stores")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "sqlrest.toml")]
    config: PathBuf,

    /// Log level, overrides the configuration file
    #[arg(short, long, env = "SQLREST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a schema snapshot from exported store metadata and persist it
    Snapshot {
        /// JSON file holding the store's columns and foreign keys
        #[arg(short, long)]
        schema: PathBuf,
    },
    /// Compile one request and print the statement(s) as JSON
    Compile {
        /// Target table
        #[arg(short, long)]
        table: String,

        #[arg(short, long, value_enum, default_value_t = Method::Get)]
        method: Method,

        /// Query string, e.g. `select=id,posts(title)&id=eq.1`
        #[arg(short, long, default_value = "")]
        query: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,

        /// Compile against this metadata file instead of the persisted snapshot
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    Get,
    Post,
    Upsert,
    Patch,
    Delete,
    Create,
    Alter,
    Drop,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config: SqlRestConfig = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        toml::from_str(&content)?
    } else {
        SqlRestConfig::default()
    };

    init_tracing(&config, args.log_level.as_deref());

    info!("sqlrest v{}", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        info!("Using default configuration");
    }

    let outcome = match args.command {
        Command::Snapshot { schema } => snapshot(&config, &schema),
        Command::Compile {
            table,
            method,
            query,
            body,
            schema,
        } => compile(&config, schema.as_deref(), &table, method, &query, body.as_deref()),
    };

    if let Err(e) = &outcome {
        error!("Command failed: {:#}", e);
    }
    outcome
}

fn init_tracing(config: &SqlRestConfig, level: Option<&str>) {
    let level = level.unwrap_or(config.logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = if config.logging.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

fn read_raw_schema(path: &Path) -> anyhow::Result<RawSchema> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn snapshot(config: &SqlRestConfig, schema: &Path) -> anyhow::Result<()> {
    let raw = read_raw_schema(schema)?;
    let snapshot = build_snapshot(&raw)?;
    persist_snapshot(&config.cache.snapshot_path, &snapshot)?;

    info!(
        tables = snapshot.table_count(),
        path = %config.cache.snapshot_path.display(),
        "Schema snapshot written"
    );
    Ok(())
}

fn compile(
    config: &SqlRestConfig,
    schema: Option<&Path>,
    table: &str,
    method: Method,
    query: &str,
    body: Option<&str>,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    let store = match schema {
        Some(path) => {
            config.cache.persist = false;
            MemoryStore::new(read_raw_schema(path)?)
        }
        None => {
            if load_snapshot(&config.cache.snapshot_path)?.is_none() {
                bail!(
                    "no schema snapshot at {}; run `sqlrest snapshot` first or pass --schema",
                    config.cache.snapshot_path.display()
                );
            }
            MemoryStore::default()
        }
    };

    let db = Database::open(Arc::new(store), &config)?;
    let params = RequestParams::parse(query);
    let body: Option<JsonValue> = body.map(serde_json::from_str).transpose()?;
    let require_body = || body.as_ref().context("this method needs --body");

    let statements: Vec<CompiledStatement> = match method {
        Method::Get => vec![db.compile_select(table, &params)?],
        Method::Post => vec![db.compile_insert(table, &params, require_body()?)?],
        Method::Upsert => vec![db.compile_upsert(table, &params, require_body()?)?],
        Method::Patch => vec![db.compile_update(table, &params, require_body()?)?],
        Method::Delete => vec![db.compile_delete(table, &params)?],
        Method::Create => {
            let columns: BTreeMap<String, ColumnDefinition> =
                serde_json::from_value(require_body()?.clone())?;
            let snapshot = db.snapshot();
            vec![QueryCompiler::new(&snapshot).create_table(table, &columns)?]
        }
        Method::Alter => {
            let changes: TableChanges = serde_json::from_value(require_body()?.clone())?;
            let snapshot = db.snapshot();
            QueryCompiler::new(&snapshot).alter_table(table, &changes)?
        }
        Method::Drop => {
            let snapshot = db.snapshot();
            vec![QueryCompiler::new(&snapshot).drop_table(table)?]
        }
    };

    let output = match statements.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    println!("{output}");
    Ok(())
}
