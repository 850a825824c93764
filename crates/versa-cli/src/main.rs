//! `versa` — provision versioned tables and drive mutations against them.
//!
//! # Usage
//!
//! ```
//! versa provision --schema sample.json --table orders
//! versa apply --schema sample.json --script changes.json --table orders
//! versa history --schema sample.json --table orders --id a1
//! versa demo --in-memory
//! ```
//!
//! Settings come from `versa.toml` (or `--config`) and `VERSA_*` environment
//! variables.

mod demo;
mod script;
mod settings;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use versa_core::{
  batch::apply_batch,
  provision::provision,
  schema::{DataSample, Identifier, LogicalType},
  store::VersionedStore,
  table::VersionedTable,
  value::Value,
};
use versa_store_sqlite::SqliteStore;

use crate::settings::Settings;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "versa", author, version, about = "Schema-driven table versioning")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "versa.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the primary table, its history table and triggers.
  Provision {
    #[command(flatten)]
    target: Target,
  },
  /// Run a JSON mutation script and print the batch report.
  Apply {
    #[command(flatten)]
    target: Target,
    #[arg(long, value_name = "FILE")]
    script: PathBuf,
  },
  /// Print every historic row for one identity.
  History {
    #[command(flatten)]
    target: Target,
    #[arg(long)]
    id:     String,
  },
  /// Provision a sample table and run a short insert/update/delete sequence.
  Demo {
    /// Use a throwaway in-memory database instead of the configured one.
    #[arg(long)]
    in_memory: bool,
  },
}

#[derive(clap::Args)]
struct Target {
  /// JSON data sample describing the source columns.
  #[arg(long, value_name = "FILE")]
  schema: PathBuf,
  /// Primary table name (default: `table` from settings).
  #[arg(long)]
  table:  Option<String>,
}

impl Target {
  fn resolve(&self, settings: &Settings) -> anyhow::Result<VersionedTable> {
    let raw = std::fs::read_to_string(&self.schema)
      .with_context(|| format!("reading schema file {}", self.schema.display()))?;
    let schema = DataSample::from_json(&raw)
      .and_then(|sample| sample.to_schema())
      .with_context(|| format!("deriving schema from {}", self.schema.display()))?;
    let name = self.table.as_deref().unwrap_or(&settings.table);
    Ok(VersionedTable::new(Identifier::new(name)?, schema)?)
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  match cli.command {
    Command::Provision { target } => {
      let table = target.resolve(&settings)?;
      let store = open(&settings.database_path).await?;
      let report = provision(&store, &table)
        .await
        .with_context(|| format!("provisioning {}", table.name()))?;
      print_json(&report)
    }

    Command::Apply { target, script } => {
      let table = target.resolve(&settings)?;
      let raw = std::fs::read_to_string(&script)
        .with_context(|| format!("reading script file {}", script.display()))?;
      let statements = script::compile(&raw, &table)
        .with_context(|| format!("compiling {}", script.display()))?;

      let store = open(&settings.database_path).await?;
      let report = apply_batch(&store, &statements).await;
      print_json(&report)?;
      report.into_result().context("batch halted")?;
      Ok(())
    }

    Command::History { target, id } => {
      let table = target.resolve(&settings)?;
      let id = parse_identity(&table, &id)?;
      let store = open(&settings.database_path).await?;
      let rows = store.history(&table, &id).await?;
      print_json(&rows)
    }

    Command::Demo { in_memory } => {
      let store = if in_memory {
        SqliteStore::open_in_memory().await?
      } else {
        open(&settings.database_path).await?
      };
      let name = Identifier::new(settings.table.as_str())?;
      let rows = demo::run(&store, name).await?;
      print_json(&rows)
    }
  }
}

async fn open(path: &Path) -> anyhow::Result<SqliteStore> {
  SqliteStore::open(path)
    .await
    .with_context(|| format!("failed to open store at {path:?}"))
}

/// Command-line identities arrive as text; integer identities are parsed.
fn parse_identity(table: &VersionedTable, raw: &str) -> anyhow::Result<Value> {
  match table.schema().identity().ty {
    LogicalType::Integer => Ok(Value::Integer(
      raw.parse().with_context(|| format!("identity {raw:?} is not an integer"))?,
    )),
    _ => Ok(Value::from(raw)),
  }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
