//! Runtime settings: an optional TOML file overlaid with `VERSA_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// SQLite database file. A leading `~/` is expanded.
  pub database_path: PathBuf,
  /// Primary table used when a command has no `--table`.
  pub table:         String,
}

impl Default for Settings {
  fn default() -> Self {
    Self { database_path: PathBuf::from("versa.db"), table: "records".to_string() }
  }
}

impl Settings {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings: Settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("VERSA"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise Settings")?;

    Ok(Self { database_path: expand_tilde(&settings.database_path), ..settings })
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
