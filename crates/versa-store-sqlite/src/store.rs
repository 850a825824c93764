//! [`SqliteStore`] — the SQLite implementation of [`VersionedStore`].

use std::path::Path;

use versa_core::{
  protocol::HistoricRow,
  schema::Identifier,
  statement::{ColumnDef, Dialect as _, Statement},
  store::VersionedStore,
  table::VersionedTable,
  value::{Record, Value},
};

use crate::{
  Error, Result,
  dialect::SqliteDialect,
  encode::{RawRow, encode_value},
};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A versioned-table store backed by a single SQLite file.
///
/// Cloning is cheap; clones share one connection thread. SQLite runs
/// each statement and the triggers it fires atomically, which is all the
/// engine asks of a store.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  dialect: SqliteDialect,
}

impl SqliteStore {
  /// Open (or create) a store at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, dialect: SqliteDialect };
    store.init().await?;
    Ok(store)
  }

  /// Open a private in-memory database, for tests and throwaway runs.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, dialect: SqliteDialect };
    store.init().await?;
    Ok(store)
  }

  async fn init(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Close the connection. Clones of this store fail with
  /// [`FailureKind::StoreUnavailable`](versa_core::batch::FailureKind) from
  /// then on.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  /// Run one ad hoc SQL statement without parameters.
  ///
  /// Triggers fire exactly as they do for rendered statements, so edits made
  /// this way are versioned too.
  pub async fn execute_raw(&self, sql: impl Into<String>) -> Result<u64> {
    let sql = sql.into();
    tracing::debug!(%sql, "executing raw statement");
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, [])?))
      .await?;
    Ok(changed as u64)
  }

  /// Names of user tables, sorted.
  pub async fn tables(&self) -> Result<Vec<String>> { self.schema_objects("table").await }

  /// Names of triggers, sorted.
  pub async fn triggers(&self) -> Result<Vec<String>> {
    self.schema_objects("trigger").await
  }

  async fn schema_objects(&self, kind: &'static str) -> Result<Vec<String>> {
    let names = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT name FROM sqlite_master
           WHERE type = ?1 AND name NOT LIKE 'sqlite_%'
           ORDER BY name",
        )?;
        let names = stmt
          .query_map([kind], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
      })
      .await?;
    Ok(names)
  }

  pub async fn row_count(&self, table: &Identifier) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote(table));
    let count: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
      .await?;
    Ok(count as u64)
  }

  /// `SELECT rowid, <columns> FROM <table> WHERE <identity> = ?1 ORDER BY rowid`
  async fn select_by_identity(
    &self,
    table: &Identifier,
    columns: &[ColumnDef],
    identity: &Identifier,
    id: Value,
  ) -> Result<Vec<RawRow>> {
    let list = columns
      .iter()
      .map(|c| self.dialect.quote(&c.name))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "SELECT rowid, {list} FROM {} WHERE {} = ?1 ORDER BY rowid",
      self.dialect.quote(table),
      self.dialect.quote(identity),
    );
    let width = columns.len();
    let id = encode_value(id);

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([id], |row| RawRow::from_row(row, width))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }
}

// ─── VersionedStore impl ─────────────────────────────────────────────────────

impl VersionedStore for SqliteStore {
  type Error = Error;

  async fn execute(&self, statement: &Statement) -> Result<u64> {
    let rendered = self.dialect.render(statement);
    tracing::debug!(
      dialect = self.dialect.name(),
      sql = %rendered.sql,
      params = rendered.params.len(),
      "executing"
    );

    let sql = rendered.sql;
    let params: Vec<_> = rendered.params.into_iter().map(encode_value).collect();
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?))
      .await?;

    // sqlite3_changes() keeps the last DML count across DDL.
    Ok(if statement.is_ddl() { 0 } else { changed as u64 })
  }

  async fn history(&self, table: &VersionedTable, id: &Value) -> Result<Vec<HistoricRow>> {
    let id = table.identity_value(id.clone())?;
    let columns = table.history_columns();
    self
      .select_by_identity(table.history(), &columns, table.identity(), id)
      .await?
      .into_iter()
      .map(|raw| raw.into_historic(&columns))
      .collect()
  }

  async fn current(&self, table: &VersionedTable, id: &Value) -> Result<Option<Record>> {
    let id = table.identity_value(id.clone())?;
    let columns = table.columns();
    self
      .select_by_identity(table.name(), &columns, table.identity(), id)
      .await?
      .into_iter()
      .next()
      .map(|raw| raw.into_record(&columns))
      .transpose()
  }
}
