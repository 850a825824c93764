//! [`SqliteDialect`]: renders the statement IR as SQLite SQL.
//!
//! Trigger bodies reference only validated identifiers and the protocol's own
//! constants; row values always travel as `?N` parameters.

use versa_core::{
  protocol::{
    DUPLICATE_IDENTITY, IDENTITY_IMMUTABLE, TIMESTAMP_COLUMN, VALIDITY_COLUMN,
  },
  schema::{Identifier, LogicalType},
  statement::{
    ColumnDef, CreateIndex, CreateTable, Delete, Dialect, Event, Image, Insert, Key,
    Rendered, Statement, Trigger, TriggerAction, Update,
  },
  value::Value,
};

/// Millisecond-precision RFC 3339 `now`, matching
/// [`versa_core::value::format_timestamp`]. Stable within one statement.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
  pub fn quote(&self, ident: &Identifier) -> String { format!("\"{ident}\"") }

  fn column_list<'a>(&self, columns: impl IntoIterator<Item = &'a Identifier>) -> String {
    columns
      .into_iter()
      .map(|c| self.quote(c))
      .collect::<Vec<_>>()
      .join(", ")
  }

  pub fn native_type(&self, ty: LogicalType) -> &'static str {
    match ty {
      LogicalType::Integer => "INTEGER",
      LogicalType::Real => "REAL",
      LogicalType::Text => "TEXT",
      LogicalType::Timestamp => "TIMESTAMP",
    }
  }

  /// A literal for DDL `DEFAULT` clauses.
  fn literal(&self, value: &Value) -> String {
    match value {
      Value::Null => "NULL".into(),
      Value::Integer(i) => i.to_string(),
      Value::Real(f) => format!("{f:?}"),
      Value::Text(s) => string_literal(s),
      Value::Timestamp(ts) => string_literal(&versa_core::value::format_timestamp(*ts)),
    }
  }

  fn column_def(&self, column: &ColumnDef) -> String {
    let mut def = format!("{} {}", self.quote(&column.name), self.native_type(column.ty));
    if column.not_null {
      def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
      def.push_str(" DEFAULT ");
      def.push_str(&self.literal(default));
    }
    def
  }

  fn create_table(&self, stmt: &CreateTable) -> String {
    let columns = stmt
      .columns
      .iter()
      .map(|c| self.column_def(c))
      .collect::<Vec<_>>()
      .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({columns})", self.quote(&stmt.name))
  }

  fn create_index(&self, stmt: &CreateIndex) -> String {
    format!(
      "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
      self.quote(&stmt.name),
      self.quote(&stmt.table),
      self.column_list(&stmt.columns),
    )
  }

  fn create_trigger(&self, trigger: &Trigger) -> String {
    let event = match &trigger.event {
      Event::Insert => "INSERT".to_owned(),
      Event::Update { of: None } => "UPDATE".to_owned(),
      Event::Update { of: Some(column) } => format!("UPDATE OF {}", self.quote(column)),
      Event::Delete => "DELETE".to_owned(),
    };
    let (when, body) = self.trigger_body(&trigger.table, &trigger.action);
    let when = when.map(|w| format!(" WHEN {w}")).unwrap_or_default();

    format!(
      "CREATE TRIGGER IF NOT EXISTS {name} {timing} {event} ON {table} FOR EACH ROW{when} \
       BEGIN {body}; END",
      name = self.quote(&trigger.name),
      timing = trigger.timing,
      table = self.quote(&trigger.table),
    )
  }

  /// Optional `WHEN` condition and the single body statement.
  fn trigger_body(&self, table: &Identifier, action: &TriggerAction) -> (Option<String>, String) {
    match action {
      TriggerAction::RejectExistingIdentity { history, identity } => {
        let id = self.quote(identity);
        (
          Some(format!(
            "EXISTS (SELECT 1 FROM {} WHERE {id} = NEW.{id})",
            self.quote(history)
          )),
          format!("SELECT RAISE(ABORT, {})", string_literal(DUPLICATE_IDENTITY)),
        )
      }

      TriggerAction::RejectIdentityChange { identity } => {
        let id = self.quote(identity);
        (
          Some(format!("NEW.{id} IS NOT OLD.{id}")),
          format!("SELECT RAISE(ABORT, {})", string_literal(IDENTITY_IMMUTABLE)),
        )
      }

      TriggerAction::Mirror { history, columns, image, operation } => {
        let prefix = match image {
          Image::New => "NEW",
          Image::Old => "OLD",
        };
        let values = columns
          .iter()
          .map(|c| format!("{prefix}.{}", self.quote(c)))
          .collect::<Vec<_>>()
          .join(", ");
        (
          None,
          format!(
            "INSERT INTO {} ({}, \"{TIMESTAMP_COLUMN}\", \"operation\") \
             VALUES ({values}, {NOW}, {})",
            self.quote(history),
            self.column_list(columns),
            string_literal(operation.as_ref()),
          ),
        )
      }

      // Winner: latest timestamp, then latest rowid (append order).
      TriggerAction::RecomputeValidity { identity } => {
        let t = self.quote(table);
        let id = self.quote(identity);
        (
          None,
          format!(
            "UPDATE {t} SET \"{VALIDITY_COLUMN}\" = CASE WHEN rowid = (\
               SELECT rowid FROM {t} WHERE {id} = NEW.{id} \
               ORDER BY \"{TIMESTAMP_COLUMN}\" DESC, rowid DESC LIMIT 1\
             ) THEN 1 ELSE 0 END \
             WHERE {id} = NEW.{id}"
          ),
        )
      }
    }
  }

  fn insert(&self, stmt: &Insert) -> Rendered {
    let width = stmt.columns.len();
    let mut params = Vec::with_capacity(width * stmt.rows.len());
    let mut tuples = Vec::with_capacity(stmt.rows.len());

    for row in &stmt.rows {
      let placeholders = row
        .iter()
        .map(|value| {
          params.push(value.clone());
          format!("?{}", params.len())
        })
        .collect::<Vec<_>>()
        .join(", ");
      tuples.push(format!("({placeholders})"));
    }

    Rendered {
      sql: format!(
        "INSERT INTO {} ({}) VALUES {}",
        self.quote(&stmt.table),
        self.column_list(&stmt.columns),
        tuples.join(", "),
      ),
      params,
    }
  }

  fn update(&self, stmt: &Update) -> Rendered {
    let mut params = Vec::with_capacity(stmt.assignments.len() + 1);
    let assignments = stmt
      .assignments
      .iter()
      .map(|(column, value)| {
        params.push(value.clone());
        format!("{} = ?{}", self.quote(column), params.len())
      })
      .collect::<Vec<_>>()
      .join(", ");
    let filter = self.key_filter(&stmt.key, &mut params);

    Rendered {
      sql: format!("UPDATE {} SET {assignments} WHERE {filter}", self.quote(&stmt.table)),
      params,
    }
  }

  fn delete(&self, stmt: &Delete) -> Rendered {
    let mut params = Vec::with_capacity(1);
    let filter = self.key_filter(&stmt.key, &mut params);
    Rendered {
      sql: format!("DELETE FROM {} WHERE {filter}", self.quote(&stmt.table)),
      params,
    }
  }

  fn key_filter(&self, key: &Key, params: &mut Vec<Value>) -> String {
    params.push(key.value.clone());
    format!("{} = ?{}", self.quote(&key.column), params.len())
  }
}

impl Dialect for SqliteDialect {
  fn name(&self) -> &'static str { "sqlite" }

  fn render(&self, statement: &Statement) -> Rendered {
    let ddl = |sql| Rendered { sql, params: vec![] };
    match statement {
      Statement::CreateTable(s) => ddl(self.create_table(s)),
      Statement::CreateIndex(s) => ddl(self.create_index(s)),
      Statement::CreateTrigger(s) => ddl(self.create_trigger(s)),
      Statement::Insert(s) => self.insert(s),
      Statement::Update(s) => self.update(s),
      Statement::Delete(s) => self.delete(s),
    }
  }
}

fn string_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

#[cfg(test)]
mod tests {
  use versa_core::{
    provision::plan,
    schema::derive_schema,
    table::VersionedTable,
    value::Record,
  };

  use super::*;

  fn table() -> VersionedTable {
    let schema = derive_schema([("id", "object"), ("amount", "float64")]).unwrap();
    VersionedTable::new(Identifier::new("ledger").unwrap(), schema).unwrap()
  }

  fn render_plan() -> Vec<String> {
    plan(&table())
      .iter()
      .map(|s| SqliteDialect.render(s).sql)
      .collect()
  }

  #[test]
  fn history_table_ddl() {
    assert_eq!(
      render_plan()[1],
      "CREATE TABLE IF NOT EXISTS \"ledger_history\" (\"id\" TEXT NOT NULL, \"amount\" REAL, \
       \"timestamp\" TIMESTAMP, \"operation\" TEXT, \"validity\" INTEGER DEFAULT 0)"
    );
  }

  #[test]
  fn guard_trigger_raises_protocol_message() {
    let sql = &render_plan()[2];
    assert!(sql.starts_with(
      "CREATE TRIGGER IF NOT EXISTS \"ledger_guard\" BEFORE INSERT ON \"ledger\""
    ));
    assert!(sql.contains("WHEN EXISTS (SELECT 1 FROM \"ledger_history\" WHERE \"id\" = NEW.\"id\")"));
    assert!(sql.contains("RAISE(ABORT, 'duplicate identity')"));
  }

  #[test]
  fn delete_mirror_copies_old_image() {
    let sql = &render_plan()[5];
    assert!(sql.contains("BEFORE DELETE ON \"ledger\""));
    assert!(sql.contains("VALUES (OLD.\"id\", OLD.\"amount\", strftime("));
    assert!(sql.contains("'DELETE')"));
  }

  #[test]
  fn identity_freeze_is_column_scoped() {
    let sql = &render_plan()[7];
    assert!(sql.contains("BEFORE UPDATE OF \"id\" ON \"ledger\""));
    assert!(sql.contains("WHEN NEW.\"id\" IS NOT OLD.\"id\""));
  }

  #[test]
  fn multi_row_insert_numbers_parameters() {
    let stmt = table()
      .insert_many([
        Record::new().with("id", "a").with("amount", 1.0),
        Record::new().with("id", "b"),
      ])
      .unwrap();
    let rendered = SqliteDialect.render(&stmt);
    assert_eq!(
      rendered.sql,
      "INSERT INTO \"ledger\" (\"id\", \"amount\") VALUES (?1, ?2), (?3, ?4)"
    );
    assert_eq!(
      rendered.params,
      vec![Value::from("a"), Value::Real(1.0), Value::from("b"), Value::Null]
    );
  }

  #[test]
  fn update_binds_values_and_key() {
    let stmt = table()
      .update("it's", Record::new().with("amount", 2.5))
      .unwrap();
    let rendered = SqliteDialect.render(&stmt);
    assert_eq!(rendered.sql, "UPDATE \"ledger\" SET \"amount\" = ?1 WHERE \"id\" = ?2");
    assert_eq!(rendered.params, vec![Value::Real(2.5), Value::from("it's")]);
  }

  #[test]
  fn dialect_is_named_for_logging() {
    assert_eq!(SqliteDialect.name(), "sqlite");
  }

  #[test]
  fn string_literals_are_escaped() {
    assert_eq!(string_literal("it's"), "'it''s'");
  }
}
