//! [`MemoryStore`]: an in-process [`VersionedStore`] that interprets the
//! statement IR directly, trigger cascade included.
//!
//! Each statement runs against a copy of the catalog which replaces the live
//! one only if the whole cascade succeeds, giving statement-level atomicity.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  protocol::{self, EntityHistory, HistoricRow},
  schema::Identifier,
  statement::{
    ColumnDef, CreateIndex, CreateTable, Delete, Event, Image, Insert, Statement, Timing,
    Trigger, TriggerAction, Update,
  },
  store::VersionedStore,
  table::VersionedTable,
  value::{Record, Value},
};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredRow {
  seq:    i64,
  record: Record,
}

#[derive(Debug, Clone)]
struct MemTable {
  columns:  Vec<ColumnDef>,
  rows:     Vec<StoredRow>,
  next_seq: i64,
}

impl MemTable {
  fn new(columns: Vec<ColumnDef>) -> Self { Self { columns, rows: vec![], next_seq: 1 } }

  /// Fill defaults for columns `record` does not mention, in column order,
  /// and enforce `NOT NULL`.
  fn complete(&self, table: &Identifier, mut record: Record) -> Result<Record> {
    let mut full = Record::new();
    for column in &self.columns {
      let value = record
        .remove(column.name.as_str())
        .or_else(|| column.default.clone())
        .unwrap_or(Value::Null);
      if column.not_null && value.is_null() {
        return Err(Error::NotNull {
          table:  table.to_string(),
          column: column.name.to_string(),
        });
      }
      full.set(column.name.as_str(), value);
    }
    Ok(full)
  }
}

#[derive(Debug, Clone, Default)]
struct Catalog {
  tables:   HashMap<Identifier, MemTable>,
  /// In creation order.
  triggers: Vec<Trigger>,
  indexes:  Vec<CreateIndex>,
}

/// The `NEW` / `OLD` images visible to a trigger body.
struct RowContext<'a> {
  new: Option<&'a Record>,
  old: Option<&'a Record>,
}

impl RowContext<'_> {
  fn image(&self, image: Image) -> Option<&Record> {
    match image {
      Image::New => self.new,
      Image::Old => self.old,
    }
  }
}

fn column_value<'r>(record: Option<&'r Record>, column: &Identifier) -> &'r Value {
  const NULL: &Value = &Value::Null;
  record.and_then(|r| r.get(column.as_str())).unwrap_or(NULL)
}

impl Catalog {
  fn table_mut(&mut self, name: &Identifier) -> Result<&mut MemTable> {
    self
      .tables
      .get_mut(name)
      .ok_or_else(|| Error::UnknownTable(name.to_string()))
  }

  fn table(&self, name: &Identifier) -> Result<&MemTable> {
    self
      .tables
      .get(name)
      .ok_or_else(|| Error::UnknownTable(name.to_string()))
  }

  fn matching_triggers(&self, table: &Identifier, timing: Timing, kind: EventKind) -> Vec<Trigger> {
    self
      .triggers
      .iter()
      .filter(|t| &t.table == table && t.timing == timing && kind.matches(&t.event))
      .cloned()
      .collect()
  }

  // ── DDL ───────────────────────────────────────────────────────────────

  fn create_table(&mut self, stmt: &CreateTable) {
    self
      .tables
      .entry(stmt.name.clone())
      .or_insert_with(|| MemTable::new(stmt.columns.clone()));
  }

  fn create_trigger(&mut self, trigger: &Trigger) -> Result<()> {
    if self.triggers.iter().any(|t| t.name == trigger.name) {
      return Ok(());
    }
    self.table(&trigger.table)?;
    self.triggers.push(trigger.clone());
    Ok(())
  }

  fn create_index(&mut self, index: &CreateIndex) -> Result<()> {
    if self.indexes.iter().any(|i| i.name == index.name) {
      return Ok(());
    }
    let table = self.table(&index.table)?;
    for column in &index.columns {
      if !table.columns.iter().any(|c| &c.name == column) {
        return Err(Error::UnknownColumn {
          table:  index.table.to_string(),
          column: column.to_string(),
        });
      }
    }
    self.indexes.push(index.clone());
    Ok(())
  }

  // ── DML with trigger cascade ──────────────────────────────────────────

  fn insert(&mut self, stmt: &Insert, now: DateTime<Utc>) -> Result<u64> {
    for values in &stmt.rows {
      let record: Record = stmt
        .columns
        .iter()
        .map(|c| c.as_str())
        .zip(values.iter().cloned())
        .collect();
      self.insert_row(&stmt.table, record, now)?;
    }
    Ok(stmt.rows.len() as u64)
  }

  fn insert_row(&mut self, table: &Identifier, record: Record, now: DateTime<Utc>) -> Result<()> {
    let record = self.table(table)?.complete(table, record)?;
    let ctx = RowContext { new: Some(&record), old: None };

    self.fire(table, Timing::Before, EventKind::Insert, &ctx, now)?;
    let target = self.table_mut(table)?;
    let seq = target.next_seq;
    target.next_seq += 1;
    target.rows.push(StoredRow { seq, record: record.clone() });
    self.fire(table, Timing::After, EventKind::Insert, &ctx, now)
  }

  fn update(&mut self, stmt: &Update, now: DateTime<Utc>) -> Result<u64> {
    let assigned: Vec<&Identifier> = stmt.assignments.iter().map(|(c, _)| c).collect();
    let targets = self.matching_rows(&stmt.table, &stmt.key.column, &stmt.key.value)?;

    for seq in &targets {
      let old = self.row(&stmt.table, *seq)?;
      let mut new = old.clone();
      for (column, value) in &stmt.assignments {
        new.set(column.as_str(), value.clone());
      }

      let ctx = RowContext { new: Some(&new), old: Some(&old) };
      let kind = EventKind::Update(&assigned);
      self.fire(&stmt.table, Timing::Before, kind, &ctx, now)?;
      self.replace_row(&stmt.table, *seq, new.clone())?;
      self.fire(&stmt.table, Timing::After, kind, &ctx, now)?;
    }
    Ok(targets.len() as u64)
  }

  fn delete(&mut self, stmt: &Delete, now: DateTime<Utc>) -> Result<u64> {
    let targets = self.matching_rows(&stmt.table, &stmt.key.column, &stmt.key.value)?;

    for seq in &targets {
      let old = self.row(&stmt.table, *seq)?;
      let ctx = RowContext { new: None, old: Some(&old) };
      self.fire(&stmt.table, Timing::Before, EventKind::Delete, &ctx, now)?;
      self.table_mut(&stmt.table)?.rows.retain(|r| r.seq != *seq);
      self.fire(&stmt.table, Timing::After, EventKind::Delete, &ctx, now)?;
    }
    Ok(targets.len() as u64)
  }

  fn matching_rows(&self, table: &Identifier, column: &Identifier, value: &Value) -> Result<Vec<i64>> {
    Ok(
      self
        .table(table)?
        .rows
        .iter()
        .filter(|r| r.record.get(column.as_str()) == Some(value))
        .map(|r| r.seq)
        .collect(),
    )
  }

  fn row(&self, table: &Identifier, seq: i64) -> Result<Record> {
    self
      .table(table)?
      .rows
      .iter()
      .find(|r| r.seq == seq)
      .map(|r| r.record.clone())
      .ok_or_else(|| Error::MalformedHistoricRow(format!("{table} lost row {seq}")))
  }

  fn replace_row(&mut self, table: &Identifier, seq: i64, record: Record) -> Result<()> {
    if let Some(row) = self.table_mut(table)?.rows.iter_mut().find(|r| r.seq == seq) {
      row.record = record;
    }
    Ok(())
  }

  fn fire(
    &mut self,
    table: &Identifier,
    timing: Timing,
    kind: EventKind<'_>,
    ctx: &RowContext<'_>,
    now: DateTime<Utc>,
  ) -> Result<()> {
    for trigger in self.matching_triggers(table, timing, kind) {
      self.run_action(&trigger, ctx, now)?;
    }
    Ok(())
  }

  fn run_action(&mut self, trigger: &Trigger, ctx: &RowContext<'_>, now: DateTime<Utc>) -> Result<()> {
    match &trigger.action {
      TriggerAction::RejectExistingIdentity { history, identity } => {
        let id = column_value(ctx.new, identity);
        self.entity_history(history, identity, id)?.check_insert(id)
      }

      TriggerAction::RejectIdentityChange { identity } => {
        if column_value(ctx.new, identity) != column_value(ctx.old, identity) {
          return Err(Error::ImmutableIdentity(identity.to_string()));
        }
        Ok(())
      }

      TriggerAction::Mirror { history, columns, image, operation } => {
        let source = ctx.image(*image);
        let mut record: Record = columns
          .iter()
          .map(|c| (c.as_str(), column_value(source, c).clone()))
          .collect();
        record.set(protocol::TIMESTAMP_COLUMN, now);
        record.set(protocol::OPERATION_COLUMN, operation.as_ref());
        self.insert_row(history, record, now)
      }

      TriggerAction::RecomputeValidity { identity } => {
        let id = column_value(ctx.new, identity).clone();
        let updates = self.entity_history(&trigger.table, identity, &id)?.recompute();

        let table = self.table_mut(&trigger.table)?;
        for update in updates {
          if let Some(row) = table.rows.iter_mut().find(|r| r.seq == update.seq) {
            row.record.set(protocol::VALIDITY_COLUMN, i64::from(update.valid));
          }
        }
        Ok(())
      }
    }
  }

  /// Every row of `history` for one identity, decoded.
  fn entity_history(
    &self,
    history: &Identifier,
    identity: &Identifier,
    id: &Value,
  ) -> Result<EntityHistory> {
    let rows = self
      .table(history)?
      .rows
      .iter()
      .filter(|r| r.record.get(identity.as_str()) == Some(id))
      .map(|r| HistoricRow::from_record(r.seq, r.record.clone()))
      .collect::<Result<Vec<_>>>()?;
    Ok(EntityHistory::from_rows(rows))
  }
}

/// The event being processed, with the assignment list for updates.
#[derive(Clone, Copy)]
enum EventKind<'a> {
  Insert,
  Update(&'a [&'a Identifier]),
  Delete,
}

impl EventKind<'_> {
  fn matches(&self, event: &Event) -> bool {
    match (self, event) {
      (EventKind::Insert, Event::Insert) | (EventKind::Delete, Event::Delete) => true,
      (EventKind::Update(_), Event::Update { of: None }) => true,
      (EventKind::Update(assigned), Event::Update { of: Some(column) }) => {
        assigned.contains(&column)
      }
      _ => false,
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An in-memory store for tests and dialect-free use of the protocol.
///
/// Cloning is cheap; clones share the same catalog.
#[derive(Clone)]
pub struct MemoryStore {
  catalog: Arc<Mutex<Catalog>>,
  clock:   Clock,
}

impl Default for MemoryStore {
  fn default() -> Self { Self::new() }
}

impl MemoryStore {
  pub fn new() -> Self { Self::with_clock(Utc::now) }

  /// A store whose statements are stamped by `clock` instead of wall time.
  pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
    Self {
      catalog: Arc::new(Mutex::new(Catalog::default())),
      clock:   Arc::new(clock),
    }
  }

  /// Names of all tables, sorted.
  pub fn tables(&self) -> Result<Vec<Identifier>> {
    let catalog = self.lock()?;
    let mut names: Vec<_> = catalog.tables.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  /// Names of all triggers, in creation order.
  pub fn triggers(&self) -> Result<Vec<Identifier>> {
    Ok(self.lock()?.triggers.iter().map(|t| t.name.clone()).collect())
  }

  /// Number of rows currently in `table`.
  pub fn row_count(&self, table: &Identifier) -> Result<usize> {
    Ok(self.lock()?.table(table)?.rows.len())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Catalog>> {
    self
      .catalog
      .lock()
      .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
  }

  fn run(&self, statement: &Statement) -> Result<u64> {
    let now = (self.clock)();
    let mut live = self.lock()?;
    let mut scratch = live.clone();

    let affected = match statement {
      Statement::CreateTable(s) => {
        scratch.create_table(s);
        0
      }
      Statement::CreateIndex(s) => {
        scratch.create_index(s)?;
        0
      }
      Statement::CreateTrigger(s) => {
        scratch.create_trigger(s)?;
        0
      }
      Statement::Insert(s) => scratch.insert(s, now)?,
      Statement::Update(s) => scratch.update(s, now)?,
      Statement::Delete(s) => scratch.delete(s, now)?,
    };

    *live = scratch;
    Ok(affected)
  }
}

impl VersionedStore for MemoryStore {
  type Error = Error;

  async fn execute(&self, statement: &Statement) -> Result<u64> { self.run(statement) }

  async fn history(&self, table: &VersionedTable, id: &Value) -> Result<Vec<HistoricRow>> {
    let id = table.identity_value(id.clone())?;
    let catalog = self.lock()?;
    let history = catalog.table(table.history())?;
    history
      .rows
      .iter()
      .filter(|r| r.record.get(table.identity().as_str()) == Some(&id))
      .map(|r| HistoricRow::from_record(r.seq, r.record.clone()))
      .collect()
  }

  async fn current(&self, table: &VersionedTable, id: &Value) -> Result<Option<Record>> {
    let id = table.identity_value(id.clone())?;
    let catalog = self.lock()?;
    let primary = catalog.table(table.name())?;
    Ok(
      primary
        .rows
        .iter()
        .find(|r| r.record.get(table.identity().as_str()) == Some(&id))
        .map(|r| r.record.clone()),
    )
  }
}
