//! Dialect-neutral statement representation.
//!
//! Everything the engine sends to a store is a [`Statement`]. Identifiers
//! inside it are pre-validated and values are carried separately, so a
//! [`Dialect`] renders SQL text plus bound parameters without ever splicing
//! caller input into the text.

use std::fmt;

use crate::{
  protocol::Operation,
  schema::{Identifier, LogicalType},
  value::Value,
};

// ─── DDL ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
  pub name:     Identifier,
  pub ty:       LogicalType,
  pub default:  Option<Value>,
  pub not_null: bool,
}

impl ColumnDef {
  pub fn new(name: Identifier, ty: LogicalType) -> Self {
    Self { name, ty, default: None, not_null: false }
  }

  pub fn not_null(mut self) -> Self {
    self.not_null = true;
    self
  }

  pub fn with_default(mut self, value: impl Into<Value>) -> Self {
    self.default = Some(value.into());
    self
  }
}

/// `CREATE TABLE IF NOT EXISTS`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
  pub name:    Identifier,
  pub columns: Vec<ColumnDef>,
}

/// `CREATE INDEX IF NOT EXISTS`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
  pub name:    Identifier,
  pub table:   Identifier,
  pub columns: Vec<Identifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Timing {
  Before,
  After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Insert,
  /// Fires on any update, or only when `of` appears in the assignment list.
  Update { of: Option<Identifier> },
  Delete,
}

/// Which row image a trigger body reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Image {
  /// The row being written (`NEW`).
  New,
  /// The row being replaced or removed (`OLD`).
  Old,
}

/// The body of a trigger, as one of the protocol's fixed actions.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerAction {
  /// Abort when `history` already holds a row whose `identity` equals the
  /// incoming row's.
  RejectExistingIdentity {
    history:  Identifier,
    identity: Identifier,
  },
  /// Abort when an update changes the `identity` column.
  RejectIdentityChange { identity: Identifier },
  /// Append `image`'s `columns` to `history`, stamped with `operation` and the
  /// current time.
  Mirror {
    history:   Identifier,
    columns:   Vec<Identifier>,
    image:     Image,
    operation: Operation,
  },
  /// Recompute the validity flag for every row of the trigger's table that
  /// shares the new row's `identity`.
  RecomputeValidity { identity: Identifier },
}

/// `CREATE TRIGGER IF NOT EXISTS ... FOR EACH ROW`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
  pub name:   Identifier,
  pub timing: Timing,
  pub event:  Event,
  pub table:  Identifier,
  pub action: TriggerAction,
}

// ─── DML ─────────────────────────────────────────────────────────────────────

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
  pub column: Identifier,
  pub value:  Value,
}

/// A single- or multi-row insert; every row lists a value for each column.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
  pub table:   Identifier,
  pub columns: Vec<Identifier>,
  pub rows:    Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
  pub table:       Identifier,
  pub assignments: Vec<(Identifier, Value)>,
  pub key:         Key,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
  pub table: Identifier,
  pub key:   Key,
}

// ─── Statement ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
  CreateTable(CreateTable),
  CreateIndex(CreateIndex),
  CreateTrigger(Trigger),
  Insert(Insert),
  Update(Update),
  Delete(Delete),
}

impl Statement {
  /// Schema-definition statements, as opposed to data mutations.
  pub fn is_ddl(&self) -> bool {
    matches!(
      self,
      Statement::CreateTable(_) | Statement::CreateIndex(_) | Statement::CreateTrigger(_)
    )
  }

  /// The object the statement creates or mutates.
  pub fn target(&self) -> &Identifier {
    match self {
      Statement::CreateTable(s) => &s.name,
      Statement::CreateIndex(s) => &s.name,
      Statement::CreateTrigger(s) => &s.name,
      Statement::Insert(s) => &s.table,
      Statement::Update(s) => &s.table,
      Statement::Delete(s) => &s.table,
    }
  }
}

impl fmt::Display for Statement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Statement::CreateTable(s) => write!(f, "create table {}", s.name),
      Statement::CreateIndex(s) => write!(f, "create index {}", s.name),
      Statement::CreateTrigger(s) => write!(f, "create trigger {}", s.name),
      Statement::Insert(s) if s.rows.len() == 1 => write!(f, "insert into {}", s.table),
      Statement::Insert(s) => {
        write!(f, "insert into {} ({} rows)", s.table, s.rows.len())
      }
      Statement::Update(s) => write!(f, "update {} by {}", s.table, s.key.column),
      Statement::Delete(s) => write!(f, "delete from {} by {}", s.table, s.key.column),
    }
  }
}

// ─── Dialect ─────────────────────────────────────────────────────────────────

/// SQL text plus positional parameters, in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
  pub sql:    String,
  pub params: Vec<Value>,
}

/// Renders statements for one target store.
pub trait Dialect {
  fn name(&self) -> &'static str;

  fn render(&self, statement: &Statement) -> Rendered;
}
