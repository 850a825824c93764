//! Error types for `versa-core`.

use thiserror::Error;

use crate::{
  batch::{Classify, FailureKind},
  schema::LogicalType,
};

#[derive(Debug, Error)]
pub enum Error {
  // ── Schema construction ───────────────────────────────────────────────

  #[error("unsupported source type: {0:?}")]
  UnsupportedType(String),

  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  #[error("duplicate column: {0}")]
  DuplicateColumn(String),

  #[error("column name {0:?} is reserved")]
  ReservedColumn(String),

  #[error("identity column {0:?} is missing")]
  MissingIdentity(String),

  #[error("identity column {column:?} must be text or integer, not {ty}")]
  InvalidIdentityType { column: String, ty: LogicalType },

  // ── Mutation building ─────────────────────────────────────────────────

  #[error("table {table} has no column {column:?}")]
  UnknownColumn { table: String, column: String },

  #[error("column {column:?} expects {expected}, got {found}")]
  TypeMismatch {
    column:   String,
    expected: LogicalType,
    found:    &'static str,
  },

  #[error("update on {0} assigns no columns")]
  EmptyUpdate(String),

  #[error("identity column {0:?} cannot be changed")]
  ImmutableIdentity(String),

  #[error("insert on {0} has no rows")]
  EmptyInsert(String),

  #[error("{table}.{column} may not be null")]
  NotNull { table: String, column: String },

  // ── Protocol decoding ─────────────────────────────────────────────────

  #[error("unknown operation tag: {0:?}")]
  UnknownOperation(String),

  #[error("malformed historic row: {0}")]
  MalformedHistoricRow(String),

  #[error("invalid timestamp {0:?}")]
  InvalidTimestamp(String),

  #[error("no such table: {0}")]
  UnknownTable(String),

  // ── Classified failures ───────────────────────────────────────────────

  #[error("duplicate identity: {0}")]
  DuplicateIdentity(String),

  #[error("provisioning conflict at {statement}: {message}")]
  ProvisioningConflict { statement: String, message: String },

  #[error("statement {index} ({statement}) failed: {message}")]
  StatementFailure {
    index:     usize,
    statement: String,
    message:   String,
  },

  #[error("store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Classify for Error {
  fn failure_kind(&self) -> FailureKind {
    match self {
      Error::UnsupportedType(_) => FailureKind::UnsupportedType,
      Error::DuplicateIdentity(_) => FailureKind::DuplicateIdentity,
      Error::ProvisioningConflict { .. } => FailureKind::ProvisioningConflict,
      Error::StoreUnavailable(_) => FailureKind::StoreUnavailable,
      _ => FailureKind::StatementFailure,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
