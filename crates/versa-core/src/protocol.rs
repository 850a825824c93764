//! The mutation trigger protocol as pure functions.
//!
//! Each primary-table mutation appends exactly one historic row for its
//! identity and then recomputes validity over that identity's rows. Stores
//! run this cascade inside their own triggers; the functions here express
//! the same state machine over plain data so it can be checked without one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  value::{Record, Value},
};

// ─── History shape ───────────────────────────────────────────────────────────

pub const HISTORY_SUFFIX: &str = "_history";

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const OPERATION_COLUMN: &str = "operation";
pub const VALIDITY_COLUMN: &str = "validity";

/// Columns the history table adds to the entity schema.
pub const META_COLUMNS: [&str; 3] = [TIMESTAMP_COLUMN, OPERATION_COLUMN, VALIDITY_COLUMN];

/// Names stores may resolve to their own physical row id, which orders
/// appends. Never valid as schema columns.
pub const ROW_ID_ALIASES: [&str; 3] = ["rowid", "oid", "_rowid_"];

/// Abort message raised by the insert guard.
pub const DUPLICATE_IDENTITY: &str = "duplicate identity";

/// Abort message raised when an update would change an identity.
pub const IDENTITY_IMMUTABLE: &str = "identity is immutable";

/// The mutation a historic row records.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operation {
  Insert,
  Update,
  Delete,
}

/// One row of a history table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricRow {
  /// Physical append order within the history table.
  pub seq:       i64,
  /// The entity image: post-mutation for inserts and updates, pre-removal for
  /// deletes.
  pub image:     Record,
  pub timestamp: DateTime<Utc>,
  pub operation: Operation,
  pub valid:     bool,
}

impl HistoricRow {
  /// Split a full history-table record into entity image and meta columns.
  pub fn from_record(seq: i64, mut record: Record) -> Result<Self> {
    let missing = |column: &str| Error::MalformedHistoricRow(format!("missing {column}"));

    let timestamp = match record.remove(TIMESTAMP_COLUMN) {
      Some(Value::Timestamp(ts)) => ts,
      Some(Value::Text(s)) => crate::value::parse_timestamp(&s)?,
      Some(other) => {
        return Err(Error::MalformedHistoricRow(format!(
          "timestamp is {}",
          other.kind_name()
        )));
      }
      None => return Err(missing(TIMESTAMP_COLUMN)),
    };

    let operation = match record.remove(OPERATION_COLUMN) {
      Some(Value::Text(tag)) => {
        tag.parse().map_err(|_| Error::UnknownOperation(tag))?
      }
      Some(other) => return Err(Error::UnknownOperation(other.kind_name().to_owned())),
      None => return Err(missing(OPERATION_COLUMN)),
    };

    let valid = match record.remove(VALIDITY_COLUMN) {
      Some(Value::Integer(flag)) => flag != 0,
      // Not yet recomputed.
      Some(Value::Null) => false,
      Some(other) => {
        return Err(Error::MalformedHistoricRow(format!(
          "validity is {}",
          other.kind_name()
        )));
      }
      None => return Err(missing(VALIDITY_COLUMN)),
    };

    Ok(Self { seq, image: record, timestamp, operation, valid })
  }

  /// Image plus meta columns, in history-table column order.
  pub fn to_record(&self) -> Record {
    let mut record = self.image.clone();
    record.set(TIMESTAMP_COLUMN, self.timestamp);
    record.set(OPERATION_COLUMN, self.operation.as_ref());
    record.set(VALIDITY_COLUMN, i64::from(self.valid));
    record
  }
}

// ─── Validity ────────────────────────────────────────────────────────────────

/// A validity flag assignment produced by recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityUpdate {
  pub seq:   i64,
  pub valid: bool,
}

/// The sequence number of the current version among `(seq, timestamp)`
/// entries: maximum timestamp, ties broken by highest sequence number.
pub fn current_version(
  entries: impl IntoIterator<Item = (i64, DateTime<Utc>)>,
) -> Option<i64> {
  entries
    .into_iter()
    .max_by_key(|&(seq, ts)| (ts, seq))
    .map(|(seq, _)| seq)
}

/// Recompute validity for all rows of one identity. Returns an assignment for
/// every row, exactly one of which is `valid` when `rows` is non-empty.
pub fn recompute_validity(rows: &[HistoricRow]) -> Vec<ValidityUpdate> {
  let winner = current_version(rows.iter().map(|r| (r.seq, r.timestamp)));
  rows
    .iter()
    .map(|r| ValidityUpdate { seq: r.seq, valid: Some(r.seq) == winner })
    .collect()
}

// ─── Per-entity history ──────────────────────────────────────────────────────

/// The history of a single identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityHistory {
  rows: Vec<HistoricRow>,
}

impl EntityHistory {
  /// Rebuild from stored rows, in any order.
  pub fn from_rows(mut rows: Vec<HistoricRow>) -> Self {
    rows.sort_by_key(|r| r.seq);
    Self { rows }
  }

  pub fn rows(&self) -> &[HistoricRow] { &self.rows }

  /// The row currently flagged valid.
  pub fn valid(&self) -> Option<&HistoricRow> { self.rows.iter().find(|r| r.valid) }

  /// Insert guard: an identity that has ever existed cannot be inserted again.
  pub fn check_insert(&self, identity: &Value) -> Result<()> {
    if self.rows.is_empty() {
      Ok(())
    } else {
      Err(Error::DuplicateIdentity(describe_identity(identity)))
    }
  }

  /// Recompute validity after an append, returning the new flag of every row.
  pub fn recompute(&mut self) -> Vec<ValidityUpdate> {
    let updates = recompute_validity(&self.rows);
    for (row, update) in self.rows.iter_mut().zip(&updates) {
      row.valid = update.valid;
    }
    updates
  }
}

pub(crate) fn describe_identity(identity: &Value) -> String {
  match identity {
    Value::Text(s) => format!("{s:?}"),
    Value::Integer(i) => i.to_string(),
    other => format!("{other:?}"),
  }
}
