//! Conversions between engine [`Value`]s and SQLite storage values.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (see
//! [`format_timestamp`]). Every other logical type maps onto its native
//! SQLite storage class.

use rusqlite::types::Value as SqlValue;
use versa_core::{
  protocol::HistoricRow,
  schema::LogicalType,
  statement::ColumnDef,
  value::{Record, Value, format_timestamp, parse_timestamp},
};

use crate::{Error, Result};

// ─── Value ───────────────────────────────────────────────────────────────────

pub fn encode_value(value: Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Integer(i) => SqlValue::Integer(i),
    Value::Real(f) => SqlValue::Real(f),
    Value::Text(s) => SqlValue::Text(s),
    Value::Timestamp(ts) => SqlValue::Text(format_timestamp(ts)),
  }
}

/// Read a stored cell back as `ty`.
///
/// Column affinity can store a value in a neighbouring class (an integral
/// `REAL`, a numeric-looking `TEXT`), so the obvious widenings are accepted.
pub fn decode_value(raw: SqlValue, ty: LogicalType, column: &str) -> Result<Value> {
  let mismatch = |found: &str| Error::Decode {
    column: column.to_owned(),
    reason: format!("expected {ty}, found {found}"),
  };

  Ok(match (ty, raw) {
    (_, SqlValue::Null) => Value::Null,
    (_, SqlValue::Blob(_)) => return Err(mismatch("blob")),

    (LogicalType::Integer, SqlValue::Integer(i)) => Value::Integer(i),
    (LogicalType::Integer, SqlValue::Real(_)) => return Err(mismatch("real")),
    (LogicalType::Integer, SqlValue::Text(_)) => return Err(mismatch("text")),

    (LogicalType::Real, SqlValue::Real(f)) => Value::Real(f),
    (LogicalType::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
    (LogicalType::Real, SqlValue::Text(_)) => return Err(mismatch("text")),

    (LogicalType::Text, SqlValue::Text(s)) => Value::Text(s),
    (LogicalType::Text, SqlValue::Integer(i)) => Value::Text(i.to_string()),
    (LogicalType::Text, SqlValue::Real(f)) => Value::Text(f.to_string()),

    (LogicalType::Timestamp, SqlValue::Text(s)) => Value::Timestamp(parse_timestamp(&s)?),
    (LogicalType::Timestamp, SqlValue::Integer(_)) => return Err(mismatch("integer")),
    (LogicalType::Timestamp, SqlValue::Real(_)) => return Err(mismatch("real")),
  })
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A row as read inside a connection closure, decoded outside it.
#[derive(Debug)]
pub struct RawRow {
  pub rowid: i64,
  pub cells: Vec<SqlValue>,
}

impl RawRow {
  /// Read `rowid` followed by `width` cells.
  pub fn from_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Self> {
    let rowid = row.get(0)?;
    let cells = (1..=width).map(|i| row.get(i)).collect::<rusqlite::Result<_>>()?;
    Ok(Self { rowid, cells })
  }

  /// Decode against `columns`, which must be the selected column list.
  pub fn into_record(self, columns: &[ColumnDef]) -> Result<Record> {
    columns
      .iter()
      .zip(self.cells)
      .map(|(column, raw)| {
        let value = decode_value(raw, column.ty, column.name.as_str())?;
        Ok((column.name.as_str(), value))
      })
      .collect()
  }

  pub fn into_historic(self, columns: &[ColumnDef]) -> Result<HistoricRow> {
    let seq = self.rowid;
    let record = self.into_record(columns)?;
    Ok(HistoricRow::from_record(seq, record)?)
  }
}
