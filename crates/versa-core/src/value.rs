//! Column values and ordered records.
//!
//! Values are dynamically typed at the edges (scripts, store rows) and coerced
//! to a column's [`LogicalType`] once, when a mutation statement is built.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

use crate::{Error, Result, schema::LogicalType};

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single cell.
///
/// Deserialisation is untagged: JSON strings always become [`Value::Text`]
/// and are parsed into [`Value::Timestamp`] only by [`Value::coerce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  #[serde(serialize_with = "serialize_timestamp")]
  Timestamp(DateTime<Utc>),
}

impl Value {
  /// Name of the variant, for error messages.
  pub fn kind_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Integer(_) => "integer",
      Value::Real(_) => "real",
      Value::Text(_) => "text",
      Value::Timestamp(_) => "timestamp",
    }
  }

  pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

  /// Convert this value to the representation required by `ty`.
  ///
  /// Integers widen to reals and text parses into timestamps; every other
  /// cross-type conversion is a [`Error::TypeMismatch`].
  pub fn coerce(self, column: &str, ty: LogicalType) -> Result<Value> {
    let mismatch = |found| Error::TypeMismatch {
      column: column.to_owned(),
      expected: ty,
      found,
    };

    match (self, ty) {
      (Value::Null, _) => Ok(Value::Null),
      (v @ Value::Integer(_), LogicalType::Integer) => Ok(v),
      (Value::Integer(i), LogicalType::Real) => Ok(Value::Real(i as f64)),
      (v @ Value::Real(_), LogicalType::Real) => Ok(v),
      (v @ Value::Text(_), LogicalType::Text) => Ok(v),
      (Value::Text(s), LogicalType::Timestamp) => {
        parse_timestamp(&s).map(Value::Timestamp)
      }
      (v @ Value::Timestamp(_), LogicalType::Timestamp) => Ok(v),
      (other, _) => Err(mismatch(other.kind_name())),
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Value::Integer(v) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Value::Integer(v.into()) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Value::Real(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Value::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Value::Text(v) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Value::Timestamp(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Value::Null, Into::into) }
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Canonical text form: RFC 3339, millisecond precision, `Z` suffix.
///
/// Fixed width, so lexicographic order equals chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse RFC 3339, falling back to the `YYYY-MM-DD HH:MM:SS[.fff]` form that
/// SQL engines produce for `CURRENT_TIMESTAMP`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
    .map(|naive| naive.and_utc())
    .map_err(|_| Error::InvalidTimestamp(s.to_owned()))
}

fn serialize_timestamp<S: Serializer>(
  dt: &DateTime<Utc>,
  serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
  serializer.serialize_str(&format_timestamp(*dt))
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// An ordered set of `(column, value)` pairs.
///
/// Serialises as a JSON object in column order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<String, Value>")]
pub struct Record {
  fields: Vec<(String, Value)>,
}

impl Record {
  pub fn new() -> Self { Self::default() }

  /// Builder-style [`Record::set`].
  pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
    self.set(column, value);
    self
  }

  /// Set `column`, replacing any existing value in place.
  pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
    let column = column.into();
    let value = value.into();
    match self.fields.iter_mut().find(|(c, _)| *c == column) {
      Some((_, slot)) => *slot = value,
      None => self.fields.push((column, value)),
    }
  }

  pub fn get(&self, column: &str) -> Option<&Value> {
    self
      .fields
      .iter()
      .find(|(c, _)| c == column)
      .map(|(_, v)| v)
  }

  pub fn remove(&mut self, column: &str) -> Option<Value> {
    let pos = self.fields.iter().position(|(c, _)| c == column)?;
    Some(self.fields.remove(pos).1)
  }

  pub fn columns(&self) -> impl Iterator<Item = &str> {
    self.fields.iter().map(|(c, _)| c.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.fields.iter().map(|(c, v)| (c.as_str(), v))
  }

  pub fn len(&self) -> usize { self.fields.len() }

  pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

impl IntoIterator for Record {
  type Item = (String, Value);
  type IntoIter = std::vec::IntoIter<(String, Value)>;

  fn into_iter(self) -> Self::IntoIter { self.fields.into_iter() }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut record = Record::new();
    for (k, v) in iter {
      record.set(k, v);
    }
    record
  }
}

impl From<BTreeMap<String, Value>> for Record {
  fn from(map: BTreeMap<String, Value>) -> Self { map.into_iter().collect() }
}

impl Serialize for Record {
  fn serialize<S: Serializer>(
    &self,
    serializer: S,
  ) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (column, value) in &self.fields {
      map.serialize_entry(column, value)?;
    }
    map.end()
  }
}
