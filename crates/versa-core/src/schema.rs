//! Schema model: identifiers, logical column types, and schema derivation
//! from a source data description.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, protocol};

// ─── Identifier ──────────────────────────────────────────────────────────────

/// A validated SQL identifier: ASCII letter or `_`, then letters, digits or
/// `_`. Dialects can quote these without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
  const MAX_LEN: usize = 128;

  pub fn new(name: impl Into<String>) -> Result<Self> {
    let name = name.into();
    let mut chars = name.chars();
    let head_ok = chars
      .next()
      .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if head_ok && tail_ok && name.len() <= Self::MAX_LEN {
      Ok(Self(name))
    } else {
      Err(Error::InvalidIdentifier(name))
    }
  }

  /// Identifiers for the protocol's own fixed column names.
  pub(crate) fn meta(name: &'static str) -> Self { Self(name.to_owned()) }

  pub fn as_str(&self) -> &str { &self.0 }

  /// `self` followed by `suffix` (e.g. `orders` → `orders_history`).
  pub fn suffixed(&self, suffix: &str) -> Result<Self> {
    Self::new(format!("{}{suffix}", self.0))
  }

  /// SQL engines compare identifiers case-insensitively.
  pub fn eq_ignore_case(&self, other: &str) -> bool {
    self.0.eq_ignore_ascii_case(other)
  }
}

impl fmt::Display for Identifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for Identifier {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<Identifier> for String {
  fn from(value: Identifier) -> Self { value.0 }
}

impl AsRef<str> for Identifier {
  fn as_ref(&self) -> &str { &self.0 }
}

// ─── Logical types ───────────────────────────────────────────────────────────

/// The closed set of column types a versioned table can hold.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogicalType {
  Integer,
  Real,
  Text,
  Timestamp,
}

impl LogicalType {
  /// Map a source sample type name (e.g. `int64`, `float32`,
  /// `datetime64[ns]`, `category`) onto a logical type.
  ///
  /// Parametric qualifiers are stripped before lookup; the lookup itself is
  /// a fixed table.
  pub fn from_sample_type(sample: &str) -> Result<Self> {
    match strip_qualifiers(sample).as_str() {
      "int" | "integer" => Ok(Self::Integer),
      "float" => Ok(Self::Real),
      "text" | "string" | "object" | "category" => Ok(Self::Text),
      "datetime" => Ok(Self::Timestamp),
      _ => Err(Error::UnsupportedType(sample.to_owned())),
    }
  }

  /// Whether this type may hold an entity identity.
  pub fn is_identity_capable(self) -> bool {
    matches!(self, Self::Integer | Self::Text)
  }
}

/// Drop bracketed or parenthesised annotations and width digits, then
/// lowercase: `datetime64[ns, UTC]` → `datetime`, `Int64` → `int`.
fn strip_qualifiers(sample: &str) -> String {
  let mut out = String::with_capacity(sample.len());
  let mut depth = 0usize;
  for c in sample.chars() {
    match c {
      '[' | '(' => depth += 1,
      ']' | ')' => depth = depth.saturating_sub(1),
      _ if depth > 0 || c.is_ascii_digit() => {}
      _ => out.push(c.to_ascii_lowercase()),
    }
  }
  out.trim().to_owned()
}

// ─── Columns and schemas ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
  pub name: Identifier,
  #[serde(rename = "type")]
  pub ty:   LogicalType,
}

impl Column {
  pub fn new(name: Identifier, ty: LogicalType) -> Self { Self { name, ty } }
}

/// Default name of the identity column.
pub const DEFAULT_IDENTITY: &str = "id";

/// An ordered, validated list of columns with one designated identity column.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
  columns:  Vec<Column>,
  identity: usize,
}

impl Schema {
  /// Build a schema whose identity column is [`DEFAULT_IDENTITY`].
  pub fn new(columns: Vec<Column>) -> Result<Self> {
    Self::with_identity(columns, DEFAULT_IDENTITY)
  }

  pub fn with_identity(columns: Vec<Column>, identity: &str) -> Result<Self> {
    for (i, column) in columns.iter().enumerate() {
      if protocol::META_COLUMNS
        .iter()
        .chain(&protocol::ROW_ID_ALIASES)
        .any(|meta| column.name.eq_ignore_case(meta))
      {
        return Err(Error::ReservedColumn(column.name.to_string()));
      }
      if columns[..i]
        .iter()
        .any(|prior| prior.name.eq_ignore_case(column.name.as_str()))
      {
        return Err(Error::DuplicateColumn(column.name.to_string()));
      }
    }

    let identity_pos = columns
      .iter()
      .position(|c| c.name.as_str() == identity)
      .ok_or_else(|| Error::MissingIdentity(identity.to_owned()))?;

    let ty = columns[identity_pos].ty;
    if !ty.is_identity_capable() {
      return Err(Error::InvalidIdentityType {
        column: identity.to_owned(),
        ty,
      });
    }

    Ok(Self { columns, identity: identity_pos })
  }

  pub fn columns(&self) -> &[Column] { &self.columns }

  pub fn identity(&self) -> &Column { &self.columns[self.identity] }

  /// Position of the identity column in [`Schema::columns`].
  pub fn identity_index(&self) -> usize { self.identity }

  pub fn column(&self, name: &str) -> Option<&Column> {
    self.columns.iter().find(|c| c.name.as_str() == name)
  }

  pub fn column_names(&self) -> impl Iterator<Item = &Identifier> {
    self.columns.iter().map(|c| &c.name)
  }
}

/// Derive a schema from `(column name, sample type)` pairs, using the default
/// identity column.
///
/// Fails with [`Error::UnsupportedType`] before anything else is checked if a
/// sample type has no mapping.
pub fn derive_schema<N, T>(columns: impl IntoIterator<Item = (N, T)>) -> Result<Schema>
where
  N: Into<String>,
  T: AsRef<str>,
{
  Schema::new(derive_columns(columns)?)
}

fn derive_columns<N, T>(
  columns: impl IntoIterator<Item = (N, T)>,
) -> Result<Vec<Column>>
where
  N: Into<String>,
  T: AsRef<str>,
{
  let pairs: Vec<(String, LogicalType)> = columns
    .into_iter()
    .map(|(name, sample)| {
      LogicalType::from_sample_type(sample.as_ref()).map(|ty| (name.into(), ty))
    })
    .collect::<Result<_>>()?;

  pairs
    .into_iter()
    .map(|(name, ty)| Ok(Column::new(Identifier::new(name)?, ty)))
    .collect()
}

// ─── Data sample ─────────────────────────────────────────────────────────────

/// One column of a source data description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleColumn {
  pub name:  String,
  /// Source type name as reported by the data source, e.g. `int64`.
  pub dtype: String,
}

/// External description of a columnar data source, the input to schema
/// derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSample {
  #[serde(default)]
  pub identity: Option<String>,
  pub columns:  Vec<SampleColumn>,
}

impl DataSample {
  pub fn from_json(json: &str) -> Result<Self> { Ok(serde_json::from_str(json)?) }

  pub fn to_schema(&self) -> Result<Schema> {
    let columns =
      derive_columns(self.columns.iter().map(|c| (c.name.clone(), &c.dtype)))?;
    Schema::with_identity(
      columns,
      self.identity.as_deref().unwrap_or(DEFAULT_IDENTITY),
    )
  }
}
