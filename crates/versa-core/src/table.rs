//! [`VersionedTable`]: a primary table paired with its schema, and the
//! builders for mutation statements against it.

use crate::{
  Error, Result,
  protocol::{self, HISTORY_SUFFIX},
  schema::{Identifier, LogicalType, Schema},
  statement::{ColumnDef, Delete, Insert, Key, Statement, Update},
  value::{Record, Value},
};

/// Names of every object provisioned for one versioned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
  pub primary:          Identifier,
  pub history:          Identifier,
  pub guard:            Identifier,
  pub insert_mirror:    Identifier,
  pub update_mirror:    Identifier,
  pub delete_mirror:    Identifier,
  pub validity_recalc:  Identifier,
  pub identity_freeze:  Identifier,
  pub history_identity: Identifier,
}

/// A primary table and the schema it was provisioned with.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedTable {
  names:  TableNames,
  schema: Schema,
}

impl VersionedTable {
  pub fn new(name: Identifier, schema: Schema) -> Result<Self> {
    let history = name.suffixed(HISTORY_SUFFIX)?;
    let names = TableNames {
      guard:            name.suffixed("_guard")?,
      insert_mirror:    name.suffixed("_insert_mirror")?,
      update_mirror:    name.suffixed("_update_mirror")?,
      delete_mirror:    name.suffixed("_delete_mirror")?,
      validity_recalc:  name.suffixed("_validity_recalc")?,
      identity_freeze:  name.suffixed("_identity_freeze")?,
      history_identity: history.suffixed("_identity_idx")?,
      history,
      primary: name,
    };
    Ok(Self { names, schema })
  }

  pub fn name(&self) -> &Identifier { &self.names.primary }

  pub fn history(&self) -> &Identifier { &self.names.history }

  pub fn names(&self) -> &TableNames { &self.names }

  pub fn schema(&self) -> &Schema { &self.schema }

  pub fn identity(&self) -> &Identifier { &self.schema.identity().name }

  /// Primary-table column definitions. The identity column is `NOT NULL`.
  pub fn columns(&self) -> Vec<ColumnDef> {
    let identity = self.schema.identity_index();
    self
      .schema
      .columns()
      .iter()
      .enumerate()
      .map(|(i, c)| {
        let def = ColumnDef::new(c.name.clone(), c.ty);
        if i == identity { def.not_null() } else { def }
      })
      .collect()
  }

  /// History-table column definitions: the schema followed by the meta
  /// columns.
  pub fn history_columns(&self) -> Vec<ColumnDef> {
    let mut columns = self.columns();
    columns.extend([
      ColumnDef::new(Identifier::meta(protocol::TIMESTAMP_COLUMN), LogicalType::Timestamp),
      ColumnDef::new(Identifier::meta(protocol::OPERATION_COLUMN), LogicalType::Text),
      ColumnDef::new(Identifier::meta(protocol::VALIDITY_COLUMN), LogicalType::Integer)
        .with_default(0),
    ]);
    columns
  }

  // ── Mutation builders ─────────────────────────────────────────────────

  /// Insert one entity. Columns absent from `record` are inserted as null.
  pub fn insert(&self, record: Record) -> Result<Statement> {
    self.insert_many([record])
  }

  /// Insert several entities in one statement.
  pub fn insert_many(&self, records: impl IntoIterator<Item = Record>) -> Result<Statement> {
    let rows = records
      .into_iter()
      .map(|record| self.row_values(record))
      .collect::<Result<Vec<_>>>()?;

    if rows.is_empty() {
      return Err(Error::EmptyInsert(self.name().to_string()));
    }

    Ok(Statement::Insert(Insert {
      table: self.name().clone(),
      columns: self.schema.column_names().cloned().collect(),
      rows,
    }))
  }

  /// Update the entity `id`, assigning `changes`.
  pub fn update(&self, id: impl Into<Value>, changes: Record) -> Result<Statement> {
    let key = self.key(id.into())?;
    let mut assignments = Vec::with_capacity(changes.len());
    for (column, value) in changes {
      if column == self.identity().as_str() {
        return Err(Error::ImmutableIdentity(column));
      }
      let (name, value) = self.coerce(column, value)?;
      assignments.push((name, value));
    }

    if assignments.is_empty() {
      return Err(Error::EmptyUpdate(self.name().to_string()));
    }

    Ok(Statement::Update(Update {
      table: self.name().clone(),
      assignments,
      key,
    }))
  }

  /// Delete the entity `id`.
  pub fn delete(&self, id: impl Into<Value>) -> Result<Statement> {
    Ok(Statement::Delete(Delete {
      table: self.name().clone(),
      key:   self.key(id.into())?,
    }))
  }

  /// Coerce an identity value to the identity column's type.
  pub fn identity_value(&self, id: Value) -> Result<Value> {
    let identity = self.schema.identity();
    let value = id.coerce(identity.name.as_str(), identity.ty)?;
    if value.is_null() {
      return Err(Error::MissingIdentity(identity.name.to_string()));
    }
    Ok(value)
  }

  fn key(&self, id: Value) -> Result<Key> {
    Ok(Key {
      column: self.identity().clone(),
      value:  self.identity_value(id)?,
    })
  }

  fn coerce(&self, column: String, value: Value) -> Result<(Identifier, Value)> {
    let def = self.schema.column(&column).ok_or_else(|| Error::UnknownColumn {
      table:  self.name().to_string(),
      column: column.clone(),
    })?;
    Ok((def.name.clone(), value.coerce(&column, def.ty)?))
  }

  /// Values for every schema column, in schema order.
  fn row_values(&self, mut record: Record) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(self.schema.columns().len());
    for column in self.schema.columns() {
      let value = record.remove(column.name.as_str()).unwrap_or(Value::Null);
      values.push(value.coerce(column.name.as_str(), column.ty)?);
    }

    if let Some(extra) = record.columns().next() {
      return Err(Error::UnknownColumn {
        table:  self.name().to_string(),
        column: extra.to_owned(),
      });
    }

    if values[self.schema.identity_index()].is_null() {
      return Err(Error::MissingIdentity(self.identity().to_string()));
    }

    Ok(values)
  }
}
