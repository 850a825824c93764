//! JSON mutation scripts.
//!
//! ```json
//! [
//!   { "op": "insert_many", "rows": [{ "id": "a", "amount": 1 }] },
//!   { "op": "update", "id": "a", "set": { "amount": 2.5 } },
//!   { "op": "delete", "id": "a" }
//! ]
//! ```

use serde::Deserialize;
use versa_core::{
  statement::Statement,
  table::VersionedTable,
  value::{Record, Value},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
  Insert { values: Record },
  InsertMany { rows: Vec<Record> },
  Update { id: Value, set: Record },
  Delete { id: Value },
}

impl ScriptOp {
  pub fn to_statement(&self, table: &VersionedTable) -> versa_core::Result<Statement> {
    match self {
      ScriptOp::Insert { values } => table.insert(values.clone()),
      ScriptOp::InsertMany { rows } => table.insert_many(rows.iter().cloned()),
      ScriptOp::Update { id, set } => table.update(id.clone(), set.clone()),
      ScriptOp::Delete { id } => table.delete(id.clone()),
    }
  }
}

/// Parse a script and build its statements. Nothing is executed if any
/// operation is invalid.
pub fn compile(json: &str, table: &VersionedTable) -> anyhow::Result<Vec<Statement>> {
  let ops: Vec<ScriptOp> = serde_json::from_str(json)?;
  ops
    .iter()
    .enumerate()
    .map(|(index, op)| {
      op.to_statement(table)
        .map_err(|e| anyhow::anyhow!("script operation {index}: {e}"))
    })
    .collect()
}
