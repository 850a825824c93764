//! The `demo` subcommand: a sample table taken through one full lifecycle.

use anyhow::Context as _;
use versa_core::{
  batch::apply_batch,
  protocol::HistoricRow,
  provision::provision,
  schema::{DataSample, Identifier, SampleColumn},
  store::VersionedStore,
  table::VersionedTable,
  value::{Record, Value},
};

fn sample() -> DataSample {
  let column = |name: &str, dtype: &str| SampleColumn {
    name:  name.to_string(),
    dtype: dtype.to_string(),
  };
  DataSample {
    identity: None,
    columns:  vec![
      column("id", "object"),
      column("numeric_col", "int64"),
      column("label", "category"),
      column("observed_at", "datetime64[ns]"),
    ],
  }
}

fn row(id: &str, numeric: i64, label: &str) -> Record {
  Record::new()
    .with("id", id)
    .with("numeric_col", numeric)
    .with("label", label)
    .with("observed_at", "2024-01-01T00:00:00Z")
}

/// Provision `name`, load three rows in bulk, then insert, update and delete
/// `id4`. Returns `id4`'s history.
pub async fn run<S>(store: &S, name: Identifier) -> anyhow::Result<Vec<HistoricRow>>
where
  S: VersionedStore,
{
  let table = VersionedTable::new(name, sample().to_schema()?)?;
  provision(store, &table).await?;

  let statements = vec![
    table.insert_many([row("id1", 1, "a"), row("id2", 2, "b"), row("id3", 3, "c")])?,
    table.insert(row("id4", 10, "d"))?,
    table.update("id4", Record::new().with("numeric_col", 5_000_000))?,
    table.delete("id4")?,
  ];
  apply_batch(store, &statements)
    .await
    .into_result()
    .context("demo batch halted (rerun with --in-memory or a fresh database)")?;

  Ok(store.history(&table, &Value::from("id4")).await?)
}

#[cfg(test)]
mod tests {
  use versa_core::{memory::MemoryStore, protocol::Operation};

  use super::*;

  #[tokio::test]
  async fn demo_records_the_full_lifecycle_of_id4() {
    let store = MemoryStore::new();
    let rows = run(&store, Identifier::new("records").unwrap()).await.unwrap();

    let ops: Vec<_> = rows.iter().map(|r| r.operation).collect();
    assert_eq!(ops, [Operation::Insert, Operation::Update, Operation::Delete]);
    assert_eq!(rows[2].image.get("numeric_col"), Some(&Value::Integer(5_000_000)));
    assert!(rows[2].valid);
  }

  #[tokio::test]
  async fn demo_twice_on_one_store_fails() {
    let store = MemoryStore::new();
    let name = Identifier::new("records").unwrap();
    run(&store, name.clone()).await.unwrap();
    assert!(run(&store, name).await.is_err());
  }
}
