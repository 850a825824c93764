//! The `VersionedStore` trait: the store the engine drives.
//!
//! Implemented by storage backends (e.g. `versa-store-sqlite`, or the
//! in-crate [`MemoryStore`](crate::memory::MemoryStore)). Every operation
//! takes the store handle explicitly; nothing here holds an ambient
//! connection.

use std::future::Future;

use crate::{
  batch::Classify,
  protocol::{EntityHistory, HistoricRow},
  statement::Statement,
  table::VersionedTable,
  value::{Record, Value},
};

/// A transactional store able to run the statement IR.
///
/// Implementations must execute each statement, together with every trigger
/// it fires, atomically: either the primary mutation, its historic mirror and
/// the validity recomputation all commit, or none do.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait VersionedStore: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// Execute one statement and return the number of primary rows it
  /// affected. Trigger-side writes are not counted.
  fn execute<'a>(
    &'a self,
    statement: &'a Statement,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// All historic rows for `id`, in append order.
  fn history<'a>(
    &'a self,
    table: &'a VersionedTable,
    id: &'a Value,
  ) -> impl Future<Output = Result<Vec<HistoricRow>, Self::Error>> + Send + 'a;

  /// The live primary-table row for `id`, if any.
  fn current<'a>(
    &'a self,
    table: &'a VersionedTable,
    id: &'a Value,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;
}

/// The historic row flagged `validity = 1` for `id`.
///
/// Unlike "the latest timestamp", this reflects the maintainer's tie-break and
/// is the row readers should treat as the entity's current version. A valid
/// row tagged `DELETE` means the entity no longer exists.
pub async fn valid_version<S: VersionedStore>(
  store: &S,
  table: &VersionedTable,
  id: &Value,
) -> Result<Option<HistoricRow>, S::Error> {
  let history = EntityHistory::from_rows(store.history(table, id).await?);
  Ok(history.valid().cloned())
}
