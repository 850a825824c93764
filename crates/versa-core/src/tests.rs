//! End-to-end protocol tests against [`MemoryStore`].

use std::sync::{
  Arc,
  atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
  Error,
  batch::{FailureKind, StatementOutcome, apply_batch},
  memory::MemoryStore,
  protocol::{HistoricRow, Operation},
  provision::{plan, provision},
  schema::{Identifier, derive_schema},
  statement::{Insert, Key, Statement, Update},
  store::{VersionedStore, valid_version},
  table::VersionedTable,
  value::{Record, Value},
};

fn ledger() -> VersionedTable {
  let schema = derive_schema([("id", "object"), ("amount", "float64")]).unwrap();
  VersionedTable::new(Identifier::new("ledger").unwrap(), schema).unwrap()
}

/// A clock that advances one second per reading.
fn ticking_clock() -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
  let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  let ticks = Arc::new(AtomicI64::new(0));
  move || start + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst))
}

async fn provisioned(store: MemoryStore) -> (MemoryStore, VersionedTable) {
  let table = ledger();
  provision(&store, &table).await.unwrap();
  (store, table)
}

fn amount(amount: f64) -> Record { Record::new().with("amount", amount) }

// ─── Scenario ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_update_delete_scenario() {
  let (s, t) = provisioned(MemoryStore::with_clock(ticking_clock())).await;
  let id = Value::from("a");

  s.execute(&t.insert(amount(10.0).with("id", "a")).unwrap()).await.unwrap();
  let rows = s.history(&t, &id).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].operation, Operation::Insert);
  assert!(rows[0].valid);

  s.execute(&t.update("a", amount(20.0)).unwrap()).await.unwrap();
  let rows = s.history(&t, &id).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert!(!rows[0].valid);
  assert!(rows[1].valid);
  assert_eq!(rows[1].image.get("amount"), Some(&Value::Real(20.0)));

  s.execute(&t.delete("a").unwrap()).await.unwrap();
  let rows = s.history(&t, &id).await.unwrap();
  assert_eq!(rows.len(), 3);
  assert_eq!(rows[2].operation, Operation::Delete);
  assert_eq!(rows[2].image.get("amount"), Some(&Value::Real(20.0)));
  assert!(rows[2].valid);
  assert_eq!(rows.iter().filter(|r| r.valid).count(), 1);

  assert!(s.current(&t, &id).await.unwrap().is_none());
}

// ─── Properties ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_mutation_mirrors_exactly_one_row() {
  let (s, t) = provisioned(MemoryStore::with_clock(ticking_clock())).await;

  let statements = vec![
    t.insert(amount(1.0).with("id", "x")).unwrap(),
    t.insert(amount(2.0).with("id", "y")).unwrap(),
    t.update("x", amount(3.0)).unwrap(),
    t.update("y", amount(4.0)).unwrap(),
    t.update("x", amount(5.0)).unwrap(),
    t.delete("y").unwrap(),
  ];
  let report = apply_batch(&s, &statements).await;
  assert!(report.is_complete());

  assert_eq!(s.row_count(t.history()).unwrap(), statements.len());

  let ops = |rows: Vec<HistoricRow>| {
    rows.into_iter().map(|r| r.operation).collect::<Vec<_>>()
  };
  assert_eq!(
    ops(s.history(&t, &Value::from("x")).await.unwrap()),
    [Operation::Insert, Operation::Update, Operation::Update]
  );
  assert_eq!(
    ops(s.history(&t, &Value::from("y")).await.unwrap()),
    [Operation::Insert, Operation::Update, Operation::Delete]
  );
}

#[tokio::test]
async fn exactly_one_valid_row_per_identity() {
  let (s, t) = provisioned(MemoryStore::with_clock(ticking_clock())).await;
  let ids = ["p", "q", "r"];

  for id in ids {
    s.execute(&t.insert(amount(0.0).with("id", id)).unwrap()).await.unwrap();
  }
  for round in 1..=3 {
    for id in ids {
      s.execute(&t.update(id, amount(f64::from(round))).unwrap())
        .await
        .unwrap();
    }
  }
  s.execute(&t.delete("q").unwrap()).await.unwrap();

  for id in ids {
    let rows = s.history(&t, &Value::from(id)).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.valid).count(), 1, "{id}");
    let latest = rows.iter().max_by_key(|r| (r.timestamp, r.seq)).unwrap();
    assert!(latest.valid, "{id}");
  }
}

#[tokio::test]
async fn guard_rejects_identity_seen_in_history() {
  let (s, t) = provisioned(MemoryStore::new()).await;
  let id = Value::from("a");

  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();
  s.execute(&t.delete("a").unwrap()).await.unwrap();

  let err = s
    .execute(&t.insert(amount(9.0).with("id", "a")).unwrap())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DuplicateIdentity(_)));

  assert!(s.current(&t, &id).await.unwrap().is_none());
  assert_eq!(s.history(&t, &id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_multi_row_insert_leaves_no_partial_rows() {
  let (s, t) = provisioned(MemoryStore::new()).await;
  s.execute(&t.insert(amount(1.0).with("id", "b")).unwrap()).await.unwrap();

  let bulk = t
    .insert_many([
      amount(1.0).with("id", "a"),
      amount(2.0).with("id", "b"),
      amount(3.0).with("id", "c"),
    ])
    .unwrap();
  assert!(s.execute(&bulk).await.is_err());

  assert_eq!(s.row_count(t.name()).unwrap(), 1);
  assert_eq!(s.row_count(t.history()).unwrap(), 1);
}

#[tokio::test]
async fn provisioning_twice_is_a_no_op() {
  let (s, t) = provisioned(MemoryStore::new()).await;
  let tables = s.tables().unwrap();
  let triggers = s.triggers().unwrap();

  let report = provision(&s, &t).await.unwrap();
  assert!(report.is_complete());
  assert_eq!(s.tables().unwrap(), tables);
  assert_eq!(s.triggers().unwrap(), triggers);
  assert_eq!(triggers.len(), 6);
}

#[tokio::test]
async fn delete_leaves_pre_delete_image_valid() {
  let schema = derive_schema([("id", "int64"), ("name", "string")]).unwrap();
  let t = VersionedTable::new(Identifier::new("people").unwrap(), schema).unwrap();
  let s = MemoryStore::with_clock(ticking_clock());
  provision(&s, &t).await.unwrap();

  s.execute(&t.insert(Record::new().with("id", 7).with("name", "Ada")).unwrap())
    .await
    .unwrap();
  s.execute(&t.update(7, Record::new().with("name", "Ada L.")).unwrap())
    .await
    .unwrap();
  s.execute(&t.delete(7).unwrap()).await.unwrap();

  let id = Value::Integer(7);
  let valid = valid_version(&s, &t, &id).await.unwrap().unwrap();
  assert_eq!(valid.operation, Operation::Delete);
  assert_eq!(valid.image.get("name"), Some(&Value::from("Ada L.")));
  assert!(s.current(&t, &id).await.unwrap().is_none());
}

#[tokio::test]
async fn simultaneous_timestamps_favour_last_append() {
  let frozen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  let (s, t) = provisioned(MemoryStore::with_clock(move || frozen)).await;

  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();
  s.execute(&t.update("a", amount(2.0)).unwrap()).await.unwrap();
  s.execute(&t.update("a", amount(3.0)).unwrap()).await.unwrap();

  let rows = s.history(&t, &Value::from("a")).await.unwrap();
  assert!(rows.iter().all(|r| r.timestamp == frozen));
  let valid: Vec<_> = rows.iter().filter(|r| r.valid).collect();
  assert_eq!(valid.len(), 1);
  assert_eq!(valid[0].image.get("amount"), Some(&Value::Real(3.0)));
}

#[tokio::test]
async fn identity_freeze_blocks_direct_identity_update() {
  let (s, t) = provisioned(MemoryStore::new()).await;
  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();

  // Bypasses the builder, as an ad hoc statement would.
  let rename = Statement::Update(Update {
    table:       t.name().clone(),
    assignments: vec![(t.identity().clone(), Value::from("b"))],
    key:         Key { column: t.identity().clone(), value: Value::from("a") },
  });
  let err = s.execute(&rename).await.unwrap_err();
  assert!(matches!(err, Error::ImmutableIdentity(_)));
  assert_eq!(s.history(&t, &Value::from("a")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn null_identity_is_refused_by_the_store() {
  let (s, t) = provisioned(MemoryStore::new()).await;

  // Bypasses the builder's identity check.
  let anonymous = Statement::Insert(Insert {
    table:   t.name().clone(),
    columns: t.schema().column_names().cloned().collect(),
    rows:    vec![vec![Value::Null, Value::Real(1.0)]],
  });
  for _ in 0..2 {
    let err = s.execute(&anonymous).await.unwrap_err();
    assert!(matches!(err, Error::NotNull { ref column, .. } if column == "id"));
  }
  assert_eq!(s.row_count(t.name()).unwrap(), 0);
  assert_eq!(s.row_count(t.history()).unwrap(), 0);
}

// ─── Batch executor ──────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_halts_at_first_failure_and_keeps_prior_work() {
  let (s, t) = provisioned(MemoryStore::new()).await;

  let statements = vec![
    t.insert(amount(1.0).with("id", "a")).unwrap(),
    t.insert(amount(2.0).with("id", "a")).unwrap(),
    t.insert(amount(3.0).with("id", "b")).unwrap(),
  ];
  let report = apply_batch(&s, &statements).await;

  assert!(!report.is_complete());
  assert_eq!(report.applied(), 1);
  let (failed, failure) = report.failure().unwrap();
  assert_eq!(failed.index, 1);
  assert_eq!(failure.kind, FailureKind::DuplicateIdentity);
  assert_eq!(report.statements[2].outcome, StatementOutcome::Skipped);

  assert!(s.current(&t, &Value::from("a")).await.unwrap().is_some());
  assert!(s.current(&t, &Value::from("b")).await.unwrap().is_none());

  assert!(matches!(report.into_result(), Err(Error::DuplicateIdentity(_))));
}

#[tokio::test]
async fn failing_ddl_is_a_provisioning_conflict() {
  let s = MemoryStore::new();
  let t = ledger();

  // Triggers before their tables exist.
  let statements: Vec<_> = plan(&t).into_iter().skip(2).collect();
  let report = apply_batch(&s, &statements).await;
  let (_, failure) = report.failure().unwrap();
  assert_eq!(failure.kind, FailureKind::ProvisioningConflict);
  assert!(matches!(
    report.into_result(),
    Err(Error::ProvisioningConflict { .. })
  ));
}

#[tokio::test]
async fn mutation_on_unprovisioned_table_is_a_statement_failure() {
  let s = MemoryStore::new();
  let t = ledger();
  let report = apply_batch(&s, &[t.insert(amount(1.0).with("id", "a")).unwrap()]).await;
  let (_, failure) = report.failure().unwrap();
  assert_eq!(failure.kind, FailureKind::StatementFailure);
}
