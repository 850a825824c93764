//! Integration tests for `SqliteStore` against an in-memory database.

use versa_core::{
  Error as CoreError,
  batch::{Classify as _, FailureKind, StatementOutcome, apply_batch},
  protocol::{HistoricRow, Operation},
  provision::provision,
  schema::{Identifier, derive_schema},
  store::{VersionedStore, valid_version},
  table::VersionedTable,
  value::{Record, Value},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn ledger() -> VersionedTable {
  let schema = derive_schema([("id", "object"), ("amount", "float64")]).unwrap();
  VersionedTable::new(Identifier::new("ledger").unwrap(), schema).unwrap()
}

async fn provisioned() -> (SqliteStore, VersionedTable) {
  let s = store().await;
  let t = ledger();
  provision(&s, &t).await.unwrap();
  (s, t)
}

fn amount(amount: f64) -> Record { Record::new().with("amount", amount) }

// ─── Provisioning ────────────────────────────────────────────────────────────

#[tokio::test]
async fn provisioning_creates_tables_and_triggers() {
  let (s, _) = provisioned().await;
  assert_eq!(s.tables().await.unwrap(), ["ledger", "ledger_history"]);
  assert_eq!(
    s.triggers().await.unwrap(),
    [
      "ledger_delete_mirror",
      "ledger_guard",
      "ledger_identity_freeze",
      "ledger_insert_mirror",
      "ledger_update_mirror",
      "ledger_validity_recalc",
    ]
  );
}

#[tokio::test]
async fn provisioning_twice_is_a_no_op() {
  let (s, t) = provisioned().await;
  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();

  let report = provision(&s, &t).await.unwrap();
  assert!(report.is_complete());
  assert!(
    report
      .statements
      .iter()
      .all(|r| r.outcome == StatementOutcome::Applied { rows_affected: 0 })
  );
  assert_eq!(s.triggers().await.unwrap().len(), 6);
  assert_eq!(s.row_count(t.history()).await.unwrap(), 1);
}

// ─── Scenario ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_update_delete_scenario() {
  let (s, t) = provisioned().await;
  let id = Value::from("a");

  s.execute(&t.insert(amount(10.0).with("id", "a")).unwrap()).await.unwrap();
  let rows = s.history(&t, &id).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].operation, Operation::Insert);
  assert!(rows[0].valid);

  s.execute(&t.update("a", amount(20.0)).unwrap()).await.unwrap();
  let rows = s.history(&t, &id).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows.iter().filter(|r| r.valid).count(), 1);
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

#[tokio::test]
async fn rapid_updates_keep_the_last_append_valid() {
  let (s, t) = provisioned().await;
  s.execute(&t.insert(amount(0.0).with("id", "a")).unwrap()).await.unwrap();
  for n in 1..=20 {
    s.execute(&t.update("a", amount(f64::from(n))).unwrap())
      .await
      .unwrap();
  }

  let valid = valid_version(&s, &t, &Value::from("a")).await.unwrap().unwrap();
  assert_eq!(valid.image.get("amount"), Some(&Value::Real(20.0)));
  let rows = s.history(&t, &Value::from("a")).await.unwrap();
  assert_eq!(rows.len(), 21);
  assert_eq!(rows.iter().filter(|r| r.valid).count(), 1);
}

#[tokio::test]
async fn integer_identities_and_timestamps_round_trip() {
  let schema =
    derive_schema([("id", "int64"), ("seen_at", "datetime64[ns]")]).unwrap();
  let t = VersionedTable::new(Identifier::new("sightings").unwrap(), schema).unwrap();
  let s = store().await;
  provision(&s, &t).await.unwrap();

  let record = Record::new().with("id", 7).with("seen_at", "2024-03-01T12:00:00Z");
  s.execute(&t.insert(record).unwrap()).await.unwrap();

  let current = s.current(&t, &Value::Integer(7)).await.unwrap().unwrap();
  assert!(matches!(current.get("seen_at"), Some(Value::Timestamp(_))));
  let history = s.history(&t, &Value::Integer(7)).await.unwrap();
  assert_eq!(history[0].image, current);
}

// ─── Properties ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_mutation_mirrors_exactly_one_row() {
  let (s, t) = provisioned().await;

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
  assert_eq!(s.row_count(t.history()).await.unwrap(), statements.len() as u64);

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
  let (s, t) = provisioned().await;
  let ids = ["p", "q", "r"];

  s.execute(
    &t.insert_many(ids.map(|id| amount(0.0).with("id", id)))
      .unwrap(),
  )
  .await
  .unwrap();
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

// ─── Guards ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn guard_rejects_duplicate_and_deleted_identities() {
  let (s, t) = provisioned().await;
  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();

  let err = s
    .execute(&t.insert(amount(2.0).with("id", "a")).unwrap())
    .await
    .unwrap_err();
  assert_eq!(err.failure_kind(), FailureKind::DuplicateIdentity);

  s.execute(&t.delete("a").unwrap()).await.unwrap();
  let err = s
    .execute(&t.insert(amount(3.0).with("id", "a")).unwrap())
    .await
    .unwrap_err();
  assert_eq!(err.failure_kind(), FailureKind::DuplicateIdentity);
  assert_eq!(s.history(&t, &Value::from("a")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_multi_row_insert_is_atomic() {
  let (s, t) = provisioned().await;
  s.execute(&t.insert(amount(1.0).with("id", "b")).unwrap()).await.unwrap();

  let bulk = t
    .insert_many([amount(1.0).with("id", "a"), amount(2.0).with("id", "b")])
    .unwrap();
  assert!(s.execute(&bulk).await.is_err());
  assert_eq!(s.row_count(t.name()).await.unwrap(), 1);
  assert_eq!(s.row_count(t.history()).await.unwrap(), 1);
}

#[tokio::test]
async fn identity_updates_are_refused() {
  let (s, t) = provisioned().await;
  s.execute(&t.insert(amount(1.0).with("id", "a")).unwrap()).await.unwrap();

  let err = s
    .execute_raw("UPDATE ledger SET id = 'b' WHERE id = 'a'")
    .await
    .unwrap_err();
  assert_eq!(err.failure_kind(), FailureKind::StatementFailure);
  assert!(err.to_string().contains("identity is immutable"));
  assert!(s.current(&t, &Value::from("a")).await.unwrap().is_some());
}

#[tokio::test]
async fn raw_inserts_without_identity_are_refused() {
  let (s, t) = provisioned().await;
  for _ in 0..2 {
    let err = s
      .execute_raw("INSERT INTO ledger (amount) VALUES (1.0)")
      .await
      .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::StatementFailure);
    assert!(err.to_string().contains("NOT NULL"));
  }
  assert_eq!(s.row_count(t.name()).await.unwrap(), 0);
  assert_eq!(s.row_count(t.history()).await.unwrap(), 0);
}

#[tokio::test]
async fn raw_statements_are_mirrored() {
  let (s, t) = provisioned().await;
  s.execute_raw("INSERT INTO ledger (id, amount) VALUES ('r', 1.5)")
    .await
    .unwrap();
  s.execute_raw("UPDATE ledger SET amount = amount * 2 WHERE id = 'r'")
    .await
    .unwrap();

  let rows = s.history(&t, &Value::from("r")).await.unwrap();
  let ops: Vec<_> = rows.iter().map(|r| r.operation).collect();
  assert_eq!(ops, [Operation::Insert, Operation::Update]);
  assert_eq!(rows[1].image.get("amount"), Some(&Value::Real(3.0)));
}

// ─── Batches ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_halts_at_the_guard() {
  let (s, t) = provisioned().await;
  let statements = vec![
    t.insert(amount(1.0).with("id", "a")).unwrap(),
    t.update("a", amount(2.0)).unwrap(),
    t.insert(amount(3.0).with("id", "a")).unwrap(),
    t.delete("a").unwrap(),
  ];

  let report = apply_batch(&s, &statements).await;
  assert_eq!(report.applied(), 2);
  let (failed, failure) = report.failure().unwrap();
  assert_eq!(failed.index, 2);
  assert_eq!(failure.kind, FailureKind::DuplicateIdentity);
  assert_eq!(report.statements[3].outcome, StatementOutcome::Skipped);

  let current = s.current(&t, &Value::from("a")).await.unwrap().unwrap();
  assert_eq!(current.get("amount"), Some(&Value::Real(2.0)));
}

#[tokio::test]
async fn unprovisioned_table_fails_the_statement() {
  let s = store().await;
  let t = ledger();
  let report = apply_batch(&s, &[t.delete("a").unwrap()]).await;
  let (_, failure) = report.failure().unwrap();
  assert_eq!(failure.kind, FailureKind::StatementFailure);
  assert!(failure.message.contains("no such table"));
}

// ─── Connectivity ────────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_connection_is_store_unavailable() {
  let s = store().await;
  let other = s.clone();
  s.close().await.unwrap();

  let t = ledger();
  let err = other
    .execute(&t.insert(amount(1.0).with("id", "a")).unwrap())
    .await
    .unwrap_err();
  assert_eq!(err.failure_kind(), FailureKind::StoreUnavailable);

  let err = provision(&other, &t).await.unwrap_err();
  assert!(matches!(err, CoreError::StoreUnavailable(_)));
}
