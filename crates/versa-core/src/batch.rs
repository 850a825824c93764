//! Batch executor: ordered, fail-fast application of statements with a
//! classified per-statement report.

use serde::Serialize;
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{Error, Result, statement::Statement, store::VersionedStore};

// ─── Classification ──────────────────────────────────────────────────────────

/// The closed set of failure kinds surfaced to callers.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
  /// Schema derivation saw an unmapped source type.
  UnsupportedType,
  /// The insert guard rejected an identity already present in history.
  DuplicateIdentity,
  /// A DDL statement failed for a reason other than "already exists".
  ProvisioningConflict,
  /// Any other statement failure.
  StatementFailure,
  /// Connectivity or transport failure; never retried here.
  StoreUnavailable,
}

/// Implemented by store errors so the executor can classify them.
pub trait Classify {
  fn failure_kind(&self) -> FailureKind;
}

/// A classified statement failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
  pub kind:    FailureKind,
  pub message: String,
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatementOutcome {
  Applied { rows_affected: u64 },
  Failed(Failure),
  /// Not attempted because an earlier statement failed.
  Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementReport {
  pub index:     usize,
  /// Short description, e.g. `insert into orders`.
  pub statement: String,
  pub outcome:   StatementOutcome,
}

/// The result of [`apply_batch`]: one entry per submitted statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub batch_id:   Uuid,
  pub statements: Vec<StatementReport>,
}

impl BatchReport {
  /// Whether every statement was applied.
  pub fn is_complete(&self) -> bool {
    self
      .statements
      .iter()
      .all(|s| matches!(s.outcome, StatementOutcome::Applied { .. }))
  }

  /// Number of statements that committed.
  pub fn applied(&self) -> usize {
    self
      .statements
      .iter()
      .filter(|s| matches!(s.outcome, StatementOutcome::Applied { .. }))
      .count()
  }

  /// The statement that halted the batch.
  pub fn failure(&self) -> Option<(&StatementReport, &Failure)> {
    self.statements.iter().find_map(|s| match &s.outcome {
      StatementOutcome::Failed(f) => Some((s, f)),
      _ => None,
    })
  }

  /// `Ok(self)` when complete, otherwise the halting failure as an [`Error`].
  ///
  /// Statements before the failure remain committed.
  pub fn into_result(self) -> Result<Self> {
    let halted = self
      .failure()
      .map(|(report, failure)| (report.index, report.statement.clone(), failure.clone()));
    let Some((index, statement, failure)) = halted else {
      return Ok(self);
    };

    let message = failure.message;
    Err(match failure.kind {
      FailureKind::DuplicateIdentity => Error::DuplicateIdentity(message),
      FailureKind::StoreUnavailable => Error::StoreUnavailable(message),
      FailureKind::ProvisioningConflict => {
        Error::ProvisioningConflict { statement, message }
      }
      FailureKind::UnsupportedType | FailureKind::StatementFailure => {
        Error::StatementFailure { index, statement, message }
      }
    })
  }
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Execute `statements` strictly in order, stopping at the first failure.
///
/// Each statement commits on its own; there is no rollback across statements,
/// so a halted batch is partially applied. Statements after the failure are
/// reported as [`StatementOutcome::Skipped`].
pub async fn apply_batch<S: VersionedStore>(
  store: &S,
  statements: &[Statement],
) -> BatchReport {
  let batch_id = Uuid::new_v4();
  let span = tracing::info_span!("batch", %batch_id, statements = statements.len());
  run_batch(store, statements, batch_id).instrument(span).await
}

async fn run_batch<S: VersionedStore>(
  store: &S,
  statements: &[Statement],
  batch_id: Uuid,
) -> BatchReport {
  tracing::info!("applying batch");
  let mut reports = Vec::with_capacity(statements.len());
  let mut halted = false;

  for (index, statement) in statements.iter().enumerate() {
    let description = statement.to_string();

    let outcome = if halted {
      StatementOutcome::Skipped
    } else {
      tracing::debug!(index, statement = %description, "executing");
      match store.execute(statement).await {
        Ok(rows_affected) => StatementOutcome::Applied { rows_affected },
        Err(e) => {
          halted = true;
          let failure = classify(statement, &e);
          tracing::warn!(
            index,
            statement = %description,
            kind = %failure.kind,
            "statement failed: {}",
            failure.message,
          );
          StatementOutcome::Failed(failure)
        }
      }
    };

    reports.push(StatementReport { index, statement: description, outcome });
  }

  let report = BatchReport { batch_id, statements: reports };
  tracing::info!(
    applied = report.applied(),
    complete = report.is_complete(),
    "batch finished"
  );
  report
}

/// DDL failures that are not transport problems are provisioning conflicts.
fn classify<E: std::error::Error + Classify>(statement: &Statement, error: &E) -> Failure {
  let kind = match error.failure_kind() {
    FailureKind::StatementFailure if statement.is_ddl() => FailureKind::ProvisioningConflict,
    kind => kind,
  };
  Failure { kind, message: error.to_string() }
}
