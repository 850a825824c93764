//! Table provisioner: the ordered DDL that sets up a versioned table.

use crate::{
  Error, Result,
  batch::{BatchReport, FailureKind, apply_batch},
  protocol::Operation,
  schema::Identifier,
  statement::{
    CreateIndex, CreateTable, Event, Image, Statement, Timing, Trigger, TriggerAction,
  },
  store::VersionedStore,
  table::VersionedTable,
};

/// The provisioning script for `table`, in execution order:
///
/// 1. primary table
/// 2. history table
/// 3. identity guard (before insert)
/// 4. insert, update and delete mirrors
/// 5. validity recomputation (after insert on history)
/// 6. identity freeze (before update of the identity column)
/// 7. history identity index
///
/// Every statement is "if not exists", so the script can run on every start.
pub fn plan(table: &VersionedTable) -> Vec<Statement> {
  let names = table.names();
  let identity = table.identity().clone();
  let image_columns: Vec<_> = table.schema().column_names().cloned().collect();

  let mirror = |name: &Identifier, timing, event, image, operation| {
    Statement::CreateTrigger(Trigger {
      name: name.clone(),
      timing,
      event,
      table: names.primary.clone(),
      action: TriggerAction::Mirror {
        history: names.history.clone(),
        columns: image_columns.clone(),
        image,
        operation,
      },
    })
  };

  vec![
    Statement::CreateTable(CreateTable {
      name:    names.primary.clone(),
      columns: table.columns(),
    }),
    Statement::CreateTable(CreateTable {
      name:    names.history.clone(),
      columns: table.history_columns(),
    }),
    Statement::CreateTrigger(Trigger {
      name:   names.guard.clone(),
      timing: Timing::Before,
      event:  Event::Insert,
      table:  names.primary.clone(),
      action: TriggerAction::RejectExistingIdentity {
        history:  names.history.clone(),
        identity: identity.clone(),
      },
    }),
    mirror(
      &names.insert_mirror,
      Timing::After,
      Event::Insert,
      Image::New,
      Operation::Insert,
    ),
    mirror(
      &names.update_mirror,
      Timing::After,
      Event::Update { of: None },
      Image::New,
      Operation::Update,
    ),
    // Before delete: the row must still be readable.
    mirror(
      &names.delete_mirror,
      Timing::Before,
      Event::Delete,
      Image::Old,
      Operation::Delete,
    ),
    Statement::CreateTrigger(Trigger {
      name:   names.validity_recalc.clone(),
      timing: Timing::After,
      event:  Event::Insert,
      table:  names.history.clone(),
      action: TriggerAction::RecomputeValidity { identity: identity.clone() },
    }),
    Statement::CreateTrigger(Trigger {
      name:   names.identity_freeze.clone(),
      timing: Timing::Before,
      event:  Event::Update { of: Some(identity.clone()) },
      table:  names.primary.clone(),
      action: TriggerAction::RejectIdentityChange { identity: identity.clone() },
    }),
    Statement::CreateIndex(CreateIndex {
      name:    names.history_identity.clone(),
      table:   names.history.clone(),
      columns: vec![identity],
    }),
  ]
}

/// Apply [`plan`] to `store`.
///
/// Any failure is fatal: transport problems surface as
/// [`Error::StoreUnavailable`], everything else as
/// [`Error::ProvisioningConflict`]. Re-provisioning an existing table
/// succeeds without changes.
pub async fn provision<S: VersionedStore>(
  store: &S,
  table: &VersionedTable,
) -> Result<BatchReport> {
  tracing::info!(table = %table.name(), history = %table.history(), "provisioning");
  let report = apply_batch(store, &plan(table)).await;

  match report.failure() {
    None => Ok(report),
    Some((_, failure)) if failure.kind == FailureKind::StoreUnavailable => {
      Err(Error::StoreUnavailable(failure.message.clone()))
    }
    Some((statement, failure)) => Err(Error::ProvisioningConflict {
      statement: statement.statement.clone(),
      message:   failure.message.clone(),
    }),
  }
}
