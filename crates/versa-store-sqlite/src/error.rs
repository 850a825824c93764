//! Error type for `versa-store-sqlite`, and its classification.

use rusqlite::ErrorCode;
use thiserror::Error;
use versa_core::{
  batch::{Classify, FailureKind},
  protocol::DUPLICATE_IDENTITY,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] versa_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// A stored cell could not be read back as its column's logical type.
  #[error("cannot decode column {column:?}: {reason}")]
  Decode { column: String, reason: String },
}

impl Classify for Error {
  fn failure_kind(&self) -> FailureKind {
    match self {
      Error::Core(e) => e.failure_kind(),
      Error::Database(tokio_rusqlite::Error::Rusqlite(e)) => classify_sqlite(e),
      Error::Database(
        tokio_rusqlite::Error::ConnectionClosed | tokio_rusqlite::Error::Close(_),
      ) => FailureKind::StoreUnavailable,
      _ => FailureKind::StatementFailure,
    }
  }
}

fn classify_sqlite(e: &rusqlite::Error) -> FailureKind {
  let rusqlite::Error::SqliteFailure(err, message) = e else {
    return FailureKind::StatementFailure;
  };

  match err.code {
    ErrorCode::ConstraintViolation if message.as_deref() == Some(DUPLICATE_IDENTITY) => {
      FailureKind::DuplicateIdentity
    }
    ErrorCode::DatabaseBusy
    | ErrorCode::DatabaseLocked
    | ErrorCode::CannotOpen
    | ErrorCode::SystemIoFailure
    | ErrorCode::NotADatabase
    | ErrorCode::PermissionDenied => FailureKind::StoreUnavailable,
    _ => FailureKind::StatementFailure,
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
