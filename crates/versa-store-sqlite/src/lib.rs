//! SQLite backend for the Versa CDC engine.
//!
//! Renders the statement IR as SQLite DDL and triggers, and wraps
//! [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod encode;
mod store;

pub mod dialect;
pub mod error;

pub use dialect::SqliteDialect;
pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
