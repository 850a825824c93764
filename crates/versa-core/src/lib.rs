//! Core types for the Versa change-data-capture engine.
//!
//! Given a schema and a table name, this crate derives the statements that
//! provision a primary table, its append-only `_history` twin, and the trigger
//! cascade that mirrors every mutation into the history and keeps exactly one
//! row per identity marked valid.
//!
//! The crate is free of database dependencies. Stores implement
//! [`store::VersionedStore`] and render the [`statement`] IR in their own
//! dialect; [`memory::MemoryStore`] interprets it directly.

pub mod batch;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod provision;
pub mod schema;
pub mod statement;
pub mod store;
pub mod table;
pub mod value;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
