//! SQLite backend for the vouch entitlement store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. The single serialized connection
//! also serializes read-modify-write cycles issued through one handle.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
