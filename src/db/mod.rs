//! Database module for slamon.
//!
//! Provides the agent/check data model and SQLite storage with embedded
//! migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
