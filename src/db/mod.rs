//! Activity ledger: append-only commit records plus per-day aggregates,
//! stored in SQLite.

pub mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{CommitOutcome, DailyStat, StoredCommit};
