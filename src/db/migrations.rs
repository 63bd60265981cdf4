//! Schema versioning through `PRAGMA user_version`.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps. Step `n` (1-based) upgrades a ledger at version
/// `n - 1` to version `n`.
const MIGRATIONS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Brings the ledger up to the current schema in a single transaction.
/// A ledger written by a newer build is refused rather than downgraded.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > CURRENT_SCHEMA_VERSION {
        bail!("ledger schema v{found} is newer than this build supports (v{CURRENT_SCHEMA_VERSION})");
    }

    let pending = &MIGRATIONS[found.max(0) as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, sql) in pending {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("Ledger schema migrated from v{found} to v{CURRENT_SCHEMA_VERSION}");
    Ok(())
}
