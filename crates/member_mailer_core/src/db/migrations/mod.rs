//! Member registry schema history.
//!
//! | version | file | change |
//! |---|---|---|
//! | 1 | `0001_members.sql` | `members` table with the three notification flags and the cohort indexes |
//! | 2 | `0002_stage_members.sql` | `stage_members` table the monthly snapshot is staged into before merging |
//!
//! # Invariants
//! - Versions are contiguous from 1; a shipped migration is never edited.
//! - `PRAGMA user_version` equals the last applied version.
//! - Pending migrations apply in one transaction; a failure leaves the
//!   registry at its previous version.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "members",
        sql: include_str!("0001_members.sql"),
    },
    Migration {
        version: 2,
        name: "stage_members",
        sql: include_str!("0002_stage_members.sql"),
    },
];

/// Schema version this binary writes.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings the registry up to `latest_version()` and returns how many
/// migrations ran.
///
/// A registry written by a newer binary is refused rather than downgraded.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let from_version = registry_version(conn)?;
    let latest = latest_version();
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > from_version)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for migration in &pending {
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    Ok(pending.len())
}

fn registry_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
