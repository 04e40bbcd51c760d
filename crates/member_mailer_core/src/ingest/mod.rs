//! Monthly snapshot ingestion.
//!
//! # Responsibility
//! - Read the current-members spreadsheet into typed `MemberRecord`s.
//! - Enforce the fixed column contract before anything touches the registry.
//!
//! # Invariants
//! - Ingestion never mutates the member registry.
//! - Any schema drift or unparseable cell fails the whole load.

pub mod snapshot;

pub use snapshot::{
    load_snapshot, parse_rows, parse_rows_at, SnapshotError, SnapshotResult, REQUIRED_COLUMNS,
};
