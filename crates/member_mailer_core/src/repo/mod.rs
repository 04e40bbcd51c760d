//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the member registry.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Write paths must call `MemberRecord::validate()` before SQL mutations.
//! - Multi-statement mutations run inside one SQLite transaction.

pub mod member_repo;
