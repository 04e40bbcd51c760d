//! Member registry domain model.
//!
//! # Responsibility
//! - Define the canonical member shape shared by ingestion, storage and
//!   notification.
//!
//! # Invariants
//! - Every member is identified by a stable `MemberNumber`.
//! - Members are never hard-deleted; absence is a `removed` flag.

pub mod member;
