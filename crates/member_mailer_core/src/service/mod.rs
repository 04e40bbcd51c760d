//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository and transport calls into the monthly run.
//! - Keep the CLI decoupled from storage and relay details.

pub mod cohort_service;
pub mod notify_service;
pub mod reconcile_service;
pub mod run_service;
