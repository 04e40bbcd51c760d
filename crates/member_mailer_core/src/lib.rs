//! Core logic for the monthly member mailer.
//! This crate owns the member registry, snapshot reconciliation and the
//! welcome/termination notification passes.

pub mod config;
pub mod db;
pub mod ingest;
pub mod logging;
pub mod mail;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, RunConfig, SmtpCredentials};
pub use ingest::{load_snapshot, SnapshotError};
pub use logging::{default_log_level, flush_logging, init_logging, logging_status};
pub use mail::{MailError, MailTransport, MessageTemplate, OutgoingMessage, SmtpMailer};
pub use model::member::{
    CohortMember, Member, MemberFlags, MemberNumber, MemberRecord, MemberValidationError,
    NotificationKind,
};
pub use repo::member_repo::{
    MemberRepository, ReconcileReport, RepoError, RepoResult, SqliteMemberRepository,
};
pub use service::cohort_service::{CohortService, ProgramDates};
pub use service::notify_service::{NotifyError, NotifyReport, NotifyService, SenderIdentity};
pub use service::reconcile_service::ReconcileService;
pub use service::run_service::{run_monthly, run_with, RunError, RunPlan, RunReport};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
