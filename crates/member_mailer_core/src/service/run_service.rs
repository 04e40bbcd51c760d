//! Monthly run orchestration.
//!
//! # Responsibility
//! - Sequence ingest, reconcile, welcome pass and termination pass.
//! - Own the database connection and mail transport for the run.
//!
//! # Invariants
//! - Config and snapshot errors surface before the registry is touched.
//! - Connection and transport are released on every exit path (drop).

use crate::config::{ConfigError, ConfigResult, ProgramConfig, RunConfig, SmtpCredentials};
use crate::db::{open_db, DbError};
use crate::ingest::{load_snapshot, SnapshotError};
use crate::mail::{MailError, MailTransport, MessageTemplate, SmtpMailer};
use crate::model::member::{MemberRecord, NotificationKind};
use crate::repo::member_repo::{ReconcileReport, RepoError, SqliteMemberRepository};
use crate::service::cohort_service::{CohortService, ProgramDates};
use crate::service::notify_service::{NotifyError, NotifyReport, NotifyService, SenderIdentity};
use crate::service::reconcile_service::ReconcileService;
use log::{error, info};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Everything a run needs besides its resources.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub dates: ProgramDates,
    pub sender: SenderIdentity,
    pub fallback_greeting: String,
    pub welcome: MessageTemplate,
    /// `None` skips the termination pass.
    pub termination: Option<MessageTemplate>,
}

impl RunPlan {
    /// Resolves dates, sender identity and templates from config.
    pub fn from_config(config: &RunConfig) -> ConfigResult<Self> {
        let termination = if config.termination.enabled {
            Some(config.termination_template()?)
        } else {
            None
        };

        Ok(Self {
            dates: config.program.into(),
            sender: SenderIdentity {
                display_name: config.sender.display_name.trim().to_string(),
                address: config.sender.address.trim().to_string(),
            },
            fallback_greeting: config.fallback_greeting.trim().to_string(),
            welcome: config.welcome_template()?,
            termination,
        })
    }
}

impl From<ProgramConfig> for ProgramDates {
    fn from(value: ProgramConfig) -> Self {
        Self {
            new_member_start: value.new_member_start,
            terminated_member_start: value.terminated_member_start,
        }
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub reconcile: ReconcileReport,
    pub welcome: NotifyReport,
    pub termination: Option<NotifyReport>,
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {}: snapshot_rows={} inserted={} updated={} newly_removed={} welcome_sent={}/{}",
            self.run_id,
            self.reconcile.snapshot_rows,
            self.reconcile.inserted,
            self.reconcile.updated,
            self.reconcile.newly_removed,
            self.welcome.sent,
            self.welcome.attempted
        )?;
        match &self.termination {
            Some(report) => write!(
                f,
                " termination_sent={}/{}",
                report.sent, report.attempted
            ),
            None => write!(f, " termination=skipped"),
        }
    }
}

/// Top-level run failure.
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Snapshot(SnapshotError),
    Db(DbError),
    Repo(RepoError),
    Mail(MailError),
    Notify(NotifyError),
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Snapshot(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "member database error: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Mail(err) => write!(f, "{err}"),
            Self::Notify(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Snapshot(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Mail(err) => Some(err),
            Self::Notify(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<SnapshotError> for RunError {
    fn from(value: SnapshotError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<DbError> for RunError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for RunError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<MailError> for RunError {
    fn from(value: MailError) -> Self {
        Self::Mail(value)
    }
}

impl From<NotifyError> for RunError {
    fn from(value: NotifyError) -> Self {
        Self::Notify(value)
    }
}

/// Runs the full monthly job against the configured files and relay.
///
/// Order of acquisition: templates, snapshot, database, relay login. Each
/// failure aborts before later steps; the registry is first written by the
/// reconcile step, after the relay accepted our login.
pub fn run_monthly(config: &RunConfig, credentials: &SmtpCredentials) -> Result<RunReport, RunError> {
    let plan = RunPlan::from_config(config)?;
    let snapshot = load_snapshot(&config.paths.snapshot, config.paths.sheet.as_deref())?;
    let conn = open_db(&config.paths.database)?;
    let mut mailer = SmtpMailer::connect(
        &config.smtp_settings(),
        &credentials.username,
        &credentials.password,
    )?;

    run_with(&conn, &snapshot, &mut mailer, &plan)
}

/// Runs reconcile and both notification passes on caller-owned resources.
pub fn run_with<T: MailTransport>(
    conn: &Connection,
    snapshot: &[MemberRecord],
    transport: &mut T,
    plan: &RunPlan,
) -> Result<RunReport, RunError> {
    let run_id = Uuid::new_v4();
    let started_at = Instant::now();
    info!(
        "event=run module=service status=start run_id={} snapshot_rows={}",
        run_id,
        snapshot.len()
    );

    let result = run_steps(conn, snapshot, transport, plan, run_id);
    match &result {
        Ok(report) => info!(
            "event=run module=service status=ok run_id={} duration_ms={} welcome_sent={} termination_sent={}",
            run_id,
            started_at.elapsed().as_millis(),
            report.welcome.sent,
            report.termination.map_or(0, |termination| termination.sent)
        ),
        Err(err) => error!(
            "event=run module=service status=error run_id={} duration_ms={} error={}",
            run_id,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn run_steps<T: MailTransport>(
    conn: &Connection,
    snapshot: &[MemberRecord],
    transport: &mut T,
    plan: &RunPlan,
    run_id: Uuid,
) -> Result<RunReport, RunError> {
    let repo = SqliteMemberRepository::new(conn);

    let reconcile = ReconcileService::new(&repo).reconcile(snapshot)?;

    let cohorts = CohortService::new(&repo, plan.dates);
    let mut notifier = NotifyService::new(
        &repo,
        transport,
        plan.sender.clone(),
        plan.fallback_greeting.as_str(),
    );

    let welcome_cohort = cohorts.cohort(NotificationKind::Welcome)?;
    let welcome =
        notifier.notify_cohort(NotificationKind::Welcome, &plan.welcome, &welcome_cohort)?;

    let termination = match &plan.termination {
        Some(template) => {
            let cohort = cohorts.cohort(NotificationKind::Termination)?;
            Some(notifier.notify_cohort(NotificationKind::Termination, template, &cohort)?)
        }
        None => {
            info!("event=notify module=service status=skipped kind=termination");
            None
        }
    };

    Ok(RunReport {
        run_id,
        reconcile,
        welcome,
        termination,
    })
}
