//! Cohort selection use-case.
//!
//! # Invariants
//! - Cohorts only contain members whose flag for that kind is unset.
//! - Opted-out members and members without an address are never selected.

use crate::model::member::{CohortMember, NotificationKind};
use crate::repo::member_repo::{MemberRepository, RepoResult};
use chrono::NaiveDate;
use log::info;

/// Start dates of the two notification programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramDates {
    /// Members joining strictly after this date are welcomed.
    pub new_member_start: NaiveDate,
    /// Members terminated strictly after this date get a notice.
    pub terminated_member_start: NaiveDate,
}

/// Computes the members due each kind of notification.
pub struct CohortService<R: MemberRepository> {
    repo: R,
    dates: ProgramDates,
}

impl<R: MemberRepository> CohortService<R> {
    pub fn new(repo: R, dates: ProgramDates) -> Self {
        Self { repo, dates }
    }

    /// Joined after the program start, not welcomed, not removed.
    pub fn new_member_cohort(&self) -> RepoResult<Vec<CohortMember>> {
        self.repo.welcome_cohort(self.dates.new_member_start)
    }

    /// Removed, or terminated after the program start, and not yet notified.
    pub fn terminated_member_cohort(&self) -> RepoResult<Vec<CohortMember>> {
        self.repo
            .termination_cohort(self.dates.terminated_member_start)
    }

    /// Cohort for `kind`.
    pub fn cohort(&self, kind: NotificationKind) -> RepoResult<Vec<CohortMember>> {
        let cohort = match kind {
            NotificationKind::Welcome => self.new_member_cohort()?,
            NotificationKind::Termination => self.terminated_member_cohort()?,
        };
        info!(
            "event=cohort_select module=service status=ok kind={} size={}",
            kind.as_str(),
            cohort.len()
        );
        Ok(cohort)
    }
}
