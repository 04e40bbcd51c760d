//! Snapshot reconciliation use-case.
//!
//! # Invariants
//! - Members in the snapshot get every attribute replaced; flags are kept.
//! - Members missing from the snapshot are flagged `removed`, never deleted.
//! - The merge is atomic; a failure leaves the registry as it was.

use crate::model::member::MemberRecord;
use crate::repo::member_repo::{MemberRepository, ReconcileReport, RepoResult};
use log::{error, info};
use std::time::Instant;

/// Merges monthly snapshots into the member registry.
pub struct ReconcileService<R: MemberRepository> {
    repo: R,
}

impl<R: MemberRepository> ReconcileService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Replaces registry attributes from `snapshot` and flags absentees.
    ///
    /// Running it twice with the same snapshot changes nothing the second
    /// time: `newly_removed` is zero and every row counts as `updated`.
    pub fn reconcile(&self, snapshot: &[MemberRecord]) -> RepoResult<ReconcileReport> {
        let started_at = Instant::now();
        info!(
            "event=reconcile module=service status=start snapshot_rows={}",
            snapshot.len()
        );

        match self.repo.reconcile_snapshot(snapshot) {
            Ok(report) => {
                info!(
                    "event=reconcile module=service status=ok inserted={} updated={} newly_removed={} duration_ms={}",
                    report.inserted,
                    report.updated,
                    report.newly_removed,
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=reconcile module=service status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}
