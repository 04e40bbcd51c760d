//! Member repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Stage a monthly snapshot and merge it into `members` while keeping
//!   registry-owned flags intact.
//! - Select pending notification cohorts and mark members as notified.
//!
//! # Invariants
//! - `reconcile_snapshot` is atomic: stage replacement, upsert and removal
//!   marking commit together or not at all.
//! - Flag columns are only ever set to `1` by this module, never cleared.
//! - Read paths reject invalid persisted flag values instead of masking them.

use crate::db::DbError;
use crate::model::member::{
    CohortMember, Member, MemberFlags, MemberNumber, MemberRecord, MemberValidationError,
    NotificationKind,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MEMBER_SELECT_SQL: &str = "SELECT
    member_number,
    first_name,
    last_name,
    designations,
    membership_type,
    join_date,
    end_date,
    terminated_date,
    membership_years,
    email,
    phone,
    organization,
    job_title,
    job_code,
    industry,
    address1,
    address2,
    city,
    state,
    email_opt_out,
    removed,
    welcome_sent,
    terminated_notice_sent
FROM members";

const STAGE_INSERT_SQL: &str = "INSERT INTO stage_members (
    member_number,
    first_name,
    last_name,
    designations,
    membership_type,
    join_date,
    end_date,
    terminated_date,
    membership_years,
    email,
    phone,
    organization,
    job_title,
    job_code,
    industry,
    address1,
    address2,
    city,
    state,
    email_opt_out
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20);";

// Flag columns appear in neither the insert list nor the update set: new rows
// take the column defaults, existing rows keep theirs.
const MERGE_STAGE_SQL: &str = "INSERT INTO members (
    member_number,
    first_name,
    last_name,
    designations,
    membership_type,
    join_date,
    end_date,
    terminated_date,
    membership_years,
    email,
    phone,
    organization,
    job_title,
    job_code,
    industry,
    address1,
    address2,
    city,
    state,
    email_opt_out
)
SELECT
    member_number,
    first_name,
    last_name,
    designations,
    membership_type,
    join_date,
    end_date,
    terminated_date,
    membership_years,
    email,
    phone,
    organization,
    job_title,
    job_code,
    industry,
    address1,
    address2,
    city,
    state,
    email_opt_out
FROM stage_members
WHERE true
ON CONFLICT (member_number) DO UPDATE SET
    first_name = excluded.first_name,
    last_name = excluded.last_name,
    designations = excluded.designations,
    membership_type = excluded.membership_type,
    join_date = excluded.join_date,
    end_date = excluded.end_date,
    terminated_date = excluded.terminated_date,
    membership_years = excluded.membership_years,
    email = excluded.email,
    phone = excluded.phone,
    organization = excluded.organization,
    job_title = excluded.job_title,
    job_code = excluded.job_code,
    industry = excluded.industry,
    address1 = excluded.address1,
    address2 = excluded.address2,
    city = excluded.city,
    state = excluded.state,
    email_opt_out = excluded.email_opt_out;";

const COUNT_NEW_STAGE_ROWS_SQL: &str = "SELECT COUNT(*)
FROM stage_members s
WHERE NOT EXISTS (
    SELECT 1 FROM members m WHERE m.member_number = s.member_number
);";

const MARK_REMOVED_SQL: &str = "UPDATE members
SET removed = 1
WHERE removed = 0
  AND member_number NOT IN (SELECT member_number FROM stage_members);";

const WELCOME_COHORT_SQL: &str = "SELECT member_number, first_name, email
FROM members
WHERE join_date IS NOT NULL
  AND DATE(join_date) > DATE(?1)
  AND welcome_sent = 0
  AND removed = 0
  AND email_opt_out = 0
  AND email IS NOT NULL
  AND TRIM(email) <> ''
ORDER BY member_number ASC;";

const TERMINATION_COHORT_SQL: &str = "SELECT member_number, first_name, email
FROM members
WHERE (
        removed = 1
        OR (terminated_date IS NOT NULL AND DATE(terminated_date) > DATE(?1))
    )
  AND terminated_notice_sent = 0
  AND email_opt_out = 0
  AND email IS NOT NULL
  AND TRIM(email) <> ''
ORDER BY member_number ASC;";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for member persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(MemberValidationError),
    Db(DbError),
    DuplicateMemberNumber(MemberNumber),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateMemberNumber(number) => {
                write!(f, "snapshot contains member number {number} more than once")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted member data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::DuplicateMemberNumber(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<MemberValidationError> for RepoError {
    fn from(value: MemberValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Row counts produced by one snapshot merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Rows in the incoming snapshot.
    pub snapshot_rows: usize,
    /// Snapshot rows that had no registry row yet.
    pub inserted: usize,
    /// Snapshot rows that overwrote an existing registry row.
    pub updated: usize,
    /// Registry rows flagged `removed` by this merge.
    pub newly_removed: usize,
}

/// Repository interface for the member registry.
pub trait MemberRepository {
    /// Replaces the staged snapshot and merges it into the registry.
    fn reconcile_snapshot(&self, snapshot: &[MemberRecord]) -> RepoResult<ReconcileReport>;
    /// Gets one member by number, including removed members.
    fn get_member(&self, member_number: &str) -> RepoResult<Option<Member>>;
    /// Lists every registry member ordered by member number.
    fn list_members(&self) -> RepoResult<Vec<Member>>;
    /// Members joined after `joined_after` who have not been welcomed.
    fn welcome_cohort(&self, joined_after: NaiveDate) -> RepoResult<Vec<CohortMember>>;
    /// Removed members, or members terminated after `terminated_after`, who
    /// have not received a termination notice.
    fn termination_cohort(&self, terminated_after: NaiveDate) -> RepoResult<Vec<CohortMember>>;
    /// Sets the flag for `kind` on every listed member in one transaction.
    ///
    /// Returns how many rows flipped from unset to set.
    fn mark_notified(
        &self,
        kind: NotificationKind,
        member_numbers: &[MemberNumber],
    ) -> RepoResult<usize>;
}

impl<R: MemberRepository + ?Sized> MemberRepository for &R {
    fn reconcile_snapshot(&self, snapshot: &[MemberRecord]) -> RepoResult<ReconcileReport> {
        (**self).reconcile_snapshot(snapshot)
    }

    fn get_member(&self, member_number: &str) -> RepoResult<Option<Member>> {
        (**self).get_member(member_number)
    }

    fn list_members(&self) -> RepoResult<Vec<Member>> {
        (**self).list_members()
    }

    fn welcome_cohort(&self, joined_after: NaiveDate) -> RepoResult<Vec<CohortMember>> {
        (**self).welcome_cohort(joined_after)
    }

    fn termination_cohort(&self, terminated_after: NaiveDate) -> RepoResult<Vec<CohortMember>> {
        (**self).termination_cohort(terminated_after)
    }

    fn mark_notified(
        &self,
        kind: NotificationKind,
        member_numbers: &[MemberNumber],
    ) -> RepoResult<usize> {
        (**self).mark_notified(kind, member_numbers)
    }
}

/// SQLite-backed member repository.
pub struct SqliteMemberRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMemberRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn reconcile_snapshot(&self, snapshot: &[MemberRecord]) -> RepoResult<ReconcileReport> {
        for record in snapshot {
            record.validate()?;
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM stage_members;", [])?;
        stage_records(&tx, snapshot)?;

        let inserted = tx.query_row(COUNT_NEW_STAGE_ROWS_SQL, [], |row| row.get::<_, i64>(0))?;
        let inserted = usize::try_from(inserted).map_err(|_| {
            RepoError::InvalidData(format!("negative staged row count `{inserted}`"))
        })?;
        tx.execute(MERGE_STAGE_SQL, [])?;
        let newly_removed = tx.execute(MARK_REMOVED_SQL, [])?;
        tx.commit()?;

        Ok(ReconcileReport {
            snapshot_rows: snapshot.len(),
            inserted,
            updated: snapshot.len() - inserted,
            newly_removed,
        })
    }

    fn get_member(&self, member_number: &str) -> RepoResult<Option<Member>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEMBER_SELECT_SQL} WHERE member_number = ?1;"))?;
        let mut rows = stmt.query([member_number])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_member_row(row)?));
        }

        Ok(None)
    }

    fn list_members(&self) -> RepoResult<Vec<Member>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEMBER_SELECT_SQL} ORDER BY member_number ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut members = Vec::new();

        while let Some(row) = rows.next()? {
            members.push(parse_member_row(row)?);
        }

        Ok(members)
    }

    fn welcome_cohort(&self, joined_after: NaiveDate) -> RepoResult<Vec<CohortMember>> {
        query_cohort(self.conn, WELCOME_COHORT_SQL, joined_after)
    }

    fn termination_cohort(&self, terminated_after: NaiveDate) -> RepoResult<Vec<CohortMember>> {
        query_cohort(self.conn, TERMINATION_COHORT_SQL, terminated_after)
    }

    fn mark_notified(
        &self,
        kind: NotificationKind,
        member_numbers: &[MemberNumber],
    ) -> RepoResult<usize> {
        if member_numbers.is_empty() {
            return Ok(0);
        }

        let column = flag_column(kind);
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE members SET {column} = 1 WHERE member_number = ?1 AND {column} = 0;"
            ))?;
            for member_number in member_numbers {
                changed += stmt.execute([member_number.as_str()])?;
            }
        }
        tx.commit()?;

        Ok(changed)
    }
}

fn stage_records(tx: &Transaction<'_>, snapshot: &[MemberRecord]) -> RepoResult<()> {
    let mut stmt = tx.prepare(STAGE_INSERT_SQL)?;
    for record in snapshot {
        let result = stmt.execute(params![
            record.member_number.as_str(),
            record.first_name.as_deref(),
            record.last_name.as_deref(),
            record.designations.as_deref(),
            record.membership_type.as_deref(),
            record.join_date,
            record.end_date,
            record.terminated_date,
            record.membership_years,
            record.email.as_deref(),
            record.phone.as_deref(),
            record.organization.as_deref(),
            record.job_title.as_deref(),
            record.job_code.as_deref(),
            record.industry.as_deref(),
            record.address1.as_deref(),
            record.address2.as_deref(),
            record.city.as_deref(),
            record.state.as_deref(),
            bool_to_int(record.email_opt_out),
        ]);

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(RepoError::DuplicateMemberNumber(
                    record.member_number.clone(),
                ));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

fn query_cohort(conn: &Connection, sql: &str, after: NaiveDate) -> RepoResult<Vec<CohortMember>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([after])?;
    let mut cohort = Vec::new();

    while let Some(row) = rows.next()? {
        cohort.push(CohortMember {
            member_number: row.get("member_number")?,
            first_name: row.get("first_name")?,
            email: row.get::<_, String>("email")?.trim().to_string(),
        });
    }

    Ok(cohort)
}

fn parse_member_row(row: &Row<'_>) -> RepoResult<Member> {
    let record = MemberRecord {
        member_number: row.get("member_number")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        designations: row.get("designations")?,
        membership_type: row.get("membership_type")?,
        join_date: row.get("join_date")?,
        end_date: row.get("end_date")?,
        terminated_date: row.get("terminated_date")?,
        membership_years: row.get("membership_years")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        organization: row.get("organization")?,
        job_title: row.get("job_title")?,
        job_code: row.get("job_code")?,
        industry: row.get("industry")?,
        address1: row.get("address1")?,
        address2: row.get("address2")?,
        city: row.get("city")?,
        state: row.get("state")?,
        email_opt_out: parse_flag(row, "email_opt_out")?,
    };
    let flags = MemberFlags {
        removed: parse_flag(row, "removed")?,
        welcome_sent: parse_flag(row, "welcome_sent")?,
        terminated_notice_sent: parse_flag(row, "terminated_notice_sent")?,
    };

    Ok(Member { record, flags })
}

fn parse_flag(row: &Row<'_>, column: &str) -> RepoResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` in members.{column}"
        ))),
    }
}

fn flag_column(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Welcome => "welcome_sent",
        NotificationKind::Termination => "terminated_notice_sent",
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

