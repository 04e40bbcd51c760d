//! Member domain model.
//!
//! # Responsibility
//! - Define attribute records loaded from the monthly snapshot.
//! - Define the notification-state flags tracked per member.
//!
//! # Invariants
//! - `member_number` is non-blank and unique across the registry.
//! - Flags are monotonic: normal operation only ever sets them to `true`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable member identifier issued by the organization (`GAN` column).
pub type MemberNumber = String;

/// Member attributes as they appear in one snapshot row.
///
/// Every field except `member_number` and `email_opt_out` is optional because
/// the source spreadsheet routinely leaves cells blank.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_number: MemberNumber,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub designations: Option<String>,
    pub membership_type: Option<String>,
    pub join_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub terminated_date: Option<NaiveDate>,
    pub membership_years: Option<f64>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub job_title: Option<String>,
    pub job_code: Option<String>,
    pub industry: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub email_opt_out: bool,
}

impl MemberRecord {
    /// Creates a record with only the identifier set.
    pub fn new(member_number: impl Into<MemberNumber>) -> Self {
        Self {
            member_number: member_number.into(),
            ..Self::default()
        }
    }

    /// Validates record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), MemberValidationError> {
        if self.member_number.trim().is_empty() {
            return Err(MemberValidationError::EmptyMemberNumber);
        }
        if self.member_number.trim() != self.member_number {
            return Err(MemberValidationError::UntrimmedMemberNumber(
                self.member_number.clone(),
            ));
        }
        if let Some(years) = self.membership_years {
            if !years.is_finite() || years < 0.0 {
                return Err(MemberValidationError::InvalidMembershipYears {
                    member_number: self.member_number.clone(),
                    value: years,
                });
            }
        }
        Ok(())
    }
}

/// Notification-state flags owned by the registry, never by the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberFlags {
    /// Member was absent from a snapshot at some point.
    pub removed: bool,
    /// Welcome message was accepted by the mail transport.
    pub welcome_sent: bool,
    /// Termination notice was accepted by the mail transport.
    pub terminated_notice_sent: bool,
}

/// Persisted member: snapshot attributes plus registry flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(flatten)]
    pub record: MemberRecord,
    #[serde(flatten)]
    pub flags: MemberFlags,
}

impl Member {
    pub fn member_number(&self) -> &str {
        self.record.member_number.as_str()
    }
}

/// Kind of notification a cohort is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent once to members who joined after the program start.
    Welcome,
    /// Sent once to members who were removed or terminated.
    Termination,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Termination => "termination",
        }
    }
}

/// Minimal projection of a member needed to render and address a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMember {
    pub member_number: MemberNumber,
    pub first_name: Option<String>,
    pub email: String,
}

impl CohortMember {
    /// Returns the first whitespace-delimited token of the stored first name.
    ///
    /// Stored names often carry middle initials or suffixes (`"Jane Q"`), so
    /// only the leading token is used in greetings. Returns `None` when the
    /// name is missing or blank.
    pub fn greeting_name(&self) -> Option<&str> {
        self.first_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
    }
}

/// Record validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberValidationError {
    EmptyMemberNumber,
    UntrimmedMemberNumber(String),
    InvalidMembershipYears { member_number: String, value: f64 },
}

impl Display for MemberValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMemberNumber => write!(f, "member number cannot be empty"),
            Self::UntrimmedMemberNumber(value) => {
                write!(f, "member number `{value}` has surrounding whitespace")
            }
            Self::InvalidMembershipYears {
                member_number,
                value,
            } => write!(
                f,
                "member {member_number} has invalid membership years `{value}`"
            ),
        }
    }
}

impl Error for MemberValidationError {}
