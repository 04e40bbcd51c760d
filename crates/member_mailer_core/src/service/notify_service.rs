//! Cohort notification use-case.
//!
//! # Responsibility
//! - Render one message per cohort member and hand it to the transport.
//! - Record each accepted message on the member's flag.
//!
//! # Invariants
//! - A member's flag is committed right after the transport accepts their
//!   message, so an aborted batch never leaves a sent member unflagged.
//! - The first transport failure aborts the remaining batch; nothing retries.

use crate::mail::{MailError, MailTransport, MessageTemplate, OutgoingMessage, TemplateContext};
use crate::model::member::{CohortMember, MemberNumber, NotificationKind};
use crate::repo::member_repo::{MemberRepository, RepoError};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Sender identity shown in message signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub display_name: String,
    pub address: String,
}

/// Outcome of one cohort pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub kind: NotificationKind,
    /// Cohort size at selection time.
    pub attempted: usize,
    /// Messages accepted by the transport and flagged.
    pub sent: usize,
}

/// Notification failure. `sent` counts members already flagged before the
/// failure.
#[derive(Debug)]
pub enum NotifyError {
    Transport {
        kind: NotificationKind,
        member_number: MemberNumber,
        sent: usize,
        source: MailError,
    },
    Repo {
        kind: NotificationKind,
        member_number: MemberNumber,
        source: RepoError,
    },
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport {
                kind,
                member_number,
                sent,
                source,
            } => write!(
                f,
                "{} message to member {member_number} failed after {sent} sent: {source}",
                kind.as_str()
            ),
            Self::Repo {
                kind,
                member_number,
                source,
            } => write!(
                f,
                "failed to record {} message for member {member_number}: {source}",
                kind.as_str()
            ),
        }
    }
}

impl Error for NotifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::Repo { source, .. } => Some(source),
        }
    }
}

/// Sends cohort messages and marks members notified.
pub struct NotifyService<R: MemberRepository, T: MailTransport> {
    repo: R,
    transport: T,
    sender: SenderIdentity,
    fallback_greeting: String,
}

impl<R: MemberRepository, T: MailTransport> NotifyService<R, T> {
    pub fn new(
        repo: R,
        transport: T,
        sender: SenderIdentity,
        fallback_greeting: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            transport,
            sender,
            fallback_greeting: fallback_greeting.into(),
        }
    }

    /// Renders `template` for one member.
    pub fn render(&self, template: &MessageTemplate, member: &CohortMember) -> OutgoingMessage {
        let first_name = member
            .greeting_name()
            .unwrap_or(self.fallback_greeting.as_str());
        let context = TemplateContext {
            first_name,
            sender_name: self.sender.display_name.as_str(),
            sender_address: self.sender.address.as_str(),
        };

        OutgoingMessage {
            to: member.email.clone(),
            subject: template.subject().to_string(),
            html_body: template.render(&context),
        }
    }

    /// Sends `template` to every member of `cohort`, flagging each on success.
    pub fn notify_cohort(
        &mut self,
        kind: NotificationKind,
        template: &MessageTemplate,
        cohort: &[CohortMember],
    ) -> Result<NotifyReport, NotifyError> {
        let started_at = Instant::now();
        info!(
            "event=notify module=service status=start kind={} cohort_size={}",
            kind.as_str(),
            cohort.len()
        );

        let mut sent = 0;
        for member in cohort {
            let message = self.render(template, member);
            if let Err(source) = self.transport.send(&message) {
                error!(
                    "event=notify module=service status=error kind={} member_number={} sent={} error_code=send_failed error={}",
                    kind.as_str(),
                    member.member_number,
                    sent,
                    source
                );
                return Err(NotifyError::Transport {
                    kind,
                    member_number: member.member_number.clone(),
                    sent,
                    source,
                });
            }

            self.repo
                .mark_notified(kind, std::slice::from_ref(&member.member_number))
                .map_err(|source| {
                    error!(
                        "event=notify module=service status=error kind={} member_number={} error_code=mark_failed error={}",
                        kind.as_str(),
                        member.member_number,
                        source
                    );
                    NotifyError::Repo {
                        kind,
                        member_number: member.member_number.clone(),
                        source,
                    }
                })?;
            sent += 1;
            info!(
                "event=notify_sent module=service kind={} member_number={}",
                kind.as_str(),
                member.member_number
            );
        }

        info!(
            "event=notify module=service status=ok kind={} sent={} duration_ms={}",
            kind.as_str(),
            sent,
            started_at.elapsed().as_millis()
        );
        Ok(NotifyReport {
            kind,
            attempted: cohort.len(),
            sent,
        })
    }
}
