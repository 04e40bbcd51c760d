//! Outbound mail boundary.
//!
//! # Responsibility
//! - Define the `MailTransport` seam the notifier sends through.
//! - Provide the SMTP implementation and HTML message templates.
//!
//! # Invariants
//! - A transport reports success only after the relay accepted the message.
//! - Transports never retry; the first failure is returned to the caller.

use lettre::address::AddressError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod smtp;
pub mod template;

pub use smtp::{SmtpMailer, SmtpSettings, TlsMode};
pub use template::{MessageTemplate, TemplateContext, TemplateError};

pub type MailResult<T> = Result<T, MailError>;

/// One rendered message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Sends rendered messages to a relay.
pub trait MailTransport {
    fn send(&mut self, message: &OutgoingMessage) -> MailResult<()>;
}

impl<T: MailTransport + ?Sized> MailTransport for &mut T {
    fn send(&mut self, message: &OutgoingMessage) -> MailResult<()> {
        (**self).send(message)
    }
}

/// Mail transport error.
#[derive(Debug)]
pub enum MailError {
    InvalidAddress {
        address: String,
        source: AddressError,
    },
    Build(lettre::error::Error),
    Smtp(lettre::transport::smtp::Error),
    ConnectionRejected {
        host: String,
    },
}

impl Display for MailError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAddress { address, source } => {
                write!(f, "invalid email address `{address}`: {source}")
            }
            Self::Build(err) => write!(f, "failed to build message: {err}"),
            Self::Smtp(err) => write!(f, "smtp error: {err}"),
            Self::ConnectionRejected { host } => {
                write!(f, "smtp relay `{host}` did not accept the connection")
            }
        }
    }
}

impl Error for MailError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidAddress { source, .. } => Some(source),
            Self::Build(err) => Some(err),
            Self::Smtp(err) => Some(err),
            Self::ConnectionRejected { .. } => None,
        }
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(value: lettre::error::Error) -> Self {
        Self::Build(value)
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(value: lettre::transport::smtp::Error) -> Self {
        Self::Smtp(value)
    }
}
