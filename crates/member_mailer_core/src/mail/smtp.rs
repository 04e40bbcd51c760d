//! Authenticated SMTP transport backed by `lettre`.
//!
//! # Invariants
//! - Connection and login are verified once in `SmtpMailer::connect`.
//! - The pooled connection lives as long as the mailer and is closed on drop.

use super::{MailError, MailResult, MailTransport, OutgoingMessage};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use log::{error, info};
use serde::Deserialize;
use std::time::Instant;

/// Encryption used for the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Implicit TLS from the first byte (SMTPS, usually port 465).
    #[default]
    Wrapper,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    Starttls,
}

/// Connection settings for the outbound relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub sender_name: String,
    pub sender_address: String,
}

/// Production mail transport.
pub struct SmtpMailer {
    transport: SmtpTransport,
    sender: Mailbox,
}

impl SmtpMailer {
    /// Builds the transport and verifies the relay accepts our login.
    ///
    /// # Errors
    /// - `InvalidAddress` when the sender address does not parse.
    /// - `Smtp` when TLS setup, connection or authentication fails.
    /// - `ConnectionRejected` when the relay answers but refuses the session.
    pub fn connect(settings: &SmtpSettings, username: &str, password: &str) -> MailResult<Self> {
        let started_at = Instant::now();
        info!(
            "event=smtp_connect module=mail status=start host={} port={} tls={:?}",
            settings.host, settings.port, settings.tls
        );

        let sender = Mailbox::new(
            Some(settings.sender_name.clone()),
            parse_address(&settings.sender_address)?,
        );
        let builder = match settings.tls {
            TlsMode::Wrapper => SmtpTransport::relay(&settings.host)?,
            TlsMode::Starttls => SmtpTransport::starttls_relay(&settings.host)?,
        };
        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        match transport.test_connection() {
            Ok(true) => {
                info!(
                    "event=smtp_connect module=mail status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self { transport, sender })
            }
            Ok(false) => {
                error!(
                    "event=smtp_connect module=mail status=error error_code=connection_rejected duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Err(MailError::ConnectionRejected {
                    host: settings.host.clone(),
                })
            }
            Err(err) => {
                error!(
                    "event=smtp_connect module=mail status=error error_code=connect_failed duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }
}

impl MailTransport for SmtpMailer {
    fn send(&mut self, message: &OutgoingMessage) -> MailResult<()> {
        let recipient = Mailbox::new(None, parse_address(&message.to)?);
        let email = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(message.subject.as_str())
            .multipart(
                MultiPart::alternative().singlepart(SinglePart::html(message.html_body.clone())),
            )?;

        self.transport.send(&email)?;
        Ok(())
    }
}

fn parse_address(value: &str) -> MailResult<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|source| MailError::InvalidAddress {
            address: value.to_string(),
            source,
        })
}
