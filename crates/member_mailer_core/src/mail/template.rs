//! HTML message templates with `{{ name }}` placeholders.
//!
//! # Invariants
//! - Templates are validated on construction; rendering cannot fail.
//! - Substituted values are HTML-escaped.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::error::Error;
use std::fmt::{Display, Formatter};

const PLACEHOLDER_FIRST_NAME: &str = "first_name";
const PLACEHOLDER_SENDER_NAME: &str = "sender_name";
const PLACEHOLDER_SENDER_ADDRESS: &str = "sender_address";

const KNOWN_PLACEHOLDERS: &[&str] = &[
    PLACEHOLDER_FIRST_NAME,
    PLACEHOLDER_SENDER_NAME,
    PLACEHOLDER_SENDER_ADDRESS,
];

const DEFAULT_WELCOME_HTML: &str = include_str!("templates/welcome.html");
const DEFAULT_TERMINATION_HTML: &str = include_str!("templates/termination.html");

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

/// Values substituted into a template for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateContext<'a> {
    pub first_name: &'a str,
    pub sender_name: &'a str,
    pub sender_address: &'a str,
}

/// Subject line plus HTML body for one notification kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    subject: String,
    html: String,
}

impl MessageTemplate {
    /// Builds a template, rejecting blank subjects and unknown placeholders.
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Result<Self, TemplateError> {
        let subject = subject.into();
        let html = html.into();
        if subject.trim().is_empty() {
            return Err(TemplateError::EmptySubject);
        }
        if html.trim().is_empty() {
            return Err(TemplateError::EmptyBody);
        }

        for captures in PLACEHOLDER_RE.captures_iter(&html) {
            let name = &captures[1];
            if !KNOWN_PLACEHOLDERS.contains(&name) {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
        }

        Ok(Self { subject, html })
    }

    /// Built-in welcome message.
    pub fn default_welcome(subject: impl Into<String>) -> Result<Self, TemplateError> {
        Self::new(subject, DEFAULT_WELCOME_HTML)
    }

    /// Built-in termination notice.
    pub fn default_termination(subject: impl Into<String>) -> Result<Self, TemplateError> {
        Self::new(subject, DEFAULT_TERMINATION_HTML)
    }

    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Renders the HTML body for one recipient.
    pub fn render(&self, context: &TemplateContext<'_>) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.html, |captures: &Captures<'_>| {
                let value = match &captures[1] {
                    PLACEHOLDER_FIRST_NAME => context.first_name,
                    PLACEHOLDER_SENDER_NAME => context.sender_name,
                    PLACEHOLDER_SENDER_ADDRESS => context.sender_address,
                    _ => "",
                };
                escape_html(value)
            })
            .into_owned()
    }
}

/// Template validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    EmptySubject,
    EmptyBody,
    UnknownPlaceholder(String),
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySubject => write!(f, "message subject cannot be empty"),
            Self::EmptyBody => write!(f, "message template body cannot be empty"),
            Self::UnknownPlaceholder(name) => write!(
                f,
                "unknown template placeholder `{name}`; expected one of {}",
                KNOWN_PLACEHOLDERS.join("|")
            ),
        }
    }
}

impl Error for TemplateError {}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
