//! Run configuration.
//!
//! # Responsibility
//! - Load the TOML file naming paths, program dates, sender identity and relay.
//! - Resolve SMTP credentials from the environment.
//! - Load message templates (file override or built-in).
//!
//! # Invariants
//! - A `RunConfig` returned by `load`/`from_toml_str` has passed `validate()`.
//! - Credentials never live in the config file or the member database.

use crate::logging::{default_log_level, normalize_level};
use crate::mail::{MessageTemplate, SmtpSettings, TemplateError, TlsMode};
use chrono::NaiveDate;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "MEMBER_MAILER_CONFIG";
/// Config file used when `MEMBER_MAILER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "member_mailer.toml";
/// Environment variable holding the SMTP username.
pub const SMTP_USERNAME_ENV: &str = "MEMBER_MAILER_SMTP_USERNAME";
/// Environment variable holding the SMTP password.
pub const SMTP_PASSWORD_ENV: &str = "MEMBER_MAILER_SMTP_PASSWORD";

const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_FALLBACK_GREETING: &str = "Member";
const DEFAULT_WELCOME_SUBJECT: &str = "Welcome to the Organization";
const DEFAULT_TERMINATION_SUBJECT: &str = "Thank you for your membership";

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration loading or validation error.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
    MissingCredential(&'static str),
    TemplateRead {
        path: PathBuf,
        source: std::io::Error,
    },
    Template(TemplateError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
            Self::MissingCredential(var) => {
                write!(f, "missing smtp credential: environment variable `{var}` is not set")
            }
            Self::TemplateRead { path, source } => {
                write!(f, "failed to read template `{}`: {source}", path.display())
            }
            Self::Template(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::TemplateRead { source, .. } => Some(source),
            Self::Template(err) => Some(err),
            Self::Invalid(_) | Self::MissingCredential(_) => None,
        }
    }
}

impl From<TemplateError> for ConfigError {
    fn from(value: TemplateError) -> Self {
        Self::Template(value)
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Greeting used when a member has no usable first name.
    #[serde(default = "default_fallback_greeting")]
    pub fallback_greeting: String,
    pub paths: PathsConfig,
    pub program: ProgramConfig,
    pub sender: SenderConfig,
    pub smtp: SmtpConfig,
    #[serde(default = "default_welcome")]
    pub welcome: NotificationConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Current-month member spreadsheet.
    pub snapshot: PathBuf,
    /// SQLite member registry, created on first run.
    pub database: PathBuf,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
    /// Worksheet to read; the first sheet when absent.
    pub sheet: Option<String>,
}

/// Dates the notification programs started. Members must be strictly after
/// these to qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramConfig {
    pub new_member_start: NaiveDate,
    pub terminated_member_start: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    pub display_name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: TlsMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    pub subject: String,
    /// HTML template file; the built-in template when absent.
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_termination_subject")]
    pub subject: String,
    pub template: Option<PathBuf>,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subject: default_termination_subject(),
            template: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; build-mode default when absent.
    pub level: Option<String>,
}

impl RunConfig {
    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates config text.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field and value constraints serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        require_path("paths.snapshot", &self.paths.snapshot)?;
        require_path("paths.database", &self.paths.database)?;
        require_path("paths.log_dir", &self.paths.log_dir)?;
        if !self.paths.log_dir.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "paths.log_dir must be an absolute path, got `{}`",
                self.paths.log_dir.display()
            )));
        }
        if let Some(sheet) = &self.paths.sheet {
            require_text("paths.sheet", sheet)?;
        }

        require_text("sender.display_name", &self.sender.display_name)?;
        require_text("sender.address", &self.sender.address)?;
        require_text("smtp.host", &self.smtp.host)?;
        if self.smtp.port == 0 {
            return Err(ConfigError::Invalid("smtp.port cannot be 0".to_string()));
        }

        require_text("fallback_greeting", &self.fallback_greeting)?;
        require_text("welcome.subject", &self.welcome.subject)?;
        require_text("termination.subject", &self.termination.subject)?;
        if let Some(level) = &self.logging.level {
            normalize_level(level).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Effective log level name.
    pub fn log_level(&self) -> &str {
        self.logging
            .level
            .as_deref()
            .unwrap_or_else(|| default_log_level())
    }

    /// Relay settings for `SmtpMailer::connect`.
    pub fn smtp_settings(&self) -> SmtpSettings {
        SmtpSettings {
            host: self.smtp.host.trim().to_string(),
            port: self.smtp.port,
            tls: self.smtp.tls,
            sender_name: self.sender.display_name.trim().to_string(),
            sender_address: self.sender.address.trim().to_string(),
        }
    }

    /// Welcome template from file or built-in.
    pub fn welcome_template(&self) -> ConfigResult<MessageTemplate> {
        match &self.welcome.template {
            Some(path) => Ok(MessageTemplate::new(
                self.welcome.subject.as_str(),
                read_template(path)?,
            )?),
            None => Ok(MessageTemplate::default_welcome(
                self.welcome.subject.as_str(),
            )?),
        }
    }

    /// Termination template from file or built-in.
    pub fn termination_template(&self) -> ConfigResult<MessageTemplate> {
        match &self.termination.template {
            Some(path) => Ok(MessageTemplate::new(
                self.termination.subject.as_str(),
                read_template(path)?,
            )?),
            None => Ok(MessageTemplate::default_termination(
                self.termination.subject.as_str(),
            )?),
        }
    }
}

/// SMTP login resolved from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl Debug for SmtpCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SmtpCredentials {
    /// Reads `MEMBER_MAILER_SMTP_USERNAME` / `MEMBER_MAILER_SMTP_PASSWORD`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves credentials through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let read = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };

        Ok(Self {
            username: read(SMTP_USERNAME_ENV)?,
            password: read(SMTP_PASSWORD_ENV)?,
        })
    }
}

/// Config file path from `MEMBER_MAILER_CONFIG`, or the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn read_template(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::TemplateRead {
        path: path.to_path_buf(),
        source,
    })
}

fn require_path(field: &str, value: &Path) -> ConfigResult<()> {
    if value.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn default_fallback_greeting() -> String {
    DEFAULT_FALLBACK_GREETING.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_true() -> bool {
    true
}

fn default_welcome() -> NotificationConfig {
    NotificationConfig {
        subject: DEFAULT_WELCOME_SUBJECT.to_string(),
        template: None,
    }
}

fn default_termination_subject() -> String {
    DEFAULT_TERMINATION_SUBJECT.to_string()
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RunConfig, SmtpCredentials, SMTP_PASSWORD_ENV, SMTP_USERNAME_ENV};
    use crate::mail::TlsMode;
    use chrono::NaiveDate;

    const MINIMAL: &str = r#"
[paths]
snapshot = "/data/current_month_members.xlsx"
database = "/data/members.db"
log_dir = "/data/logs"

[program]
new_member_start = "2021-10-31"
terminated_member_start = "2021-11-30"

[sender]
display_name = "Membership Officer"
address = "membership@example.org"

[smtp]
host = "smtp.example.org"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = RunConfig::from_toml_str(MINIMAL).expect("minimal config should load");

        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.tls, TlsMode::Wrapper);
        assert_eq!(config.fallback_greeting, "Member");
        assert!(config.termination.enabled);
        assert!(config.welcome.template.is_none());
        assert_eq!(
            config.program.new_member_start,
            NaiveDate::from_ymd_opt(2021, 10, 31).unwrap()
        );
    }

    #[test]
    fn starttls_and_overrides_parse() {
        let text = format!(
            "fallback_greeting = \"Friend\"\n{MINIMAL}port = 587\ntls = \"starttls\"\n\n[termination]\nenabled = false\n"
        );
        let config = RunConfig::from_toml_str(&text).expect("config should load");

        assert_eq!(config.fallback_greeting, "Friend");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.smtp.tls, TlsMode::Starttls);
        assert!(!config.termination.enabled);
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let text = MINIMAL.replace("/data/logs", "logs");
        let err = RunConfig::from_toml_str(&text).expect_err("relative log dir must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("absolute")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}username = \"nope\"\n");
        let err = RunConfig::from_toml_str(&text).expect_err("credentials do not belong in config");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let text = format!("{MINIMAL}\n[logging]\nlevel = \"loud\"\n");
        let err = RunConfig::from_toml_str(&text).expect_err("bad level must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn log_level_prefers_config_over_build_default() {
        let config = RunConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.log_level(), crate::logging::default_log_level());

        let text = format!("{MINIMAL}\n[logging]\nlevel = \"warn\"\n");
        let config = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.log_level(), "warn");
    }

    #[test]
    fn template_file_overrides_built_in() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("welcome.html");
        std::fs::write(&template_path, "<p>Hello {{ first_name }}</p>").unwrap();

        let text = format!(
            "{MINIMAL}\n[welcome]\nsubject = \"Hello\"\ntemplate = \"{}\"\n",
            template_path.display()
        );
        let config = RunConfig::from_toml_str(&text).unwrap();
        let template = config.welcome_template().unwrap();
        assert_eq!(template.subject(), "Hello");
    }

    #[test]
    fn credentials_require_both_variables() {
        let err = SmtpCredentials::from_lookup(|name| {
            (name == SMTP_USERNAME_ENV).then(|| "user".to_string())
        })
        .expect_err("password is required");
        assert!(matches!(err, ConfigError::MissingCredential(var) if var == SMTP_PASSWORD_ENV));

        let credentials = SmtpCredentials::from_lookup(|name| {
            Some(if name == SMTP_USERNAME_ENV { "user" } else { "hunter2" }.to_string())
        })
        .unwrap();
        assert_eq!(credentials.password, "hunter2");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
