//! YAML configuration with environment overrides for secrets and recipients.

use crate::notify::{EmailChannel, NotificationChannel, SmsChannel, SmtpSettings, TwilioSettings};
use crate::pipeline::{CoordinatorOptions, PersistPolicy};
use crate::source::portal::{PortalConfig, DEFAULT_BASE_URL};
use crate::source::CategoryFilter;
use crate::state::DEFAULT_STATE_PATH;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid YAML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },
    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// The configured portal base URL is not a URL.
    #[error("invalid portal base url {0:?}")]
    InvalidBaseUrl(String),
}

/// Which listings to watch and how politely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Year type ids to monitor; empty means all.
    pub year_type_ids: Vec<u32>,
    /// Seconds between listing requests.
    pub request_delay: f64,
    /// Attempts per page.
    pub max_retries: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Portal root.
    pub base_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            year_type_ids: Vec::new(),
            request_delay: 2.0,
            max_retries: 3,
            timeout_secs: 30,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Alert recipients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecipientsConfig {
    /// Email addresses.
    pub email_recipients: Vec<String>,
    /// Phone numbers in E.164 form.
    pub sms_recipients: Vec<String>,
}

/// SMTP relay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Relay host.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Sender address.
    pub from_address: String,
    /// STARTTLS (true) or implicit TLS (false).
    pub use_tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            use_tls: true,
        }
    }
}

/// Twilio credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    /// Account SID.
    pub account_sid: String,
    /// Auth token.
    pub auth_token: String,
    /// Sending number.
    pub from_number: String,
}

/// Seen-state location and recovery behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State file path.
    pub path: PathBuf,
    /// Start from empty instead of aborting when the file is corrupt.
    pub reset_on_corrupt: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_PATH),
            reset_on_corrupt: false,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listing selection and fetch behaviour.
    pub monitor: MonitorConfig,
    /// Who gets alerted.
    pub notifications: RecipientsConfig,
    /// Email transport.
    pub smtp: SmtpConfig,
    /// SMS transport.
    pub twilio: TwilioConfig,
    /// Seen-state storage.
    pub storage: StorageConfig,
    /// Commit policy after notifying.
    pub persist_policy: PersistPolicy,
    /// Log verbosity (`debug`, `info`, `warning`, `error`).
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            notifications: RecipientsConfig::default(),
            smtp: SmtpConfig::default(),
            twilio: TwilioConfig::default(),
            storage: StorageConfig::default(),
            persist_policy: PersistPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `path` (defaults when absent) and applies process environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parses the YAML file only. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration from YAML text. An empty document yields defaults.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Overlays environment variables, looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(value) = non_empty("SMTP_HOST") {
            self.smtp.host = value;
        }
        if let Some(value) = non_empty("SMTP_PORT") {
            self.smtp.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SMTP_PORT",
                value,
            })?;
        }
        if let Some(value) = non_empty("SMTP_USERNAME") {
            self.smtp.username = value;
        }
        if let Some(value) = non_empty("SMTP_PASSWORD") {
            self.smtp.password = value;
        }
        if let Some(value) = non_empty("SMTP_FROM_ADDRESS") {
            self.smtp.from_address = value;
        }
        if let Some(value) = non_empty("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = value;
        }
        if let Some(value) = non_empty("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = value;
        }
        if let Some(value) = non_empty("TWILIO_FROM_NUMBER") {
            self.twilio.from_number = value;
        }
        if let Some(value) = non_empty("ALERT_EMAIL_RECIPIENTS") {
            self.notifications.email_recipients = split_list(&value);
        }
        if let Some(value) = non_empty("ALERT_SMS_RECIPIENTS") {
            self.notifications.sms_recipients = split_list(&value);
        }
        if let Some(value) = non_empty("SPP_YEAR_TYPE_IDS") {
            self.monitor.year_type_ids = split_list(&value)
                .iter()
                .map(|id| id.parse())
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: "SPP_YEAR_TYPE_IDS",
                    value,
                })?;
        }
        Ok(())
    }

    /// Year types to monitor.
    pub fn category_filter(&self) -> CategoryFilter {
        CategoryFilter::only(self.monitor.year_type_ids.iter().copied())
    }

    /// Portal root as a URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.monitor.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(self.monitor.base_url.clone()))
    }

    /// Settings for the portal source adapter.
    pub fn portal_config(&self) -> Result<PortalConfig, ConfigError> {
        Ok(PortalConfig {
            base_url: self.base_url()?,
            request_delay: Duration::from_secs_f64(self.monitor.request_delay.max(0.0)),
            max_retries: self.monitor.max_retries.max(1),
            timeout: Duration::from_secs(self.monitor.timeout_secs.max(1)),
            ..PortalConfig::default()
        })
    }

    /// Options for the run coordinator.
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            filter: self.category_filter(),
            policy: self.persist_policy,
            reset_on_corrupt: self.storage.reset_on_corrupt,
        }
    }

    /// Builds every channel that has both recipients and credentials.
    ///
    /// Recipients without credentials are reported and skipped.
    pub fn build_channels(
        &self,
    ) -> Result<Vec<Box<dyn NotificationChannel>>, crate::notify::ChannelError> {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
        let recipients = &self.notifications;

        if !recipients.email_recipients.is_empty() {
            if self.smtp.username.trim().is_empty() {
                warn!("email recipients configured but SMTP credentials missing; skipping email");
            } else {
                let settings = SmtpSettings {
                    host: self.smtp.host.clone(),
                    port: self.smtp.port,
                    username: self.smtp.username.clone(),
                    password: self.smtp.password.clone(),
                    from_address: self.smtp.from_address.clone(),
                    use_tls: self.smtp.use_tls,
                };
                channels.push(Box::new(EmailChannel::new(
                    &settings,
                    &recipients.email_recipients,
                )?));
            }
        }

        if !recipients.sms_recipients.is_empty() {
            if self.twilio.account_sid.trim().is_empty() {
                warn!("sms recipients configured but Twilio credentials missing; skipping sms");
            } else {
                let settings = TwilioSettings {
                    account_sid: self.twilio.account_sid.clone(),
                    auth_token: self.twilio.auth_token.clone(),
                    from_number: self.twilio.from_number.clone(),
                };
                channels.push(Box::new(SmsChannel::new(
                    settings,
                    recipients.sms_recipients.clone(),
                )?));
            }
        }

        Ok(channels)
    }

    /// `tracing` filter directive for `log_level`.
    pub fn log_directive(&self) -> &'static str {
        level_directive(&self.log_level)
    }
}

/// Maps user-facing level names onto `tracing` directives.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
