//! Command-line interface for the study monitor binary.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Log verbosity accepted on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything, including per-page parsing detail.
    Debug,
    /// Run progress.
    Info,
    /// Retries, skipped entries, missing credentials.
    #[value(alias = "WARN")]
    Warning,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// What a single invocation should do.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch, diff, notify, persist.
    Check,
    /// Fetch and diff only.
    DryRun,
    /// List the published year types.
    Discover,
    /// Clear the alert history.
    Reset,
}

/// Watches the SPP OpsPortal for newly posted impact studies.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "studywatch",
    version,
    about = "Get alerted once when new SPP impact studies are posted",
    after_help = "Environment variables override the config file:\n  \
        SMTP_HOST, SMTP_PORT, SMTP_USERNAME, SMTP_PASSWORD, SMTP_FROM_ADDRESS\n  \
        TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_FROM_NUMBER\n  \
        ALERT_EMAIL_RECIPIENTS, ALERT_SMS_RECIPIENTS (comma-separated)\n  \
        SPP_YEAR_TYPE_IDS (comma-separated integers)"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "STUDYWATCH_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// List available study year types and exit
    #[arg(short, long, conflicts_with_all = ["reset", "dry_run"])]
    pub discover: bool,

    /// Clear all seen studies and start fresh
    #[arg(long, conflicts_with = "dry_run")]
    pub reset: bool,

    /// Check for new studies without notifying or marking them seen
    #[arg(long)]
    pub dry_run: bool,

    /// Override the log level from the config file
    #[arg(long, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    /// Selected operation.
    pub fn command(&self) -> Command {
        if self.discover {
            Command::Discover
        } else if self.reset {
            Command::Reset
        } else if self.dry_run {
            Command::DryRun
        } else {
            Command::Check
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_check() {
        let cli = Cli::try_parse_from(["studywatch"]).unwrap();
        assert_eq!(cli.command(), Command::Check);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert_eq!(cli.log_level, None);
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "studywatch",
            "-c",
            "prod.yaml",
            "--dry-run",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.command(), Command::DryRun);
        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        assert_eq!(cli.log_level.map(LogLevel::directive), Some("debug"));

        let cli = Cli::try_parse_from(["studywatch", "--discover"]).unwrap();
        assert_eq!(cli.command(), Command::Discover);
    }

    #[test]
    fn conflicting_modes_are_rejected() {
        assert!(Cli::try_parse_from(["studywatch", "--reset", "--dry-run"]).is_err());
        assert!(Cli::try_parse_from(["studywatch", "-d", "--reset"]).is_err());
    }
}
