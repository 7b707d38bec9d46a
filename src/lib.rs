#![warn(missing_docs)]
//! Change detection for the SPP OpsPortal study listings.
//!
//! A run fetches raw listing entries, normalizes them into keyed records,
//! diffs them against the durable seen-state, alerts every configured channel
//! about the new ones, and commits the updated state atomically.

pub mod cli;
pub mod config;
pub mod diff;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod state;

pub use cli::{Cli, Command, LogLevel};
pub use config::{AppConfig, ConfigError};
pub use diff::{diff, Delta, Diff};
pub use normalizer::{NormalizedBatch, Normalizer, SkipReason, SkippedEntry};
pub use notify::{ChannelError, NotificationChannel};
pub use pipeline::{
    AbortReason, ChannelReport, Coordinator, CoordinatorOptions, PersistPolicy, RunMode,
    RunOutcome, RunReport,
};
pub use record::{Record, RecordKey, YearType};
pub use source::portal::{PortalConfig, PortalSource};
pub use source::{CategoryFilter, RawCell, RawEntry, SourceAdapter, TransportError};
pub use state::{JsonFileStore, SeenState, SeenStateStore, StoreError};
