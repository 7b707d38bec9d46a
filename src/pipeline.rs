//! Run coordinator: fetch, normalize, diff, notify, persist.
//!
//! A run loads the seen-state once, works on an in-memory delta and commits at
//! most once at the end. Fatal errors (transport, unreadable state) leave the
//! stored state untouched. Channel failures are collected and only influence
//! whether the new state is committed, according to [`PersistPolicy`].

use crate::diff::{diff, Delta};
use crate::normalizer::{Normalizer, SkippedEntry};
use crate::notify::{ChannelError, NotificationChannel};
use crate::record::YearType;
use crate::source::{CategoryFilter, SourceAdapter, TransportError};
use crate::state::{SeenState, SeenStateStore, StoreError};
use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use tracing::{error, info, info_span, warn};

/// Whether a run may have side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Notify and persist.
    Normal,
    /// Report the delta only; no notifications and no writes.
    DryRun,
}

/// When the updated seen-state is committed after notifying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Commit only if at least one channel reached a recipient (or none is
    /// configured).
    /// A total delivery failure re-alerts next run instead of losing alerts.
    #[default]
    OnSuccess,
    /// Always commit once notification was attempted.
    BestEffort,
}

/// Why a run stopped early.
#[derive(Debug)]
pub enum AbortReason {
    /// The source could not be fetched.
    Transport(TransportError),
    /// The stored seen-state is unreadable.
    CorruptState(StoreError),
    /// The seen-state could not be read for another reason.
    StateIo(StoreError),
    /// Alerts went out but the new state could not be committed.
    Persist(StoreError),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "fetch failed: {err}"),
            Self::CorruptState(err) => write!(f, "refusing to run on corrupt state: {err}"),
            Self::StateIo(err) => write!(f, "could not read seen-state: {err}"),
            Self::Persist(err) => write!(f, "could not commit seen-state: {err}"),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Everything that was attempted succeeded.
    Completed,
    /// The run finished but at least one channel failed.
    CompletedWithNotifyFailures,
    /// The run stopped on a fatal error.
    Aborted(AbortReason),
}

/// Result of one notification channel.
#[derive(Debug)]
pub struct ChannelReport {
    /// Channel name.
    pub channel: String,
    /// Recipients reached, or the failure.
    pub result: Result<usize, ChannelError>,
}

impl ChannelReport {
    /// True when the channel reached at least one recipient.
    pub fn reached(&self) -> bool {
        matches!(self.result, Ok(sent) if sent > 0)
    }
}

/// Everything a caller needs to report on a run.
#[derive(Debug)]
pub struct RunReport {
    /// Mode the run executed in.
    pub mode: RunMode,
    /// Terminal state.
    pub outcome: RunOutcome,
    /// Raw entries returned by the source.
    pub fetched: usize,
    /// Valid records after normalization.
    pub records: usize,
    /// Entries dropped by the normalizer.
    pub skipped: Vec<SkippedEntry>,
    /// Newly discovered records.
    pub delta: Delta,
    /// Records ignored because they were already seen.
    pub already_seen: usize,
    /// Records ignored as repeats within this fetch.
    pub duplicates: usize,
    /// Per-channel delivery results.
    pub channels: Vec<ChannelReport>,
    /// Whether the seen-state was committed.
    pub committed: bool,
    /// Keys tracked in the store once the run ended.
    pub tracked: usize,
}

impl RunReport {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            outcome: RunOutcome::Completed,
            fetched: 0,
            records: 0,
            skipped: Vec::new(),
            delta: Delta::default(),
            already_seen: 0,
            duplicates: 0,
            channels: Vec::new(),
            committed: false,
            tracked: 0,
        }
    }

    fn aborted(mut self, reason: AbortReason) -> Self {
        error!(reason = %reason, "run aborted");
        self.outcome = RunOutcome::Aborted(reason);
        self
    }

    /// True when the run stopped on a fatal error.
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted(_))
    }

    /// Process exit status: 0 completed, 2 notification failures, 1 aborted.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Completed => 0,
            RunOutcome::CompletedWithNotifyFailures => 2,
            RunOutcome::Aborted(_) => 1,
        }
    }
}

/// Knobs consumed by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    /// Categories to monitor.
    pub filter: CategoryFilter,
    /// Commit policy after notifying.
    pub policy: PersistPolicy,
    /// Treat a corrupt state file as empty instead of aborting.
    pub reset_on_corrupt: bool,
}

/// Orchestrates one monitoring run at a time.
pub struct Coordinator<S, St> {
    source: S,
    store: St,
    normalizer: Normalizer,
    channels: Vec<Box<dyn NotificationChannel>>,
    options: CoordinatorOptions,
}

impl<S, St> Coordinator<S, St>
where
    S: SourceAdapter,
    St: SeenStateStore,
{
    /// Builds a coordinator with no notification channels.
    pub fn new(source: S, store: St, normalizer: Normalizer, options: CoordinatorOptions) -> Self {
        Self {
            source,
            store,
            normalizer,
            channels: Vec::new(),
            options,
        }
    }

    /// Adds a notification channel.
    pub fn with_channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    /// Adds an already boxed notification channel.
    pub fn push_channel(&mut self, channel: Box<dyn NotificationChannel>) {
        self.channels.push(channel);
    }

    /// Number of configured channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Seen-state store in use.
    pub fn store(&self) -> &St {
        &self.store
    }

    /// Lists categories published by the source without touching state.
    pub fn discover_categories(&self) -> Result<Vec<YearType>, TransportError> {
        self.source.discover()
    }

    /// Clears the alert history.
    pub fn reset_history(&self) -> Result<usize, StoreError> {
        self.store.reset()
    }

    /// Executes one run.
    pub fn run(&self, mode: RunMode) -> RunReport {
        let _run = info_span!("run", ?mode).entered();
        let mut report = RunReport::new(mode);

        let seen = match self.load_state() {
            Ok(seen) => seen,
            Err(reason) => return report.aborted(reason),
        };
        report.tracked = seen.len();

        let fetched = info_span!("fetching").in_scope(|| self.source.fetch(&self.options.filter));
        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => return report.aborted(AbortReason::Transport(err)),
        };
        report.fetched = raw.len();

        let batch = info_span!("normalizing").in_scope(|| self.normalizer.normalize_batch(raw));
        for skipped in &batch.skipped {
            warn!(
                index = skipped.index,
                year_type = %skipped.year_type,
                reason = %skipped.reason,
                "skipped malformed entry"
            );
        }
        report.records = batch.records.len();
        report.skipped = batch.skipped;

        let outcome = info_span!("diffing").in_scope(|| diff(batch.records, &seen));
        info!(
            new = outcome.delta.len(),
            already_seen = outcome.already_seen,
            duplicates = outcome.duplicates,
            "diff complete"
        );
        report.already_seen = outcome.already_seen;
        report.duplicates = outcome.duplicates;
        report.delta = outcome.delta;

        if report.delta.is_empty() || mode == RunMode::DryRun {
            return report;
        }

        report.channels = info_span!("notifying").in_scope(|| self.notify_all(&report.delta));
        // A channel that reached nobody did not deliver, even if it returned Ok.
        let delivered = report.channels.iter().filter(|c| c.reached()).count();
        if delivered < report.channels.len() {
            report.outcome = RunOutcome::CompletedWithNotifyFailures;
        }

        let persist = match self.options.policy {
            PersistPolicy::BestEffort => true,
            PersistPolicy::OnSuccess => delivered > 0 || self.channels.is_empty(),
        };
        if !persist {
            warn!(
                new = report.delta.len(),
                "no channel delivered; leaving records unseen so the next run retries"
            );
            return report;
        }

        let next = outcome.next.stamped(Utc::now());
        let _persisting = info_span!("persisting").entered();
        match self.store.commit(&next) {
            Ok(()) => {
                report.committed = true;
                report.tracked = next.len();
                info!(tracked = next.len(), "marked new records as seen");
                report
            }
            Err(err) => report.aborted(AbortReason::Persist(err)),
        }
    }

    fn load_state(&self) -> Result<SeenState, AbortReason> {
        match self.store.load() {
            Ok(seen) => Ok(seen),
            Err(err) if err.is_corrupt() && self.options.reset_on_corrupt => {
                error!(error = %err, "seen-state is corrupt; starting from empty as configured");
                Ok(SeenState::default())
            }
            Err(err) if err.is_corrupt() => Err(AbortReason::CorruptState(err)),
            Err(err) => Err(AbortReason::StateIo(err)),
        }
    }

    fn notify_all(&self, delta: &Delta) -> Vec<ChannelReport> {
        self.channels
            .iter()
            .map(|channel| {
                let result = channel.notify(delta);
                match &result {
                    Ok(sent) => info!(channel = channel.name(), sent, "channel delivered"),
                    Err(err) => error!(channel = channel.name(), error = %err, "channel failed"),
                }
                ChannelReport {
                    channel: channel.name().to_string(),
                    result,
                }
            })
            .collect()
    }
}
