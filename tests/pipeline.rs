use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::rc::Rc;
use studywatch::{
    AbortReason, CategoryFilter, ChannelError, Coordinator, CoordinatorOptions, Delta,
    JsonFileStore, NotificationChannel, Normalizer, PersistPolicy, RawCell, RawEntry, RecordKey,
    RunMode, RunOutcome, SeenState, SeenStateStore, SourceAdapter, StoreError, TransportError,
    YearType,
};
use tempfile::tempdir;
use url::Url;

/// In-memory source whose listing can be swapped between runs.
#[derive(Default)]
struct FakeSource {
    entries: RefCell<Vec<RawEntry>>,
    failing: Cell<bool>,
    fetches: Cell<usize>,
    last_filter: RefCell<Option<CategoryFilter>>,
}

impl FakeSource {
    fn with_titles(titles: &[&str]) -> Self {
        let source = Self::default();
        source.set_titles(titles);
        source
    }

    fn set_titles(&self, titles: &[&str]) {
        *self.entries.borrow_mut() = titles.iter().map(|title| study(243, title)).collect();
    }

    fn set_entries(&self, entries: Vec<RawEntry>) {
        *self.entries.borrow_mut() = entries;
    }
}

impl SourceAdapter for FakeSource {
    fn fetch(&self, filter: &CategoryFilter) -> Result<Vec<RawEntry>, TransportError> {
        self.fetches.set(self.fetches.get() + 1);
        *self.last_filter.borrow_mut() = Some(filter.clone());
        if self.failing.get() {
            return Err(TransportError::Unavailable {
                url: "https://portal.test/Studies/Gen".into(),
                attempts: 3,
                reason: "connection refused".into(),
            });
        }
        Ok(self
            .entries
            .borrow()
            .iter()
            .filter(|entry| filter.accepts(entry.year_type.id))
            .cloned()
            .collect())
    }
}

/// Channel that records every delta it receives and answers with a canned result.
struct RecordingChannel {
    name: &'static str,
    reached: Option<usize>,
    received: Rc<RefCell<Vec<Vec<String>>>>,
}

impl RecordingChannel {
    fn ok(name: &'static str) -> (Self, Rc<RefCell<Vec<Vec<String>>>>) {
        Self::build(name, Some(1))
    }

    fn failing(name: &'static str) -> (Self, Rc<RefCell<Vec<Vec<String>>>>) {
        Self::build(name, None)
    }

    fn reaching_nobody(name: &'static str) -> (Self, Rc<RefCell<Vec<Vec<String>>>>) {
        Self::build(name, Some(0))
    }

    fn build(
        name: &'static str,
        reached: Option<usize>,
    ) -> (Self, Rc<RefCell<Vec<Vec<String>>>>) {
        let received = Rc::new(RefCell::new(Vec::new()));
        let channel = Self {
            name,
            reached,
            received: Rc::clone(&received),
        };
        (channel, received)
    }
}

impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        self.name
    }

    fn notify(&self, delta: &Delta) -> Result<usize, ChannelError> {
        self.received
            .borrow_mut()
            .push(delta.iter().map(|record| record.title.clone()).collect());
        self.reached
            .ok_or_else(|| ChannelError::Delivery("relay refused connection".into()))
    }
}

/// Source that runs a hook once, between the coordinator loading state and fetching.
struct InterleavedSource<'a> {
    inner: FakeSource,
    before_fetch: RefCell<Option<Box<dyn FnOnce() + 'a>>>,
}

impl SourceAdapter for InterleavedSource<'_> {
    fn fetch(&self, filter: &CategoryFilter) -> Result<Vec<RawEntry>, TransportError> {
        let hook = self.before_fetch.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.fetch(filter)
    }
}

/// Store that loads fine but refuses to commit.
struct ReadOnlyStore(SeenState);

impl SeenStateStore for ReadOnlyStore {
    fn load(&self) -> Result<SeenState, StoreError> {
        Ok(self.0.clone())
    }

    fn commit(&self, _state: &SeenState) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: "/read-only/seen.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn reset(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

fn study(year_type_id: u32, title: &str) -> RawEntry {
    let slug = title.to_lowercase().replace(' ', "-");
    RawEntry {
        year_type: YearType::new(year_type_id, format!("DISIS {year_type_id}")),
        page_url: format!("https://opsportal.spp.org/Studies/GenList?yearTypeId={year_type_id}"),
        cells: vec![
            RawCell::new("Study", title, Some(format!("/documents/{slug}.pdf"))),
            RawCell::new("Posted", "05/01/2024", None),
        ],
    }
}

fn malformed(kind: usize) -> RawEntry {
    let mut entry = study(243, "placeholder");
    match kind % 3 {
        0 => entry.cells.clear(),
        1 => entry.cells[0].text = "   ".into(),
        _ => entry.cells[0].href = Some("mailto:studies@spp.org".into()),
    }
    entry
}

fn normalizer() -> Normalizer {
    Normalizer::new(Url::parse("https://opsportal.spp.org").unwrap())
}

fn options(policy: PersistPolicy) -> CoordinatorOptions {
    CoordinatorOptions {
        policy,
        ..CoordinatorOptions::default()
    }
}

fn key_of(title: &str) -> RecordKey {
    normalizer().normalize(&study(243, title)).unwrap().key
}

fn titles(delta: &Delta) -> Vec<String> {
    delta.iter().map(|record| record.title.clone()).collect()
}

#[test]
fn first_run_alerts_everything_then_only_new_records() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A", "B", "C"]);
    let (channel, received) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    let first = coordinator.run(RunMode::Normal);
    assert!(matches!(first.outcome, RunOutcome::Completed));
    assert_eq!(titles(&first.delta), vec!["A", "B", "C"]);
    assert!(first.committed);
    assert_eq!(first.tracked, 3);

    let stored = store.load().unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.last_updated.is_some());

    source.set_titles(&["A", "B", "C", "D"]);
    let second = coordinator.run(RunMode::Normal);
    assert_eq!(titles(&second.delta), vec!["D"]);
    assert_eq!(second.already_seen, 3);
    assert_eq!(store.load().unwrap().len(), 4);

    assert_eq!(
        *received.borrow(),
        vec![
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["D".to_string()],
        ]
    );
}

#[test]
fn unchanged_source_is_an_idempotent_no_op() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A", "B"]);
    let (channel, received) = RecordingChannel::ok("sms");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    coordinator.run(RunMode::Normal);
    let bytes = fs::read(store.path()).unwrap();

    let again = coordinator.run(RunMode::Normal);
    assert!(matches!(again.outcome, RunOutcome::Completed));
    assert!(again.delta.is_empty());
    assert!(!again.committed);
    assert!(again.channels.is_empty());
    assert_eq!(again.tracked, 2);
    assert_eq!(fs::read(store.path()).unwrap(), bytes);
    assert_eq!(received.borrow().len(), 1);
}

#[test]
fn malformed_entries_are_skipped_individually() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::default();
    let mut entries: Vec<RawEntry> = ["A", "B", "C", "D"].iter().map(|t| study(243, t)).collect();
    entries.insert(1, malformed(0));
    entries.insert(3, malformed(1));
    entries.push(malformed(2));
    source.set_entries(entries);

    let coordinator =
        Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default());
    let report = coordinator.run(RunMode::Normal);

    assert_eq!(report.fetched, 7);
    assert_eq!(report.records, 4);
    assert_eq!(titles(&report.delta), vec!["A", "B", "C", "D"]);
    let skipped: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
    assert_eq!(skipped, vec![1, 3, 6]);
}

#[test]
fn dry_run_reports_without_side_effects() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    store
        .commit(&SeenState {
            seen_keys: [RecordKey::from_raw("legacy-key")].into_iter().collect(),
            last_updated: None,
        })
        .unwrap();
    let before = fs::read(store.path()).unwrap();

    let source = FakeSource::with_titles(&["X", "Y", "Z"]);
    let (channel, received) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    let report = coordinator.run(RunMode::DryRun);
    assert_eq!(report.mode, RunMode::DryRun);
    assert_eq!(titles(&report.delta), vec!["X", "Y", "Z"]);
    assert!(!report.committed);
    assert!(report.channels.is_empty());
    assert!(received.borrow().is_empty());
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

#[test]
fn dry_run_on_first_run_creates_no_state_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data/seen.json");
    let store = JsonFileStore::new(&path);
    let source = FakeSource::with_titles(&["A"]);
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default());

    let report = coordinator.run(RunMode::DryRun);
    assert_eq!(report.delta.len(), 1);
    assert!(!path.exists());
}

#[test]
fn transport_failure_aborts_without_touching_state() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A"]);
    let (channel, received) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);
    coordinator.run(RunMode::Normal);
    let before = fs::read(store.path()).unwrap();

    source.failing.set(true);
    source.set_titles(&["A", "B"]);
    let report = coordinator.run(RunMode::Normal);

    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted(AbortReason::Transport(TransportError::Unavailable { .. }))
    ));
    assert_eq!(report.exit_code(), 1);
    assert!(report.delta.is_empty());
    assert_eq!(received.borrow().len(), 1);
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

#[test]
fn corrupt_state_aborts_before_fetching() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen.json");
    fs::write(&path, "{\"seen_keys\": [").unwrap();
    let store = JsonFileStore::new(&path);
    let source = FakeSource::with_titles(&["A"]);
    let (channel, received) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    let report = coordinator.run(RunMode::Normal);
    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted(AbortReason::CorruptState(_))
    ));
    assert_eq!(source.fetches.get(), 0);
    assert!(received.borrow().is_empty());
    assert_eq!(fs::read_to_string(&path).unwrap(), "{\"seen_keys\": [");
}

#[test]
fn corrupt_state_can_be_overridden() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen.json");
    fs::write(&path, "not json at all").unwrap();
    let store = JsonFileStore::new(&path);
    let source = FakeSource::with_titles(&["A", "B"]);
    let coordinator = Coordinator::new(
        &source,
        &store,
        normalizer(),
        CoordinatorOptions {
            reset_on_corrupt: true,
            ..CoordinatorOptions::default()
        },
    );

    let report = coordinator.run(RunMode::Normal);
    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(report.delta.len(), 2);
    assert!(report.committed);
    assert_eq!(store.load().unwrap().len(), 2);
}

#[test]
fn one_failing_channel_does_not_block_the_others() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A", "B"]);
    let (broken, broken_log) = RecordingChannel::failing("email");
    let (working, working_log) = RecordingChannel::ok("sms");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(broken)
        .with_channel(working);

    let report = coordinator.run(RunMode::Normal);
    assert!(matches!(report.outcome, RunOutcome::CompletedWithNotifyFailures));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(broken_log.borrow().len(), 1);
    assert_eq!(working_log.borrow().len(), 1);

    let results: Vec<(&str, bool)> = report
        .channels
        .iter()
        .map(|c| (c.channel.as_str(), c.result.is_ok()))
        .collect();
    assert_eq!(results, vec![("email", false), ("sms", true)]);
    assert!(report.committed);
}

#[test]
fn total_delivery_failure_keeps_records_unseen_on_success_policy() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A"]);
    let (channel, received) = RecordingChannel::failing("email");
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), options(PersistPolicy::OnSuccess))
            .with_channel(channel);

    let first = coordinator.run(RunMode::Normal);
    assert!(matches!(first.outcome, RunOutcome::CompletedWithNotifyFailures));
    assert!(!first.committed);
    assert!(!store.path().exists());

    let retry = coordinator.run(RunMode::Normal);
    assert_eq!(titles(&retry.delta), vec!["A"]);
    assert_eq!(received.borrow().len(), 2);
}

#[test]
fn channel_reaching_nobody_does_not_count_as_delivery() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A"]);
    let (channel, received) = RecordingChannel::reaching_nobody("sms");
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), options(PersistPolicy::OnSuccess))
            .with_channel(channel);

    let first = coordinator.run(RunMode::Normal);
    assert!(matches!(first.channels[0].result, Ok(0)));
    assert!(!first.channels[0].reached());
    assert!(matches!(first.outcome, RunOutcome::CompletedWithNotifyFailures));
    assert!(!first.committed);
    assert!(!store.path().exists());

    let retry = coordinator.run(RunMode::Normal);
    assert_eq!(titles(&retry.delta), vec!["A"]);
    assert_eq!(received.borrow().len(), 2);
}

#[test]
fn best_effort_policy_commits_even_when_every_channel_fails() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A"]);
    let (channel, received) = RecordingChannel::failing("email");
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), options(PersistPolicy::BestEffort))
            .with_channel(channel);

    let first = coordinator.run(RunMode::Normal);
    assert!(matches!(first.outcome, RunOutcome::CompletedWithNotifyFailures));
    assert!(first.committed);

    let second = coordinator.run(RunMode::Normal);
    assert!(second.delta.is_empty());
    assert_eq!(received.borrow().len(), 1);
}

#[test]
fn no_channels_still_commits() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A"]);
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default());

    let report = coordinator.run(RunMode::Normal);
    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(report.exit_code(), 0);
    assert!(report.committed);
}

#[test]
fn commit_failure_after_notifying_still_reports_the_delta() {
    let store = ReadOnlyStore(SeenState::default());
    let source = FakeSource::with_titles(&["A", "B"]);
    let (channel, received) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    let report = coordinator.run(RunMode::Normal);
    assert!(matches!(report.outcome, RunOutcome::Aborted(AbortReason::Persist(_))));
    assert_eq!(titles(&report.delta), vec!["A", "B"]);
    assert!(!report.committed);
    assert_eq!(received.borrow().len(), 1);
}

#[test]
fn duplicates_within_one_fetch_alert_once() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::with_titles(&["A", "B", "A"]);
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default());

    let report = coordinator.run(RunMode::Normal);
    assert_eq!(titles(&report.delta), vec!["A", "B"]);
    assert_eq!(report.duplicates, 1);
}

#[test]
fn no_key_is_committed_in_two_deltas() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::default();
    let (channel, _) = RecordingChannel::ok("email");
    let coordinator = Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default())
        .with_channel(channel);

    let listings: [&[&str]; 6] = [
        &["A"],
        &["A", "B"],
        &["B", "C", "A"],
        &["C"],
        &["D", "A", "D"],
        &["A", "B", "C", "D", "E"],
    ];
    let mut alerted = HashSet::new();
    for listing in listings {
        source.set_titles(listing);
        let report = coordinator.run(RunMode::Normal);
        assert!(report.committed || report.delta.is_empty());
        for key in report.delta.keys() {
            assert!(alerted.insert(key.clone()), "{key} alerted twice");
        }
    }
    assert_eq!(alerted.len(), 5);
    assert_eq!(store.load().unwrap().len(), 5);
}

#[test]
fn category_filter_reaches_the_source() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::default();
    source.set_entries(vec![study(243, "A"), study(250, "B"), study(7, "C")]);
    let coordinator = Coordinator::new(
        &source,
        &store,
        normalizer(),
        CoordinatorOptions {
            filter: CategoryFilter::only([250, 7]),
            ..CoordinatorOptions::default()
        },
    );

    let report = coordinator.run(RunMode::DryRun);
    assert_eq!(titles(&report.delta), vec!["B", "C"]);
    assert_eq!(
        source.last_filter.borrow().clone(),
        Some(CategoryFilter::only([7, 250]))
    );
}

#[test]
fn discover_and_reset_leave_listing_alone() {
    let dir = tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("seen.json"));
    let source = FakeSource::default();
    source.set_entries(vec![study(250, "B"), study(243, "A"), study(250, "C")]);
    let coordinator =
        Coordinator::new(&source, &store, normalizer(), CoordinatorOptions::default());

    let ids: Vec<u32> = coordinator
        .discover_categories()
        .unwrap()
        .iter()
        .map(|year_type| year_type.id)
        .collect();
    assert_eq!(ids, vec![243, 250]);
    assert!(!store.path().exists());

    coordinator.run(RunMode::Normal);
    assert_eq!(coordinator.reset_history().unwrap(), 3);
    assert_eq!(coordinator.run(RunMode::DryRun).delta.len(), 3);
}

#[test]
fn overlapping_runs_leave_the_last_writer_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen.json");
    JsonFileStore::new(&path)
        .commit(&SeenState {
            seen_keys: [key_of("A")].into_iter().collect(),
            last_updated: None,
        })
        .unwrap();

    let early_store = JsonFileStore::new(&path);
    let early_source = FakeSource::with_titles(&["A", "B"]);
    let early = Coordinator::new(
        &early_source,
        &early_store,
        normalizer(),
        CoordinatorOptions::default(),
    );

    // The late run loads {A}, then the early run commits {A, B} before the
    // late run fetches and commits {A, C} over it.
    let late_store = JsonFileStore::new(&path);
    let commit_early: Box<dyn FnOnce() + '_> = Box::new(|| {
        let report = early.run(RunMode::Normal);
        assert!(report.committed);
        assert_eq!(titles(&report.delta), vec!["B"]);
    });
    let late_source = InterleavedSource {
        inner: FakeSource::with_titles(&["A", "C"]),
        before_fetch: RefCell::new(Some(commit_early)),
    };
    let late = Coordinator::new(
        &late_source,
        &late_store,
        normalizer(),
        CoordinatorOptions::default(),
    );

    let report = late.run(RunMode::Normal);
    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(titles(&report.delta), vec!["C"]);

    let stored = JsonFileStore::new(&path).load().unwrap();
    let mut expected = vec![key_of("A"), key_of("C")];
    expected.sort();
    assert_eq!(stored.seen_keys.into_iter().collect::<Vec<_>>(), expected);

    // The early run's record is alerted again on the next cycle, nothing else.
    let next_source = FakeSource::with_titles(&["A", "B", "C"]);
    let next = Coordinator::new(
        &next_source,
        &early_store,
        normalizer(),
        CoordinatorOptions::default(),
    );
    let again = next.run(RunMode::Normal);
    assert!(matches!(again.outcome, RunOutcome::Completed));
    assert_eq!(titles(&again.delta), vec!["B"]);
    assert_eq!(JsonFileStore::new(&path).load().unwrap().len(), 3);
}
