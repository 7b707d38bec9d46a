//! Pure comparison of a fetched record set against the seen-state.

use crate::record::{Record, RecordKey};
use crate::state::SeenState;
use serde::Serialize;
use std::collections::HashSet;

/// Records discovered for the first time in one run, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Delta {
    records: Vec<Record>,
}

impl Delta {
    /// Wraps records that are already known to be new and distinct.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Number of new records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the run found nothing new.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// New records in fetch order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Iterator over the new records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Keys of the new records, in order.
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.records.iter().map(|record| &record.key)
    }
}

impl<'a> IntoIterator for &'a Delta {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Outcome of [`diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    /// Records absent from the seen-state.
    pub delta: Delta,
    /// Previous keys plus every delta key. `last_updated` is left untouched.
    pub next: SeenState,
    /// Records skipped because their key was already seen.
    pub already_seen: usize,
    /// Records skipped because an earlier record in the same fetch had the key.
    pub duplicates: usize,
}

impl Diff {
    /// True when committing `next` would change nothing.
    pub fn is_noop(&self) -> bool {
        self.delta.is_empty()
    }
}

/// Splits `records` into new and already-seen entries.
///
/// The first occurrence of a key within `records` wins; later ones count as
/// duplicates. No I/O happens here.
pub fn diff(records: impl IntoIterator<Item = Record>, seen: &SeenState) -> Diff {
    let mut fresh = Vec::new();
    let mut batch_keys: HashSet<RecordKey> = HashSet::new();
    let mut already_seen = 0usize;
    let mut duplicates = 0usize;

    for record in records {
        if seen.contains(&record.key) {
            already_seen += 1;
            continue;
        }
        if !batch_keys.insert(record.key.clone()) {
            duplicates += 1;
            continue;
        }
        fresh.push(record);
    }

    let mut next = seen.clone();
    next.seen_keys.extend(batch_keys);

    Diff {
        delta: Delta::from_records(fresh),
        next,
        already_seen,
        duplicates,
    }
}
