//! Durable ledger of study keys that have already been alerted on.

use crate::record::RecordKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// On-disk layout version written by [`JsonFileStore`].
pub const STATE_VERSION: u32 = 1;

/// Default location of the seen-state file.
pub const DEFAULT_STATE_PATH: &str = "data/seen_studies.json";

/// Keys already alerted on plus the time of the last successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenState {
    /// Keys of every record that was part of a committed delta.
    pub seen_keys: BTreeSet<RecordKey>,
    /// When this state was last committed.
    pub last_updated: Option<DateTime<Utc>>,
}

impl SeenState {
    /// Whether `key` was already alerted on.
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.seen_keys.contains(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.seen_keys.len()
    }

    /// True when nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.seen_keys.is_empty()
    }

    /// Returns a copy stamped with a new commit time.
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }
}

/// Seen-state persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file exists but cannot be understood.
    #[error("seen-state file {path} is corrupt: {reason}")]
    Corrupt {
        /// State file location.
        path: PathBuf,
        /// Parser or version complaint.
        reason: String,
    },
    /// Reading or writing the state file failed.
    #[error("seen-state io error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// True for [`StoreError::Corrupt`].
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Exclusive owner of the durable seen-state.
pub trait SeenStateStore {
    /// Reads the current state; a missing store yields an empty state.
    fn load(&self) -> Result<SeenState, StoreError>;

    /// Atomically replaces the stored state with `state`.
    fn commit(&self, state: &SeenState) -> Result<(), StoreError>;

    /// Clears the stored state, returning how many keys were dropped.
    fn reset(&self) -> Result<usize, StoreError>;
}

impl<T: SeenStateStore + ?Sized> SeenStateStore for &T {
    fn load(&self) -> Result<SeenState, StoreError> {
        (**self).load()
    }

    fn commit(&self, state: &SeenState) -> Result<(), StoreError> {
        (**self).commit(state)
    }

    fn reset(&self) -> Result<usize, StoreError> {
        (**self).reset()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    #[serde(flatten)]
    state: SeenState,
}

/// JSON file store committing through a sibling temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Writes and syncs `state` into a temp file next to the target without
    /// touching the target itself.
    pub(crate) fn stage(&self, state: &SeenState) -> Result<NamedTempFile, StoreError> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        let persisted = PersistedState {
            version: STATE_VERSION,
            state: state.clone(),
        };
        let raw = serde_json::to_vec_pretty(&persisted).map_err(|err| {
            StoreError::io(&self.path, io::Error::new(io::ErrorKind::Other, err))
        })?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
        tmp.write_all(&raw)
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        Ok(tmp)
    }
}

impl SeenStateStore for JsonFileStore {
    fn load(&self) -> Result<SeenState, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no seen-state yet, starting fresh");
                return Ok(SeenState::default());
            }
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };

        let persisted: PersistedState =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;
        if persisted.version != STATE_VERSION {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported state version {}", persisted.version),
            });
        }
        info!(
            path = %self.path.display(),
            seen = persisted.state.len(),
            "loaded seen-state"
        );
        Ok(persisted.state)
    }

    fn commit(&self, state: &SeenState) -> Result<(), StoreError> {
        let tmp = self.stage(state)?;
        tmp.persist(&self.path)
            .map_err(|err| StoreError::io(&self.path, err.error))?;
        debug!(path = %self.path.display(), seen = state.len(), "committed seen-state");
        Ok(())
    }

    fn reset(&self) -> Result<usize, StoreError> {
        // A corrupt ledger is still clearable.
        let previous = match self.load() {
            Ok(state) => state.len(),
            Err(err) if err.is_corrupt() => 0,
            Err(err) => return Err(err),
        };
        self.commit(&SeenState::default())?;
        info!(path = %self.path.display(), cleared = previous, "cleared seen-state");
        Ok(previous)
    }
}
