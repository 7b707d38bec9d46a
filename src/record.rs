//! Canonical study-listing records and their identity keys.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use url::Url;

/// Study classification ("year type") published by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearType {
    /// Numeric `yearTypeId` query parameter.
    pub id: u32,
    /// Human-readable label such as `DISIS 2024-001`.
    pub label: String,
}

impl YearType {
    /// Builds a year type from its id and label.
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Label used when the portal index did not provide one.
    pub fn unlabeled(id: u32) -> Self {
        Self::new(id, format!("YearType {id}"))
    }
}

impl fmt::Display for YearType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Stable identity of a study entry across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Derives the key from the identity-bearing fields of an entry.
    ///
    /// Only the year type id, the collapsed title and the absolute link take
    /// part; display details never do. The link is used in its serialized,
    /// percent-encoded form.
    pub fn derive(year_type_id: u32, title: &str, url: &Url) -> Self {
        Self(format!("{year_type_id}:{title}:{url}"))
    }

    /// Wraps an already-derived key, e.g. one loaded from disk.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrowed key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RecordKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One validated study posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identity key; two records with the same key are the same study.
    pub key: RecordKey,
    /// Category the study was listed under.
    pub year_type: YearType,
    /// Study name as shown on the listing.
    pub title: String,
    /// Absolute link to the study page or document.
    pub url: Url,
    /// Remaining listing columns, in page order, for notification content.
    pub details: Vec<(String, String)>,
}

impl Record {
    /// Builds a record, deriving its key from the identity fields.
    pub fn new(
        year_type: YearType,
        title: impl Into<String>,
        url: Url,
        details: Vec<(String, String)>,
    ) -> Self {
        let title = title.into();
        let key = RecordKey::derive(year_type.id, &title, &url);
        Self {
            key,
            year_type,
            title,
            url,
            details,
        }
    }

    /// Detail columns worth showing: non-empty values only.
    pub fn visible_details(&self) -> impl Iterator<Item = (&str, &str)> {
        self.details
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
