//! Source adapter boundary: raw listing entries and the trait that fetches them.

pub mod portal;

use crate::record::YearType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// One table cell (or standalone link) scraped from a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCell {
    /// Column header, or `col_<index>` when the table had none.
    pub header: String,
    /// Visible cell text, not yet normalized.
    pub text: String,
    /// Raw `href` of the first link inside the cell, if any.
    pub href: Option<String>,
}

impl RawCell {
    /// Builds a cell.
    pub fn new(header: impl Into<String>, text: impl Into<String>, href: Option<String>) -> Self {
        Self {
            header: header.into(),
            text: text.into(),
            href,
        }
    }
}

/// Unvalidated listing entry as delivered by a [`SourceAdapter`].
///
/// Nothing about the cells is trusted yet; the normalizer decides whether the
/// entry becomes a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Category the entry was listed under.
    pub year_type: YearType,
    /// Page the entry was scraped from; fallback link for link-less rows.
    pub page_url: String,
    /// Cells in page order. The first cell names the study.
    pub cells: Vec<RawCell>,
}

/// Set of year type ids to monitor. Empty means every published category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    ids: BTreeSet<u32>,
}

impl CategoryFilter {
    /// Filter that accepts every category.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter restricted to the given ids.
    pub fn only(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// True when no restriction applies.
    pub fn is_all(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether entries in `id` should be monitored.
    pub fn accepts(&self, id: u32) -> bool {
        self.ids.is_empty() || self.ids.contains(&id)
    }

    /// Explicitly requested ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

/// Failures while pulling listing data. Always fatal for a run.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A page could not be fetched after exhausting retries.
    #[error("failed to fetch {url} after {attempts} attempt(s): {reason}")]
    Unavailable {
        /// Requested URL.
        url: String,
        /// Attempts made before giving up.
        attempts: usize,
        /// Last error observed.
        reason: String,
    },
    /// Discovery returned no categories, so there is nothing to monitor.
    #[error("no study categories were found on the portal index")]
    NoCategories,
    /// A portal URL could not be built from the configured base.
    #[error("invalid portal url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Supplier of raw listing entries.
pub trait SourceAdapter {
    /// Fetches every raw entry for the categories accepted by `filter`.
    fn fetch(&self, filter: &CategoryFilter) -> Result<Vec<RawEntry>, TransportError>;

    /// Lists the distinct categories the source currently publishes.
    ///
    /// The default derives them from a full fetch; adapters with a cheaper
    /// index override it.
    fn discover(&self) -> Result<Vec<YearType>, TransportError> {
        let entries = self.fetch(&CategoryFilter::all())?;
        Ok(distinct_categories(&entries))
    }
}

impl<T: SourceAdapter + ?Sized> SourceAdapter for &T {
    fn fetch(&self, filter: &CategoryFilter) -> Result<Vec<RawEntry>, TransportError> {
        (**self).fetch(filter)
    }

    fn discover(&self) -> Result<Vec<YearType>, TransportError> {
        (**self).discover()
    }
}

/// Distinct categories among `entries`, ordered by id.
pub fn distinct_categories(entries: &[RawEntry]) -> Vec<YearType> {
    let mut seen: BTreeMap<u32, YearType> = BTreeMap::new();
    for entry in entries {
        seen.entry(entry.year_type.id)
            .or_insert_with(|| entry.year_type.clone());
    }
    seen.into_values().collect()
}
