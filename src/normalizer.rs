//! Validation of raw listing entries into typed study records.

use crate::record::Record;
use crate::source::RawEntry;
use thiserror::Error;
use url::Url;

/// Why a raw entry was dropped instead of becoming a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// The entry carried no cells at all.
    #[error("entry has no cells")]
    NoCells,
    /// The first cell, which names the study, was blank.
    #[error("entry has no study title")]
    MissingTitle,
    /// The study link could not be resolved to an absolute URL.
    #[error("unresolvable link {href:?}")]
    InvalidLink {
        /// Offending `href` (or page URL when the row had no link).
        href: String,
    },
}

/// A raw entry that was rejected, with its position in the fetched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Zero-based index into the raw batch.
    pub index: usize,
    /// Category label of the entry, for log context.
    pub year_type: String,
    /// Rejection reason.
    pub reason: SkipReason,
}

/// Result of normalizing one fetched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Valid records in input order.
    pub records: Vec<Record>,
    /// Entries dropped individually.
    pub skipped: Vec<SkippedEntry>,
}

/// Stateless converter from raw entries to records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    base_url: Url,
}

impl Normalizer {
    /// Builds a normalizer resolving relative links against `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Base every relative link is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Normalizes a whole batch. Bad entries are skipped, never fatal.
    pub fn normalize_batch<I>(&self, entries: I) -> NormalizedBatch
    where
        I: IntoIterator<Item = RawEntry>,
    {
        let mut batch = NormalizedBatch::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match self.normalize(&entry) {
                Ok(record) => batch.records.push(record),
                Err(reason) => batch.skipped.push(SkippedEntry {
                    index,
                    year_type: entry.year_type.label.clone(),
                    reason,
                }),
            }
        }
        batch
    }

    /// Validates one entry.
    pub fn normalize(&self, entry: &RawEntry) -> Result<Record, SkipReason> {
        let first = entry.cells.first().ok_or(SkipReason::NoCells)?;
        let title = collapse_whitespace(&first.text);
        if title.is_empty() {
            return Err(SkipReason::MissingTitle);
        }

        let href = first
            .href
            .as_deref()
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .unwrap_or(entry.page_url.as_str());
        let url = self
            .base_url
            .join(href)
            .map_err(|_| SkipReason::InvalidLink {
                href: href.to_string(),
            })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SkipReason::InvalidLink {
                href: href.to_string(),
            });
        }

        let details = entry
            .cells
            .iter()
            .map(|cell| (collapse_whitespace(&cell.header), collapse_whitespace(&cell.text)))
            .collect();

        Ok(Record::new(entry.year_type.clone(), title, url, details))
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}
