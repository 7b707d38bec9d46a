//! SPP OpsPortal adapter: blocking HTTP fetches plus HTML listing extraction.

use super::{CategoryFilter, RawCell, RawEntry, SourceAdapter, TransportError};
use crate::normalizer::collapse_whitespace;
use crate::record::YearType;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Public portal root.
pub const DEFAULT_BASE_URL: &str = "https://opsportal.spp.org";
const INDEX_PATH: &str = "Studies/Gen";
const LIST_PATH: &str = "Studies/GenList";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Connection and politeness settings for [`PortalSource`].
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Portal root every path is joined onto.
    pub base_url: Url,
    /// Pause between successive listing requests.
    pub request_delay: Duration,
    /// Attempts per page before giving up (at least one).
    pub max_retries: usize,
    /// Base of the exponential backoff between attempts.
    pub retry_base: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default portal url"),
            request_delay: Duration::from_secs(2),
            max_retries: 3,
            retry_base: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Source adapter scraping the generator interconnection study listings.
pub struct PortalSource {
    client: Client,
    config: PortalConfig,
    index_url: Url,
    list_url: Url,
}

impl PortalSource {
    /// Builds the adapter and its HTTP client.
    pub fn new(config: PortalConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        let index_url = join(&config.base_url, INDEX_PATH)?;
        let list_url = join(&config.base_url, LIST_PATH)?;
        Ok(Self {
            client,
            config,
            index_url,
            list_url,
        })
    }

    /// Listing page URL for one year type.
    pub fn listing_url(&self, year_type_id: u32) -> Url {
        let mut url = self.list_url.clone();
        url.query_pairs_mut()
            .append_pair("yearTypeId", &year_type_id.to_string());
        url
    }

    fn index(&self) -> Result<BTreeMap<u32, String>, TransportError> {
        info!(url = %self.index_url, "discovering study year types");
        let html = self.fetch_page(&self.index_url)?;
        let found = parse_year_types(&html, &self.config.base_url);
        info!(count = found.len(), "discovered study year types");
        Ok(found)
    }

    fn resolve_year_types(&self, filter: &CategoryFilter) -> Result<Vec<YearType>, TransportError> {
        if filter.is_all() {
            let found = self.index()?;
            if found.is_empty() {
                return Err(TransportError::NoCategories);
            }
            return Ok(found
                .into_iter()
                .map(|(id, label)| YearType::new(id, label))
                .collect());
        }

        // Labels are cosmetic; an unreachable index must not block explicit ids.
        let labels = self.index().unwrap_or_else(|err| {
            warn!(error = %err, "could not label configured year types");
            BTreeMap::new()
        });
        Ok(filter
            .ids()
            .map(|id| match labels.get(&id) {
                Some(label) => YearType::new(id, label.clone()),
                None => YearType::unlabeled(id),
            })
            .collect())
    }

    fn fetch_page(&self, url: &Url) -> Result<String, TransportError> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            let response = self
                .client
                .get(url.clone())
                .send()
                .and_then(|resp| resp.error_for_status())
                .and_then(|resp| resp.text());
            match response {
                Ok(body) => return Ok(body),
                Err(err) => {
                    warn!(
                        %url,
                        attempt = attempt + 1,
                        attempts,
                        error = %err,
                        "portal request failed"
                    );
                    last_error = err.to_string();
                    if attempt + 1 < attempts {
                        thread::sleep(self.retry_backoff(attempt));
                    }
                }
            }
        }
        Err(TransportError::Unavailable {
            url: url.to_string(),
            attempts,
            reason: last_error,
        })
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.config.retry_base * (1 << capped)
    }
}

impl SourceAdapter for PortalSource {
    fn fetch(&self, filter: &CategoryFilter) -> Result<Vec<RawEntry>, TransportError> {
        let year_types = self.resolve_year_types(filter)?;
        let mut entries = Vec::new();
        for (idx, year_type) in year_types.iter().enumerate() {
            if idx > 0 && !self.config.request_delay.is_zero() {
                thread::sleep(self.config.request_delay);
            }
            let url = self.listing_url(year_type.id);
            info!(%url, year_type = %year_type, "fetching study listing");
            let html = self.fetch_page(&url)?;
            let found = parse_listing(&html, year_type, url.as_str());
            debug!(count = found.len(), year_type = year_type.id, "parsed listing");
            entries.extend(found);
        }
        info!(total = entries.len(), "fetched raw study entries");
        Ok(entries)
    }

    fn discover(&self) -> Result<Vec<YearType>, TransportError> {
        Ok(self
            .index()?
            .into_iter()
            .map(|(id, label)| YearType::new(id, label))
            .collect())
    }
}

fn join(base: &Url, path: &str) -> Result<Url, TransportError> {
    Ok(base.join(path)?)
}

struct Selectors {
    anchor: Selector,
    table: Selector,
    row: Selector,
    header_cell: Selector,
    cell: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            anchor: Selector::parse("a[href]").expect("anchor selector"),
            table: Selector::parse("table").expect("table selector"),
            row: Selector::parse("tr").expect("row selector"),
            header_cell: Selector::parse("th").expect("th selector"),
            cell: Selector::parse("th, td").expect("cell selector"),
        }
    }
}

/// Extracts `yearTypeId -> label` pairs from the studies index page.
///
/// Only anchors pointing at a `GenList` page with a numeric `yearTypeId` and a
/// non-empty label count.
pub fn parse_year_types(html: &str, base: &Url) -> BTreeMap<u32, String> {
    let document = Html::parse_document(html);
    let selectors = Selectors::new();
    let mut found = BTreeMap::new();
    for link in document.select(&selectors.anchor) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href.contains("GenList") {
            continue;
        }
        let Some(id) = year_type_param(href, base) else {
            continue;
        };
        let label = element_text(&link);
        if !label.is_empty() {
            found.insert(id, label);
        }
    }
    found
}

fn year_type_param(href: &str, base: &Url) -> Option<u32> {
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == "yearTypeId")
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Extracts raw entries from one listing page.
///
/// Table rows are preferred; when the page has none, study-looking links
/// anywhere on the page are used instead.
pub fn parse_listing(html: &str, year_type: &YearType, page_url: &str) -> Vec<RawEntry> {
    let document = Html::parse_document(html);
    let selectors = Selectors::new();
    let mut entries = table_entries(&document, &selectors, year_type, page_url);
    if entries.is_empty() {
        entries = link_entries(&document, &selectors, year_type, page_url);
    }
    entries
}

fn table_entries(
    document: &Html,
    selectors: &Selectors,
    year_type: &YearType,
    page_url: &str,
) -> Vec<RawEntry> {
    let mut entries = Vec::new();
    for table in document.select(&selectors.table) {
        let mut headers: Vec<String> = Vec::new();
        for row in table.select(&selectors.row) {
            let cells: Vec<ElementRef<'_>> = row.select(&selectors.cell).collect();
            if row.select(&selectors.header_cell).next().is_some() {
                headers = cells.iter().map(element_text).collect();
                continue;
            }
            if cells.is_empty() {
                continue;
            }
            let cells = cells
                .iter()
                .enumerate()
                .map(|(idx, cell)| {
                    let header = headers
                        .get(idx)
                        .filter(|name| !name.is_empty())
                        .cloned()
                        .unwrap_or_else(|| format!("col_{idx}"));
                    let href = cell
                        .select(&selectors.anchor)
                        .next()
                        .and_then(|link| link.value().attr("href"))
                        .map(str::to_string);
                    RawCell::new(header, element_text(cell), href)
                })
                .collect();
            entries.push(RawEntry {
                year_type: year_type.clone(),
                page_url: page_url.to_string(),
                cells,
            });
        }
    }
    entries
}

fn link_entries(
    document: &Html,
    selectors: &Selectors,
    year_type: &YearType,
    page_url: &str,
) -> Vec<RawEntry> {
    document
        .select(&selectors.anchor)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let text = element_text(&link);
            if text.is_empty() || !looks_like_study(&text, href) {
                return None;
            }
            Some(RawEntry {
                year_type: year_type.clone(),
                page_url: page_url.to_string(),
                cells: vec![RawCell::new("col_0", text, Some(href.to_string()))],
            })
        })
        .collect()
}

fn looks_like_study(text: &str, href: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("study")
        || lowered.contains("gen-")
        || lowered.contains("disis")
        || href.ends_with(".pdf")
        || href.contains("/documents/")
}

fn element_text(element: &ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    collapse_whitespace(&raw)
}
