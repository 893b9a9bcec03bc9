use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::fetch::Fetch;
use crate::model::{AuthorQuery, CatalogRecord, SearchResult};
use crate::parser::{self, TITLE_COLLECTION};

static SHOWING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Showing\s+\d+\s*-\s*\d+\s+of\s+([\d,]+)\s+results?").unwrap()
});
static RESULTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d,]+)\s+results?").unwrap());

/// How much of a search page could be read.
#[derive(Debug)]
pub enum Outcome {
    /// Items array parsed and every item was usable.
    Complete,
    /// Some data was read but `records` is short of `reported_count`.
    Partial,
    /// Page fetched but neither the heading nor the items array was found.
    Unparsed,
    Failed(FetchError),
}

impl Outcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Unparsed | Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Complete => f.write_str("complete"),
            Outcome::Partial => f.write_str("partial extraction"),
            Outcome::Unparsed => f.write_str("page not understood"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

pub struct Resolution {
    pub result: SearchResult,
    pub outcome: Outcome,
}

/// One catalog search per author.
pub struct SearchResolver<'a, F: Fetch> {
    fetcher: &'a F,
    base_url: &'a str,
    format_filter: &'a str,
}

impl<'a, F: Fetch> SearchResolver<'a, F> {
    pub fn new(fetcher: &'a F, settings: &'a Settings) -> Self {
        SearchResolver {
            fetcher,
            base_url: &settings.base_url,
            format_filter: &settings.format_filter,
        }
    }

    pub fn query_url(&self, author: &AuthorQuery) -> String {
        format!(
            "{}/search?query={}&format={}&sortBy=relevance",
            self.base_url,
            urlencoding::encode(author.as_str()),
            urlencoding::encode(self.format_filter),
        )
    }

    /// Never fails: transport errors give an empty result carrying the URL.
    pub fn resolve(&self, author: &AuthorQuery) -> SearchResult {
        self.resolve_detailed(author).result
    }

    pub fn resolve_detailed(&self, author: &AuthorQuery) -> Resolution {
        let url = self.query_url(author);
        let page = match self.fetcher.get(&url) {
            Ok(page) => page,
            Err(e) => {
                warn!(author = %author, "search failed: {}", e);
                return Resolution {
                    result: SearchResult::empty(author.clone(), url),
                    outcome: Outcome::Failed(e),
                };
            }
        };
        let (result, outcome) = parse_search_page(author.clone(), url, &page.body);
        Resolution { result, outcome }
    }
}

/// Build a [`SearchResult`] from a search page body.
pub fn parse_search_page(author: AuthorQuery, url: String, body: &str) -> (SearchResult, Outcome) {
    let page = parser::extract(body);
    let heading_count = page.heading_text().as_deref().and_then(parse_result_count);

    let items = page
        .find_embedded_object(TITLE_COLLECTION)
        .and_then(|v| match v {
            Value::Array(items) => Some(items),
            _ => None,
        });

    let mut result = SearchResult::empty(author, url);
    let outcome = match (items, heading_count) {
        (Some(items), _) => {
            result.reported_count = items.len() as u32;
            result.records = items.iter().filter_map(parse_item).collect();
            if result.records.len() < items.len() {
                debug!(
                    skipped = items.len() - result.records.len(),
                    "unusable catalog items"
                );
                Outcome::Partial
            } else {
                Outcome::Complete
            }
        }
        (None, Some(count)) => {
            result.reported_count = count;
            if count == 0 {
                Outcome::Complete
            } else {
                Outcome::Partial
            }
        }
        (None, None) => Outcome::Unparsed,
    };
    (result, outcome)
}

/// Total from "Showing 1-24 of 1,234 results" (or a bare "N results").
pub fn parse_result_count(text: &str) -> Option<u32> {
    let caps = SHOWING_RE
        .captures(text)
        .or_else(|| RESULTS_RE.captures(text))?;
    caps[1].replace(',', "").parse().ok()
}

fn parse_item(item: &Value) -> Option<CatalogRecord> {
    let obj = item.as_object()?;
    let external_id = match obj.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown".to_string())
    };
    let formats = obj
        .get("formats")
        .and_then(Value::as_array)
        .map(|fs| {
            fs.iter()
                .filter_map(|f| f.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(CatalogRecord {
        title: text("title"),
        author: text("firstCreatorName"),
        external_id,
        available_flag: obj.get("isAvailable").and_then(Value::as_bool).unwrap_or(false),
        formats,
    })
}
