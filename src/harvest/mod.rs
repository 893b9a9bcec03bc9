//! Author lists from reference sources: award pages and a radio archive.

pub mod bbc;
pub mod wiki;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StageError;
use crate::fetch::{Fetch, Pacer};
use crate::metrics::Progress;
use crate::store::Table;

static TRAILING_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\(.*?\)$").unwrap());
static TRAILING_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\[.*?\]$").unwrap());
static REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[\d+\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Hugo,
    Booker,
    Nobel,
    Bbc,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Hugo, Source::Booker, Source::Nobel, Source::Bbc];

    pub fn name(self) -> &'static str {
        match self {
            Source::Hugo => "hugo",
            Source::Booker => "booker",
            Source::Nobel => "nobel",
            Source::Bbc => "bbc",
        }
    }

    pub fn records_artifact(self) -> &'static str {
        match self {
            Source::Hugo => "hugo_award_nominees.json",
            Source::Booker => "booker_prize_nominees.json",
            Source::Nobel => "nobel_literature_laureates.json",
            Source::Bbc => "bbc_world_book_club_episodes.json",
        }
    }

    pub fn authors_artifact(self) -> String {
        format!("{}_authors.json", self.name())
    }

    /// Pages to fetch, in order.
    pub fn page_urls(self, bbc_pages: u32) -> Vec<String> {
        match self {
            Source::Hugo => vec![wiki::HUGO_URL.to_string()],
            Source::Booker => vec![wiki::BOOKER_URL.to_string()],
            Source::Nobel => vec![wiki::NOBEL_URL.to_string()],
            Source::Bbc => (0..=bbc_pages).map(bbc::page_url).collect(),
        }
    }

    fn parse_page(self, body: &str, page: u32) -> Vec<HarvestRecord> {
        match self {
            Source::Hugo => wiki::parse_hugo(body),
            Source::Booker => wiki::parse_booker(body),
            Source::Nobel => wiki::parse_nobel(body),
            Source::Bbc => bbc::parse_episodes(body, page),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|src| src.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source '{}' (expected hugo, booker, nobel or bbc)", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standing {
    Winner,
    Shortlist,
    Longlist,
    Nominee,
    Laureate,
}

impl Standing {
    pub fn as_str(self) -> &'static str {
        match self {
            Standing::Winner => "winner",
            Standing::Shortlist => "shortlist",
            Standing::Longlist => "longlist",
            Standing::Nominee => "nominee",
            Standing::Laureate => "laureate",
        }
    }
}

/// One harvested entry. Source-specific columns live in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestRecord {
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standing: Option<Standing>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl HarvestRecord {
    pub fn new(author: impl Into<String>) -> Self {
        HarvestRecord {
            author: author.into(),
            title: None,
            year: None,
            standing: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    fn is_winner(&self) -> bool {
        self.standing == Some(Standing::Winner)
    }

    fn dedupe_key(&self) -> (String, String) {
        (
            self.author.to_lowercase(),
            self.title.as_deref().unwrap_or_default().to_lowercase(),
        )
    }
}

pub struct Harvest {
    pub records: Vec<HarvestRecord>,
    pub pages: usize,
    pub failed_pages: usize,
}

impl Harvest {
    /// Nothing usable was fetched; the previous artifact should be kept.
    pub fn is_empty_failure(&self) -> bool {
        self.records.is_empty() && self.failed_pages > 0
    }
}

/// Fetch and parse every page of `source`. Page failures are logged and
/// counted; only cancellation aborts.
pub fn harvest<F: Fetch>(
    source: Source,
    fetcher: &F,
    pacer: &mut Pacer,
    bbc_pages: u32,
    limit: Option<usize>,
    progress: &Progress,
) -> Result<Harvest, StageError> {
    let urls = source.page_urls(bbc_pages);
    let mut records = Vec::new();
    let mut failed_pages = 0;
    for (page, url) in urls.iter().enumerate() {
        pacer.wait()?;
        match fetcher.get(url) {
            Ok(body) => {
                let found = source.parse_page(&body.body, page as u32);
                progress.line(format!("{} page {}: {} entries", source, page, found.len()));
                records.extend(found);
            }
            Err(e) => {
                failed_pages += 1;
                progress.warn(format!("{} page {} failed: {}", source, page, e));
            }
        }
        progress.inc();
    }

    let mut records = dedupe(records);
    if let Some(n) = limit {
        records.truncate(n);
    }
    info!(
        source = %source,
        entries = records.len(),
        winners = records.iter().filter(|r| r.is_winner()).count(),
        failed_pages,
        "harvest parsed"
    );
    Ok(Harvest {
        records,
        pages: urls.len(),
        failed_pages,
    })
}

/// Collapse duplicate (author, title) pairs; a winner replaces an earlier
/// non-winner in place.
pub fn dedupe(records: Vec<HarvestRecord>) -> Vec<HarvestRecord> {
    let mut out: Vec<HarvestRecord> = Vec::with_capacity(records.len());
    for record in records {
        let key = record.dedupe_key();
        match out.iter().position(|r| r.dedupe_key() == key) {
            Some(idx) => {
                if record.is_winner() && !out[idx].is_winner() {
                    out[idx] = record;
                }
            }
            None => out.push(record),
        }
    }
    out
}

/// Cleaned, de-duplicated author names in first-seen order.
pub fn author_list<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in names {
        let Some(name) = clean_author(raw) else {
            continue;
        };
        if seen.insert(name.to_lowercase()) {
            out.push(name);
        }
    }
    out
}

pub fn clean_author(raw: &str) -> Option<String> {
    let name = TRAILING_PAREN_RE.replace(raw.trim(), "");
    let name = TRAILING_BRACKET_RE.replace(&name, "");
    let name = REF_RE.replace_all(&name, "");
    let name = name.split(" and ").next().unwrap_or_default().trim();
    (name.chars().count() >= 2).then(|| name.to_string())
}

/// Records as a table: the common columns, then every extra key seen.
pub fn records_table(records: &[HarvestRecord]) -> Table {
    let extra_keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.extra.keys().map(String::as_str))
        .collect();
    let mut header = vec!["author", "title", "year", "standing"];
    header.extend(extra_keys.iter().copied());
    let mut table = Table::new(&header);
    for r in records {
        let mut row = vec![
            r.author.clone(),
            r.title.clone().unwrap_or_default(),
            r.year.map(|y| y.to_string()).unwrap_or_default(),
            r.standing.map(|s| s.as_str().to_string()).unwrap_or_default(),
        ];
        for key in &extra_keys {
            row.push(match r.extra.get(*key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            });
        }
        table.push(row);
    }
    table
}

/// Accepts a records array, an `[{author}]` array or a plain string array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AuthorInput {
    Names(Vec<String>),
    Records(Vec<HarvestRecord>),
}

impl AuthorInput {
    /// Distinct, non-empty authors (case-insensitive), first-seen order.
    pub fn authors(&self) -> Vec<String> {
        let names: Vec<&str> = match self {
            AuthorInput::Names(names) => names.iter().map(String::as_str).collect(),
            AuthorInput::Records(records) => records.iter().map(|r| r.author.as_str()).collect(),
        };
        let mut seen = HashSet::new();
        names
            .into_iter()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .filter(|n| seen.insert(n.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

/// Authors for a harvested source: the curated list when given, else the
/// cleaned record authors.
pub fn authors_for(records: &[HarvestRecord], curated: Option<Vec<String>>) -> Vec<String> {
    match curated {
        Some(list) if !list.is_empty() => {
            info!(count = list.len(), "using curated author list");
            author_list(list.iter().map(String::as_str))
        }
        Some(_) => {
            warn!("curated author list is empty, deriving from records");
            author_list(records.iter().map(|r| r.author.as_str()))
        }
        None => author_list(records.iter().map(|r| r.author.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockFetcher;
    use crate::fetch::CancelToken;

    fn rec(author: &str, title: &str, standing: Standing) -> HarvestRecord {
        let mut r = HarvestRecord::new(author).with_title(title);
        r.standing = Some(standing);
        r
    }

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("Hugo".parse::<Source>().unwrap(), Source::Hugo);
        assert!("pulitzer".parse::<Source>().is_err());
        assert_eq!(Source::Nobel.authors_artifact(), "nobel_authors.json");
    }

    #[test]
    fn winner_replaces_nominee_in_place() {
        let records = vec![
            rec("Ann Leckie", "Ancillary Justice", Standing::Nominee),
            rec("Jo Walton", "Among Others", Standing::Nominee),
            rec("ann leckie", "ANCILLARY JUSTICE", Standing::Winner),
            rec("Jo Walton", "Among Others", Standing::Nominee),
        ];
        let out = dedupe(records);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].standing, Some(Standing::Winner));
        assert_eq!(out[1].author, "Jo Walton");
    }

    #[test]
    fn author_list_cleans_and_keeps_order() {
        let names = [
            "Zadie Smith",
            "Hilary Mantel (translator)",
            "Julian Barnes[12]",
            "zadie smith",
            "Margaret Atwood and Someone Else",
            "X",
            "Hilary Mantel",
        ];
        assert_eq!(
            author_list(names),
            vec!["Zadie Smith", "Hilary Mantel", "Julian Barnes", "Margaret Atwood"]
        );
    }

    #[test]
    fn author_input_accepts_all_shapes() {
        let plain: AuthorInput = serde_json::from_str(r#"["Mo Yan", "mo yan", " ", "Ann Leckie"]"#).unwrap();
        assert_eq!(plain.authors(), vec!["Mo Yan", "Ann Leckie"]);

        let objects: AuthorInput =
            serde_json::from_str(r#"[{"author":"Jane Doe"},{"author":"Jane Doe","title":"X","year":2001}]"#).unwrap();
        assert_eq!(objects.authors(), vec!["Jane Doe"]);

        let legacy: AuthorInput = serde_json::from_str(
            r#"[{"author":"Ann Leckie","title":"Ancillary Justice","won":true,"year":2014}]"#,
        )
        .unwrap();
        match &legacy {
            AuthorInput::Records(r) => assert_eq!(r[0].extra["won"], Value::Bool(true)),
            AuthorInput::Names(_) => panic!("expected records"),
        }
    }

    #[test]
    fn records_table_has_extra_columns() {
        let records = vec![
            HarvestRecord::new("Mo Yan").with_extra("country", "China"),
            HarvestRecord::new("Ann Leckie").with_title("Ancillary Justice"),
        ];
        let table = records_table(&records);
        assert_eq!(table.header, vec!["author", "title", "year", "standing", "country"]);
        assert_eq!(table.rows[0], vec!["Mo Yan", "", "", "", "China"]);
        assert_eq!(table.rows[1][1], "Ancillary Justice");
    }

    #[test]
    fn curated_list_overrides_records() {
        let records = vec![HarvestRecord::new("Derived Name")];
        assert_eq!(authors_for(&records, None), vec!["Derived Name"]);
        assert_eq!(
            authors_for(&records, Some(vec!["Curated Author".into()])),
            vec!["Curated Author"]
        );
    }

    #[test]
    fn failed_pages_are_counted_not_fatal() {
        let urls = Source::Bbc.page_urls(1);
        let page0 = r#"<div data-testid="york-card"><a href="/audio/play/w3cs1"><span class="sc-4d4e1117-7">Zadie Smith - White Teeth</span></a></div>"#;
        let mock = MockFetcher::new()
            .with_page(&urls[0], page0)
            .with_failure(&urls[1]);
        let mut pacer = Pacer::new(0.0, CancelToken::new());
        let out = harvest(Source::Bbc, &mock, &mut pacer, 1, None, &Progress::hidden()).unwrap();
        assert_eq!(out.pages, 2);
        assert_eq!(out.failed_pages, 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].author, "Zadie Smith");
        assert!(!out.is_empty_failure());
    }

    #[test]
    fn limit_applies_after_duplicates_collapse() {
        let card = |id: &str, text: &str| {
            format!(
                r#"<div data-testid="york-card"><a href="/audio/play/{}"><span class="sc-4d4e1117-7">{}</span></a></div>"#,
                id, text
            )
        };
        let page0 = [
            card("w1", "Zadie Smith - White Teeth"),
            card("w2", "Zadie Smith - White Teeth"),
            card("w3", "Ann Leckie - Ancillary Justice"),
            card("w4", "Mo Yan - Red Sorghum"),
        ]
        .concat();
        let urls = Source::Bbc.page_urls(0);
        let mock = MockFetcher::new().with_page(&urls[0], &page0);
        let mut pacer = Pacer::new(0.0, CancelToken::new());
        let out = harvest(Source::Bbc, &mock, &mut pacer, 0, Some(2), &Progress::hidden()).unwrap();
        let authors: Vec<&str> = out.records.iter().map(|r| r.author.as_str()).collect();
        assert_eq!(authors, vec!["Zadie Smith", "Ann Leckie"]);
    }

    #[test]
    fn cancelled_harvest_is_interrupted() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut pacer = Pacer::new(0.0, cancel);
        let mock = MockFetcher::new();
        let out = harvest(Source::Hugo, &mock, &mut pacer, 0, None, &Progress::hidden());
        assert!(matches!(out, Err(StageError::Interrupted)));
        assert_eq!(mock.request_count(), 0);
    }
}
