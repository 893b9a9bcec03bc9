//! Value types that cross stage boundaries. Every type here is produced by
//! exactly one stage and owned by the artifact it is written into.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A normalized author name: trimmed, inner whitespace collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorQuery(String);

impl AuthorQuery {
    pub fn new(raw: &str) -> Self {
        AuthorQuery(raw.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AuthorQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One catalog hit. Never edited after the resolver builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub title: String,
    pub author: String,
    #[serde(rename = "id")]
    pub external_id: String,
    #[serde(rename = "available", default)]
    pub available_flag: bool,
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Outcome of one catalog query.
///
/// `reported_count` is the catalog's own total; it may exceed
/// `records.len()` when extraction was partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "author", default)]
    pub queried_author: AuthorQuery,
    #[serde(rename = "count", default)]
    pub reported_count: u32,
    #[serde(rename = "books", default)]
    pub records: Vec<CatalogRecord>,
    #[serde(rename = "url", default)]
    pub source_url: String,
}

impl SearchResult {
    /// Degraded result used when the query could not be completed.
    pub fn empty(author: AuthorQuery, source_url: String) -> Self {
        SearchResult {
            queried_author: author,
            reported_count: 0,
            records: Vec::new(),
            source_url,
        }
    }
}

/// A search result after author filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RefinedWire", into = "RefinedWire")]
pub struct RefinedResult {
    pub result: SearchResult,
    original_count: usize,
}

impl RefinedResult {
    /// `original_count` is the number of records the filter saw, not the
    /// catalog's reported total.
    pub fn new(result: SearchResult, original_count: usize) -> Self {
        RefinedResult {
            result,
            original_count,
        }
    }

    pub fn original_count(&self) -> usize {
        self.original_count
    }

    pub fn removed_count(&self) -> usize {
        self.original_count.saturating_sub(self.result.records.len())
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.result.records
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct RefinedWire {
    #[serde(flatten)]
    result: SearchResult,
    #[serde(default)]
    original_count: Option<usize>,
    #[serde(default)]
    removed_count: usize,
}

impl From<RefinedWire> for RefinedResult {
    fn from(wire: RefinedWire) -> Self {
        // removed_count is derived; the stored value is only informational.
        let original = wire
            .original_count
            .unwrap_or(wire.result.records.len())
            .max(wire.result.records.len());
        RefinedResult::new(wire.result, original)
    }
}

impl From<RefinedResult> for RefinedWire {
    fn from(refined: RefinedResult) -> Self {
        let removed_count = refined.removed_count();
        RefinedWire {
            original_count: Some(refined.original_count),
            removed_count,
            result: refined.result,
        }
    }
}

impl From<RefinedResult> for SearchResult {
    fn from(refined: RefinedResult) -> Self {
        refined.result
    }
}

/// Copy-availability of one item, as read from its detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Availability {
    pub is_available: bool,
    pub available_copies: u32,
    pub owned_copies: u32,
    pub description: Option<String>,
}

impl Availability {
    /// Degraded result used when the detail page could not be fetched.
    pub fn absent() -> Self {
        Availability::default()
    }
}

/// A borrowable book. Only emitted when `available_copies > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub title: String,
    pub author: String,
    #[serde(rename = "id")]
    pub external_id: String,
    pub url: String,
    pub available_copies: u32,
    pub owned_copies: u32,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AvailabilityRecord {
    pub fn from_probe(
        record: &CatalogRecord,
        author: &AuthorQuery,
        url: String,
        availability: Availability,
    ) -> Option<Self> {
        if availability.available_copies == 0 {
            return None;
        }
        Some(AvailabilityRecord {
            title: record.title.clone(),
            author: author.to_string(),
            external_id: record.external_id.clone(),
            url,
            available_copies: availability.available_copies,
            owned_copies: availability.owned_copies,
            formats: record.formats.clone(),
            description: availability.description,
        })
    }
}

/// Values stored in an author-keyed artifact know their own key.
pub trait Keyed {
    fn key(&self) -> &str;
    fn set_key(&mut self, key: &str);
}

impl Keyed for SearchResult {
    fn key(&self) -> &str {
        self.queried_author.as_str()
    }

    fn set_key(&mut self, key: &str) {
        self.queried_author = AuthorQuery::new(key);
    }
}

impl Keyed for RefinedResult {
    fn key(&self) -> &str {
        self.result.key()
    }

    fn set_key(&mut self, key: &str) {
        self.result.set_key(key);
    }
}

/// An author-keyed JSON object that keeps insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ByAuthor<T>(Vec<T>);

impl<T> Default for ByAuthor<T> {
    fn default() -> Self {
        ByAuthor(Vec::new())
    }
}

impl<T: Keyed> ByAuthor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing an existing entry with the same key in place.
    pub fn insert(&mut self, value: T) {
        match self.0.iter().position(|v| v.key() == value.key()) {
            Some(idx) => self.0[idx] = value,
            None => self.0.push(value),
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|v| v.key() == key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T: Keyed> FromIterator<T> for ByAuthor<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut map = ByAuthor::new();
        for value in iter {
            map.insert(value);
        }
        map
    }
}

impl<T: Keyed + Serialize> Serialize for ByAuthor<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for value in &self.0 {
            map.serialize_entry(value.key(), value)?;
        }
        map.end()
    }
}

impl<'de, T: Keyed + Deserialize<'de>> Deserialize<'de> for ByAuthor<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByAuthorVisitor<T>(PhantomData<T>);

        impl<'de, T: Keyed + Deserialize<'de>> Visitor<'de> for ByAuthorVisitor<T> {
            type Value = ByAuthor<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by author name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = ByAuthor::new();
                while let Some((key, mut value)) = access.next_entry::<String, T>()? {
                    // The object key is authoritative for the author.
                    value.set_key(&key);
                    out.insert(value);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(ByAuthorVisitor(PhantomData))
    }
}
