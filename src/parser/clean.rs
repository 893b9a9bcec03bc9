use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
// "Fiction / Science Fiction / General", "Biography & Autobiography / Literary"
static TAXONOMY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z ,&'-]*\s/\s").unwrap());

/// Strip tags, decode entities and collapse whitespace.
pub fn clean_html(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let text: String = doc.root_element().text().collect();
    collapse_ws(&text)
}

pub fn collapse_ws(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

/// Decides whether a candidate description is prose worth keeping.
pub trait DescriptionFilter {
    fn accept(&self, text: &str) -> bool;
}

/// Rejects classification strings: configured prefixes, slash-separated
/// subject paths and anything that does not start with a letter.
#[derive(Debug, Clone)]
pub struct CategoryCodeFilter {
    prefixes: Vec<String>,
}

impl CategoryCodeFilter {
    pub fn new(prefixes: Vec<String>) -> Self {
        CategoryCodeFilter { prefixes }
    }
}

impl Default for CategoryCodeFilter {
    fn default() -> Self {
        CategoryCodeFilter::new(vec!["FICTION ".to_string(), "Fiction /".to_string()])
    }
}

impl DescriptionFilter for CategoryCodeFilter {
    fn accept(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if self.prefixes.iter().any(|p| !p.is_empty() && text.starts_with(p.as_str())) {
            return false;
        }
        if TAXONOMY_RE.is_match(text) {
            return false;
        }
        let first = text
            .chars()
            .find(|c| !matches!(c, '"' | '\'' | '“' | '‘' | '«' | '¡' | '¿'));
        matches!(first, Some(c) if c.is_alphabetic())
    }
}

impl<F: Fn(&str) -> bool> DescriptionFilter for F {
    fn accept(&self, text: &str) -> bool {
        self(text)
    }
}
