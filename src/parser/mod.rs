pub mod clean;
pub mod literal;

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use serde_json::Value;

/// The embedded catalog object the OverDrive pages assign in script.
pub const TITLE_COLLECTION: &str = "window.OverDrive.titleCollection";

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<h1\b[^>]*class="[^"]*\bsearch-text\b[^"]*"[^>]*>(.*?)</h1>"#).unwrap());

/// Per-field patterns, compiled once per distinct pattern string.
static FIELD_PATTERNS: LazyLock<Mutex<HashMap<String, Regex>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn compiled(pattern: String) -> Option<Regex> {
    let mut cache = FIELD_PATTERNS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(&pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(&pattern).ok()?;
    cache.insert(pattern, re.clone());
    Some(re)
}

/// A markup element located by tag name and one class-like attribute value.
#[derive(Debug, Clone, Copy)]
pub struct TagPattern<'p> {
    pub tag: &'p str,
    pub attr: &'p str,
    pub value: &'p str,
}

impl<'p> TagPattern<'p> {
    pub const fn class(tag: &'p str, value: &'p str) -> Self {
        TagPattern {
            tag,
            attr: "class",
            value,
        }
    }

    fn regex(&self) -> Option<Regex> {
        // attribute value may carry other classes before or after
        compiled(format!(
            r#"(?s)<{tag}\b[^>]*\b{attr}="(?:[^"]*\s)?{value}[^"]*"[^>]*>(.*?)</{tag}>"#,
            tag = regex::escape(self.tag),
            attr = regex::escape(self.attr),
            value = regex::escape(self.value),
        ))
    }
}

/// One way of locating a value in a page.
#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    /// `"name":value` anywhere in the body.
    Field(&'a str),
    /// `name` as a member of the object assigned to `variable`.
    Embedded { variable: &'a str, field: &'a str },
    /// Inner text of a tagged markup block, cleaned of markup.
    Block(&'a TagPattern<'a>),
}

/// Raw result of one strategy, before typing.
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    Raw(String),
    Json(Value),
    Text(String),
}

impl Found {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Found::Raw(s) | Found::Text(s) => s.trim().trim_matches('"').parse().ok(),
            Found::Json(v) => v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Found::Raw(s) | Found::Text(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Found::Json(v) => v.as_bool(),
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Found::Text(s) => Some(s),
            Found::Raw(s) => {
                let s = s.trim();
                match s.strip_prefix('"').and_then(|inner| inner.strip_suffix('"')) {
                    Some(inner) => Some(literal::unescape_js(inner)),
                    None => Some(s.to_string()),
                }
            }
            Found::Json(Value::String(s)) => Some(s),
            Found::Json(_) => None,
        }
    }
}

/// A fetched page body with typed lookups. Every lookup returns `None`
/// when its field is structurally absent; nothing here fails the page.
pub struct ExtractedPage<'a> {
    body: &'a str,
}

pub fn extract(body: &str) -> ExtractedPage<'_> {
    ExtractedPage { body }
}

impl<'a> ExtractedPage<'a> {
    /// Try each strategy in order; the first hit wins.
    pub fn lookup(&self, chain: &[Strategy<'_>]) -> Option<Found> {
        chain.iter().find_map(|s| self.apply(s))
    }

    fn apply(&self, strategy: &Strategy<'_>) -> Option<Found> {
        match *strategy {
            Strategy::Field(name) => self.field_scan(name).map(|s| Found::Raw(s.to_string())),
            Strategy::Embedded { variable, field } => self
                .find_embedded_object(variable)
                .and_then(|v| member(&v, field).cloned())
                .map(Found::Json),
            Strategy::Block(pattern) => self
                .find_tagged_block(pattern)
                .map(|raw| clean::clean_html(&raw))
                .filter(|text| !text.is_empty())
                .map(Found::Text),
        }
    }

    /// First strategy hit as plain text.
    pub fn find_text(&self, chain: &[Strategy<'_>]) -> Option<String> {
        self.lookup(chain).and_then(Found::into_text)
    }

    /// Field scan, then the title collection, then an element whose class
    /// is the field name (`<span class="availableCopies">3</span>`).
    pub fn find_integer(&self, field: &str) -> Option<i64> {
        let block = TagPattern::class("span", field);
        self.lookup(&field_chain(field, &block))
            .and_then(|f| f.as_integer())
    }

    pub fn find_boolean(&self, field: &str) -> Option<bool> {
        let block = TagPattern::class("span", field);
        self.lookup(&field_chain(field, &block))
            .and_then(|f| f.as_bool())
    }

    /// First `"field":"..."` string value, unescaped.
    pub fn find_string(&self, field: &str) -> Option<String> {
        let re = compiled(format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field)))?;
        re.captures(self.body)
            .map(|c| literal::unescape_js(&c[1]))
    }

    /// Parse the literal assigned to `variable` (`variable = {...};`).
    pub fn find_embedded_object(&self, variable: &str) -> Option<Value> {
        let literal = self.embedded_literal(variable)?;
        serde_json::from_str(literal).ok()
    }

    /// Inner HTML of the first element matching `pattern`.
    pub fn find_tagged_block(&self, pattern: &TagPattern<'_>) -> Option<String> {
        let re = pattern.regex()?;
        re.captures(self.body)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// String value of `field` that follows the first `after` member inside
    /// the literal assigned to `variable`. Used to skip earlier fields of
    /// the same name that belong to nested objects.
    pub fn find_string_after(&self, variable: &str, after: &str, field: &str) -> Option<String> {
        let scope = self.embedded_literal(variable)?;
        let re = compiled(format!(
            r#""{after}"\s*:[^}}]+\}}\s*,\s*"{field}"\s*:\s*"((?:[^"\\]|\\.)*?)""#,
            after = regex::escape(after),
            field = regex::escape(field),
        ))?;
        re.captures(scope).map(|c| literal::unescape_js(&c[1]))
    }

    /// Text of the search results heading (`<h1 class="search-text">`).
    pub fn heading_text(&self) -> Option<String> {
        HEADING_RE
            .captures(self.body)
            .map(|c| clean::clean_html(&c[1]))
    }

    fn embedded_literal(&self, variable: &str) -> Option<&'a str> {
        let re = compiled(format!(r"{}\s*=\s*", regex::escape(variable)))?;
        let m = re.find(self.body)?;
        let rest = &self.body[m.end()..];
        let len = literal::balanced_len(rest)?;
        Some(&rest[..len])
    }

    fn field_scan(&self, name: &str) -> Option<&'a str> {
        let re = compiled(format!(
            r#""{}"\s*:\s*(-?\d+(?:\.\d+)?|true|false|null|"(?:[^"\\]|\\.)*")"#,
            regex::escape(name)
        ))?;
        let body = self.body;
        re.captures(body)
            .and_then(|c| c.get(1))
            .map(|m| &body[m.start()..m.end()])
            .filter(|s| *s != "null")
    }
}

fn field_chain<'a>(field: &'a str, block: &'a TagPattern<'a>) -> [Strategy<'a>; 3] {
    [
        Strategy::Field(field),
        Strategy::Embedded {
            variable: TITLE_COLLECTION,
            field,
        },
        Strategy::Block(block),
    ]
}

/// `field` on an object, or on the first element of an array of objects.
fn member<'v>(value: &'v Value, field: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(field),
        Value::Array(items) => items.first().and_then(|v| v.get(field)),
        _ => None,
    }
}
