use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{HarvestRecord, Standing};
use crate::parser::clean::collapse_ws;

pub const HUGO_URL: &str = "https://en.wikipedia.org/wiki/Hugo_Award_for_Best_Novel";
pub const BOOKER_URL: &str =
    "https://en.wikipedia.org/wiki/List_of_winners_and_nominated_authors_of_the_Booker_Prize";
pub const NOBEL_URL: &str = "https://en.wikipedia.org/wiki/List_of_Nobel_laureates_in_Literature";

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table.wikitable").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static AKA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(also known as.*?\)").unwrap());
static REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[\d+\]").unwrap());
static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(.*?\)").unwrap());
static LIFESPAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(\d{4}\s*[–-]\s*(?:\d{4})?\)").unwrap());

fn text_of(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<String>())
}

fn year_in(text: &str) -> Option<i32> {
    YEAR_RE.captures(text).and_then(|c| c[1].parse().ok())
}

/// Year carried by a header cell of the row (rowspan year columns).
fn row_year(row: ElementRef<'_>) -> Option<i32> {
    row.select(&TH_SEL).find_map(|th| year_in(&text_of(th)))
}

fn is_year_cell(text: &str) -> bool {
    let t = REF_RE.replace_all(text, "");
    let t = t.trim();
    t.len() == 4 && year_in(t).is_some()
}

/// Hugo Award for Best Novel: `author* | title | publisher`, winners marked
/// with `*` or a yellow row background.
pub fn parse_hugo(body: &str) -> Vec<HarvestRecord> {
    let doc = Html::parse_document(body);
    let mut out = Vec::new();
    for table in doc.select(&TABLE_SEL) {
        let mut year = None;
        for row in table.select(&ROW_SEL) {
            if let Some(y) = row_year(row) {
                year = Some(y);
            }
            let mut cells: Vec<ElementRef<'_>> = row.select(&TD_SEL).collect();
            if cells.first().is_some_and(|c| is_year_cell(&text_of(*c))) {
                year = year_in(&text_of(cells.remove(0)));
            }
            if cells.len() < 2 {
                continue;
            }
            let full = text_of(cells[0]);
            let Some(author) = cells[0]
                .text()
                .map(|t| t.replace('*', "").trim().to_string())
                .find(|t| !t.is_empty())
            else {
                continue;
            };
            let title = AKA_RE.replace_all(&text_of(cells[1]), "").trim().to_string();
            let title = REF_RE.replace_all(&title, "").to_string();
            if author.chars().count() < 2 || title.chars().count() < 2 {
                continue;
            }
            let style = row.value().attr("style").unwrap_or_default().to_lowercase();
            let won = full.contains('*') || (style.contains("background") && style.contains("yellow"));
            let mut record = HarvestRecord::new(author).with_title(title);
            record.year = year;
            record.standing = Some(if won { Standing::Winner } else { Standing::Nominee });
            out.push(record);
        }
    }
    out
}

/// Booker Prize list: `status | author | title`, status one of
/// Winner, Shortlist or Longlist.
pub fn parse_booker(body: &str) -> Vec<HarvestRecord> {
    let doc = Html::parse_document(body);
    let mut out = Vec::new();
    for table in doc.select(&TABLE_SEL) {
        let mut year = None;
        for row in table.select(&ROW_SEL) {
            if let Some(y) = row_year(row) {
                year = Some(y);
            }
            let mut cells: Vec<ElementRef<'_>> = row.select(&TD_SEL).collect();
            if cells.first().is_some_and(|c| is_year_cell(&text_of(*c))) {
                year = year_in(&text_of(cells.remove(0)));
            }
            if cells.len() < 3 {
                continue;
            }
            let status = text_of(cells[0]);
            if let Some(y) = year_in(&status) {
                year = Some(y);
            }
            let standing = if status.contains("Winner") {
                Standing::Winner
            } else if status.contains("Shortlist") {
                Standing::Shortlist
            } else if status.contains("Longlist") {
                Standing::Longlist
            } else {
                continue;
            };
            let author = REF_RE.replace_all(&text_of(cells[1]), "").trim().to_string();
            let title = REF_RE.replace_all(&text_of(cells[2]), "").to_string();
            let title = PAREN_RE.replace_all(&title, "").trim().to_string();
            if author.chars().count() < 2 || title.chars().count() < 2 {
                continue;
            }
            let mut record = HarvestRecord::new(author).with_title(title);
            record.year = year;
            record.standing = Some(standing);
            out.push(record);
        }
    }
    out
}

/// Nobel laureates in Literature: first table only,
/// `year | picture | laureate | country | language | citation | genre`.
pub fn parse_nobel(body: &str) -> Vec<HarvestRecord> {
    let doc = Html::parse_document(body);
    let Some(table) = doc.select(&TABLE_SEL).next() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for row in table.select(&ROW_SEL) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL_SEL).collect();
        if cells.len() < 6 {
            continue;
        }
        let year_text = text_of(cells[0]);
        if year_text.is_empty() || year_text.contains("Not awarded") {
            continue;
        }
        let Some(year) = year_in(&year_text) else {
            continue;
        };
        let laureate = cells[2]
            .select(&LINK_SEL)
            .next()
            .map(text_of)
            .unwrap_or_else(|| text_of(cells[2]));
        let laureate = collapse_ws(&LIFESPAN_RE.replace_all(&laureate, ""));
        if laureate.is_empty() || cells[2].text().any(|t| t.contains("Not awarded")) {
            continue;
        }
        let citation = text_of(cells[5]);
        let citation = REF_RE.replace_all(&citation, "");
        let citation = citation.trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”')).trim().to_string();
        let genre = cells.get(6).map(|c| text_of(*c)).unwrap_or_default();

        let mut record = HarvestRecord::new(laureate)
            .with_extra("country", text_of(cells[3]))
            .with_extra("language", text_of(cells[4]))
            .with_extra("citation", citation)
            .with_extra("genre", genre);
        record.year = Some(year);
        record.standing = Some(Standing::Laureate);
        out.push(record);
    }
    out
}
