use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::HarvestRecord;
use crate::parser::clean::collapse_ws;

const BRAND_URL: &str = "https://www.bbc.com/audio/brand/p003jhsk";
const SITE: &str = "https://www.bbc.com";

static CARD_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid="york-card"]"#).unwrap());
static PLAY_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/audio/play/"]"#).unwrap());
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[class*="sc-4d4e1117-7"], h2, h3"#).unwrap());
static META_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[class*="sc-4d4e1117-11"]"#).unwrap());
static ANY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div, span, p").unwrap());

/// Words that may start lowercase inside a personal name.
const NAME_PARTICLES: &[&str] = &["de", "da", "del", "van", "von", "der", "wa", "le", "la", "bin", "al", "y", "du"];

pub fn page_url(page: u32) -> String {
    if page == 0 {
        BRAND_URL.to_string()
    } else {
        format!("{}?page={}", BRAND_URL, page)
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<String>())
}

/// Episode cards of one brand page. Cards without a play link are skipped.
pub fn parse_episodes(body: &str, page: u32) -> Vec<HarvestRecord> {
    let doc = Html::parse_document(body);
    let mut out = Vec::new();
    for card in doc.select(&CARD_SEL) {
        let Some(link) = card.select(&PLAY_LINK_SEL).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href").filter(|h| !h.is_empty()) else {
            continue;
        };
        let id = href.rsplit("/audio/play/").next().unwrap_or_default().to_string();
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", SITE, href)
        };
        let title = card
            .select(&TITLE_SEL)
            .map(text_of)
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let (date, duration) = date_and_duration(card).unwrap_or_else(|| ("Unknown".into(), "Unknown".into()));

        let author = derive_author(&title).unwrap_or_default();
        out.push(
            HarvestRecord::new(author)
                .with_title(title)
                .with_extra("id", id)
                .with_extra("url", url)
                .with_extra("date", date)
                .with_extra("duration", duration)
                .with_extra("page", page),
        );
    }
    out
}

fn date_and_duration(card: ElementRef<'_>) -> Option<(String, String)> {
    let text = card
        .select(&META_SEL)
        .map(text_of)
        .find(|t| t.contains('•'))
        .or_else(|| {
            // innermost element carrying the bullet
            card.select(&ANY_SEL)
                .map(text_of)
                .filter(|t| t.contains('•'))
                .min_by_key(|t| t.len())
        })?;
    let mut parts = text.split('•').map(str::trim);
    let date = parts.next()?.to_string();
    let duration = parts.next()?.to_string();
    Some((date, duration))
}

/// "Author - Book" (also `–` or `:`) when the left side reads like a
/// personal name.
pub fn derive_author(title: &str) -> Option<String> {
    let left = [" - ", " – ", " — ", ": "]
        .iter()
        .filter_map(|sep| title.split_once(sep).map(|(l, _)| l.trim()))
        .min_by_key(|l| l.len())?;
    looks_like_name(left).then(|| left.to_string())
}

fn looks_like_name(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if !(2..=5).contains(&words.len()) || text.chars().count() > 40 {
        return false;
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    words.iter().enumerate().all(|(i, w)| {
        let first = w.chars().next().unwrap_or(' ');
        first.is_uppercase() || (i > 0 && NAME_PARTICLES.contains(&w.to_lowercase().as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
      <div data-testid="york-card">
        <a href="/audio/play/w3ct1abc"><span class="sc-4d4e1117-7 xyz">Chimamanda Ngozi Adichie - Half of a Yellow Sun</span></a>
        <div class="sc-4d4e1117-11 abc">3 Mar 2024 • 50 mins</div>
      </div>
      <div data-testid="york-card">
        <a href="https://www.bbc.com/audio/play/w3ct2def"><h3>World Book Club at 25: a celebration</h3></a>
      </div>
      <div data-testid="york-card"><span>No link here</span></div>
    </body></html>"#;

    #[test]
    fn parses_cards() {
        let eps = parse_episodes(PAGE, 2);
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].author, "Chimamanda Ngozi Adichie");
        assert_eq!(eps[0].extra["id"], "w3ct1abc");
        assert_eq!(eps[0].extra["url"], "https://www.bbc.com/audio/play/w3ct1abc");
        assert_eq!(eps[0].extra["date"], "3 Mar 2024");
        assert_eq!(eps[0].extra["duration"], "50 mins");
        assert_eq!(eps[0].extra["page"], 2);

        assert_eq!(eps[1].author, "");
        assert_eq!(eps[1].extra["date"], "Unknown");
        assert_eq!(eps[1].extra["url"], "https://www.bbc.com/audio/play/w3ct2def");
    }

    #[test]
    fn page_urls() {
        assert_eq!(page_url(0), "https://www.bbc.com/audio/brand/p003jhsk");
        assert_eq!(page_url(3), "https://www.bbc.com/audio/brand/p003jhsk?page=3");
    }

    #[test]
    fn author_from_title() {
        assert_eq!(derive_author("Margaret Atwood: The Handmaid's Tale").as_deref(), Some("Margaret Atwood"));
        assert_eq!(derive_author("Gabriel García Márquez – One Hundred Years of Solitude").as_deref(), Some("Gabriel García Márquez"));
        assert_eq!(derive_author("Ngũgĩ wa Thiong'o - Weep Not, Child").as_deref(), Some("Ngũgĩ wa Thiong'o"));
        assert_eq!(derive_author("World Book Club at 25: a celebration"), None);
        assert_eq!(derive_author("Favourite books of 2023"), None);
        assert_eq!(derive_author("Orhan Pamuk"), None);
    }
}
