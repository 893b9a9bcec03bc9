use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::fetch::Fetch;
use crate::model::Availability;
use crate::parser::clean::{clean_html, CategoryCodeFilter, DescriptionFilter};
use crate::parser::{self, ExtractedPage, Strategy, TagPattern, TITLE_COLLECTION};

const DESCRIPTION_BLOCK: TagPattern = TagPattern::class("article", "TitleDetailsDescription-description");

/// Reads copy counts and a description from item detail pages.
pub struct AvailabilityProber<'a, F: Fetch> {
    fetcher: &'a F,
    settings: &'a Settings,
    filter: Box<dyn DescriptionFilter + 'a>,
}

/// A probed detail page, kept for callers that want more than the counts.
pub struct ProbedPage {
    pub availability: Availability,
    pub title: Option<String>,
}

/// Availability plus the transport error that degraded it, if any.
pub struct ProbeOutcome {
    pub availability: Availability,
    pub failure: Option<FetchError>,
}

impl ProbeOutcome {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

impl<'a, F: Fetch> AvailabilityProber<'a, F> {
    /// Prober whose description filter rejects the configured category prefixes.
    pub fn new(fetcher: &'a F, settings: &'a Settings) -> Self {
        let filter = CategoryCodeFilter::new(settings.category_prefixes.clone());
        Self::with_filter(fetcher, settings, filter)
    }

    pub fn with_filter(fetcher: &'a F, settings: &'a Settings, filter: impl DescriptionFilter + 'a) -> Self {
        AvailabilityProber {
            fetcher,
            settings,
            filter: Box::new(filter),
        }
    }

    pub fn item_url(&self, external_id: &str) -> String {
        self.settings.media_url(external_id)
    }

    /// Never fails: a transport error yields [`Availability::absent`].
    pub fn probe(&self, external_id: &str) -> Availability {
        self.probe_detailed(external_id).availability
    }

    /// Like [`probe`](Self::probe) but keeps the error that degraded the result.
    pub fn probe_detailed(&self, external_id: &str) -> ProbeOutcome {
        match self.try_probe(external_id) {
            Ok(page) => ProbeOutcome {
                availability: page.availability,
                failure: None,
            },
            Err(e) => {
                warn!(id = external_id, "availability check failed: {}", e);
                ProbeOutcome {
                    availability: Availability::absent(),
                    failure: Some(e),
                }
            }
        }
    }

    /// Like [`probe`](Self::probe) but surfaces the transport error and the
    /// page title.
    pub fn try_probe(&self, external_id: &str) -> Result<ProbedPage, FetchError> {
        let page = self.fetcher.get(&self.item_url(external_id))?;
        debug!(id = external_id, status = page.status, bytes = page.body.len(), "detail page");
        let extracted = parser::extract(&page.body);
        let availability = self.read_availability(&extracted);
        if availability.available_copies > availability.owned_copies {
            warn!(
                id = external_id,
                available = availability.available_copies,
                owned = availability.owned_copies,
                "catalog reports more available copies than owned"
            );
        }
        Ok(ProbedPage {
            availability,
            title: extracted.find_string("title"),
        })
    }

    fn read_availability(&self, page: &ExtractedPage<'_>) -> Availability {
        let description = self.read_description(page);
        let copies = |field: &str| page.find_integer(field).map(|n| n.clamp(0, u32::MAX as i64) as u32);
        match (copies("availableCopies"), copies("ownedCopies")) {
            (Some(available), Some(owned)) => Availability {
                is_available: available > 0,
                available_copies: available,
                owned_copies: owned,
                description,
            },
            _ => Availability {
                is_available: page.find_boolean("isAvailable").unwrap_or(false),
                available_copies: 0,
                owned_copies: 0,
                description,
            },
        }
    }

    fn read_description(&self, page: &ExtractedPage<'_>) -> Option<String> {
        let scoped = page
            .find_string_after(TITLE_COLLECTION, "publisher", "description")
            .map(|raw| clean_html(&raw))
            .filter(|d| self.filter.accept(d));
        scoped.or_else(|| {
            page.find_text(&[Strategy::Block(&DESCRIPTION_BLOCK)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockFetcher;

    fn settings() -> Settings {
        Settings {
            base_url: "https://lib.example.com".into(),
            ..Settings::default()
        }
    }

    fn prober_for<'a>(mock: &'a MockFetcher, s: &'a Settings) -> AvailabilityProber<'a, MockFetcher> {
        AvailabilityProber::new(mock, s)
    }

    #[test]
    fn reads_copy_counts() {
        let s = settings();
        let mock = MockFetcher::new().with_page(
            "https://lib.example.com/media/1",
            r#"<script>var x = {"availableCopies":3,"ownedCopies":5};</script>"#,
        );
        let a = prober_for(&mock, &s).probe("1");
        assert_eq!((a.is_available, a.available_copies, a.owned_copies), (true, 3, 5));
    }

    #[test]
    fn zero_available_is_unavailable() {
        let s = settings();
        let mock = MockFetcher::new().with_page(
            "https://lib.example.com/media/2",
            r#"{"availableCopies":0,"ownedCopies":2}"#,
        );
        let a = prober_for(&mock, &s).probe("2");
        assert_eq!((a.is_available, a.available_copies, a.owned_copies), (false, 0, 2));
    }

    #[test]
    fn falls_back_to_flag_without_counts() {
        let s = settings();
        let mock = MockFetcher::new().with_page(
            "https://lib.example.com/media/3",
            r#"{"isAvailable":true,"ownedCopies":4}"#,
        );
        let a = prober_for(&mock, &s).probe("3");
        assert_eq!((a.is_available, a.available_copies, a.owned_copies), (true, 0, 0));
    }

    #[test]
    fn transport_failure_is_absent() {
        let s = settings();
        let mock = MockFetcher::new().with_failure("https://lib.example.com/media/4");
        let prober = prober_for(&mock, &s);
        assert_eq!(prober.probe("4"), Availability::absent());
        let outcome = prober.probe_detailed("4");
        assert!(outcome.is_degraded());
        assert!(matches!(outcome.failure, Some(FetchError::Status { status: 503, .. })));
    }

    #[test]
    fn description_skips_category_code_and_uses_article() {
        let s = settings();
        let body = r#"<script>window.OverDrive.titleCollection = {"id":"5",
            "publisher":{"id":"9","name":"Pan"},"description":"FICTION / Science Fiction / General"};</script>
            <article class="TitleDetailsDescription-description"><p>A ship &amp; its crew.</p></article>
            "availableCopies":1,"ownedCopies":1"#;
        let mock = MockFetcher::new().with_page("https://lib.example.com/media/5", body);
        let a = prober_for(&mock, &s).probe("5");
        assert_eq!(a.description.as_deref(), Some("A ship & its crew."));
    }

    #[test]
    fn description_after_publisher_is_unescaped() {
        let s = settings();
        let body = r#"<script>window.OverDrive.titleCollection = {"description":"FICTION / Literary",
            "publisher":{"id":"9","name":"Pan"},"description":"<p>She said \"hello\"—and left.</p>"};</script>
            "availableCopies":2,"ownedCopies":2"#;
        let mock = MockFetcher::new().with_page("https://lib.example.com/media/6", body);
        let a = prober_for(&mock, &s).probe("6");
        assert_eq!(a.description.as_deref(), Some("She said \"hello\"\u{2014}and left."));
    }

    #[test]
    fn custom_filter_is_honoured() {
        let s = settings();
        let body = r#"window.OverDrive.titleCollection = {"publisher":{"id":"9"},"description":"Short"};"#;
        let mock = MockFetcher::new().with_page("https://lib.example.com/media/7", body);
        let prober = AvailabilityProber::with_filter(&mock, &s, |d: &str| d.len() > 10);
        assert_eq!(prober.probe("7").description, None);
        let prober = prober_for(&mock, &s);
        assert_eq!(prober.probe("7").description.as_deref(), Some("Short"));
    }

    #[test]
    fn title_is_read_for_check() {
        let s = settings();
        let mock = MockFetcher::new().with_page(
            "https://lib.example.com/media/8",
            r#"{"title":"The Left Hand of Darkness","availableCopies":1,"ownedCopies":2}"#,
        );
        let page = prober_for(&mock, &s).try_probe("8").unwrap();
        assert_eq!(page.title.as_deref(), Some("The Left Hand of Darkness"));
        assert!(page.availability.is_available);
    }
}
