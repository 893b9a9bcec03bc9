//! Stage runners and the per-source orchestrator.
//!
//! Stages only communicate through artifacts in the [`ArtifactStore`]; a
//! stage reads its input file, does its work and writes its output file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{ArtifactError, FetchError, StageError};
use crate::fetch::{CancelToken, Fetch, Pacer};
use crate::harvest::{self, AuthorInput, Source};
use crate::metrics::{self, Counts, Progress, RunReport, StageStatus};
use crate::model::{AuthorQuery, Availability, AvailabilityRecord, ByAuthor, CatalogRecord, SearchResult};
use crate::probe::{AvailabilityProber, ProbedPage};
use crate::refine;
use crate::search::SearchResolver;
use crate::store::ArtifactStore;

/// Hand-curated author list that replaces the names derived from episode titles.
pub const BBC_CURATED_AUTHORS: &str = "bbc_world_book_club_authors.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Harvest,
    Search,
    Refine,
    Probe,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Harvest, Stage::Search, Stage::Refine, Stage::Probe];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Harvest => "harvest",
            Stage::Search => "search",
            Stage::Refine => "refine",
            Stage::Probe => "probe",
        }
    }

    /// Artifact the stage reads; harvest reads from the network only.
    pub fn input(self, source: Source) -> Option<String> {
        match self {
            Stage::Harvest => None,
            Stage::Search => Some(source.authors_artifact()),
            Stage::Refine => Some(search_artifact(source)),
            Stage::Probe => Some(refined_artifact(source)),
        }
    }

    pub fn output(self, source: Source) -> String {
        match self {
            Stage::Harvest => source.records_artifact().to_string(),
            Stage::Search => search_artifact(source),
            Stage::Refine => refined_artifact(source),
            Stage::Probe => available_artifact(source),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "harvest" | "scrape" => Ok(Stage::Harvest),
            "search" => Ok(Stage::Search),
            "refine" => Ok(Stage::Refine),
            "probe" | "availability" => Ok(Stage::Probe),
            other => Err(format!(
                "unknown stage '{}' (expected harvest, search, refine or probe)",
                other
            )),
        }
    }
}

pub fn search_artifact(source: Source) -> String {
    format!("{}_audiobook_search_results.json", source.name())
}

pub fn refined_artifact(source: Source) -> String {
    format!("{}_audiobook_search_results_refined.json", source.name())
}

pub fn available_artifact(source: Source) -> String {
    format!("{}_available_audiobooks.json", source.name())
}

/// `foo.json` -> `foo{suffix}.csv`
fn table_path(json: &Path, suffix: &str) -> PathBuf {
    let stem = json
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    json.with_file_name(format!("{}{}.csv", stem, suffix))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    /// Overrides the stage's configured delay.
    pub delay: Option<f64>,
    pub limit: Option<usize>,
}

/// What a finished stage reports back to the orchestrator.
#[derive(Debug)]
pub struct StageRun {
    pub status: StageStatus,
    pub counts: Counts,
    pub artifact: Option<PathBuf>,
    pub message: Option<String>,
}

impl StageRun {
    fn from_counts(counts: Counts, artifact: PathBuf) -> Self {
        // all items failed: the artifact exists but holds only degraded entries
        let status = if counts.processed > 0 && counts.succeeded == 0 {
            StageStatus::Degraded
        } else {
            StageStatus::Completed
        };
        StageRun {
            status,
            counts,
            artifact: Some(artifact),
            message: None,
        }
    }
}

pub struct Pipeline<'a, F: Fetch> {
    fetcher: &'a F,
    settings: &'a Settings,
    store: ArtifactStore,
    cancel: CancelToken,
    show_progress: bool,
}

impl<'a, F: Fetch> Pipeline<'a, F> {
    pub fn new(fetcher: &'a F, settings: &'a Settings, cancel: CancelToken) -> Self {
        Pipeline {
            fetcher,
            settings,
            store: ArtifactStore::new(&settings.data_dir),
            cancel,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress(&self, len: usize, label: &str) -> Progress {
        if self.show_progress {
            Progress::new(len, label)
        } else {
            Progress::hidden()
        }
    }

    fn pacer(&self, delay: Option<f64>, default: f64) -> Pacer {
        Pacer::new(delay.unwrap_or(default), self.cancel.clone())
    }

    fn check_cancelled(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Interrupted)
        } else {
            Ok(())
        }
    }

    // ── Harvest ──

    pub fn run_harvest(
        &self,
        source: Source,
        output: &Path,
        opts: StageOptions,
        pages: Option<u32>,
    ) -> Result<StageRun, StageError> {
        let bbc_pages = pages.unwrap_or(self.settings.bbc_pages);
        let urls = source.page_urls(bbc_pages).len();
        let mut pacer = self.pacer(opts.delay, self.settings.harvest_delay);
        let progress = self.progress(urls, source.name());
        let result = harvest::harvest(source, self.fetcher, &mut pacer, bbc_pages, opts.limit, &progress);
        progress.finish();
        let harvested = result?;
        self.check_cancelled()?;

        let counts = Counts {
            processed: harvested.pages,
            succeeded: harvested.pages - harvested.failed_pages,
            degraded: harvested.failed_pages,
        };
        if harvested.records.is_empty() {
            let why = if harvested.is_empty_failure() { "every page failed" } else { "no entries parsed" };
            let kept = if self.store.exists(output) { "kept existing artifact" } else { "no artifact written" };
            return Ok(StageRun {
                status: StageStatus::Degraded,
                counts,
                artifact: None,
                message: Some(format!("{} harvest: {}; {}", source, why, kept)),
            });
        }

        let path = self.store.save(output, &harvested.records)?;
        self.store
            .save_table(table_path(output, ""), &harvest::records_table(&harvested.records))?;

        let curated = if source == Source::Bbc && self.store.exists(BBC_CURATED_AUTHORS) {
            let input: AuthorInput = self.store.load(BBC_CURATED_AUTHORS)?;
            Some(input.authors())
        } else {
            None
        };
        let authors = harvest::authors_for(&harvested.records, curated);
        self.store.save(source.authors_artifact(), &authors)?;
        info!(
            source = %source,
            entries = harvested.records.len(),
            authors = authors.len(),
            "saved {}",
            path.display()
        );

        Ok(StageRun {
            status: if harvested.failed_pages > 0 {
                StageStatus::Degraded
            } else {
                StageStatus::Completed
            },
            counts,
            artifact: Some(path),
            message: (harvested.failed_pages > 0)
                .then(|| format!("{} of {} pages failed", harvested.failed_pages, harvested.pages)),
        })
    }

    // ── Search ──

    pub fn run_search(&self, input: &Path, output: &Path, opts: StageOptions) -> Result<StageRun, StageError> {
        let authors: AuthorInput = self.store.load(input)?;
        let mut authors = authors.authors();
        if let Some(n) = opts.limit {
            authors.truncate(n);
        }
        info!("Searching the catalog for {} authors", authors.len());

        let resolver = SearchResolver::new(self.fetcher, self.settings);
        let mut pacer = self.pacer(opts.delay, self.settings.search_delay);
        let progress = self.progress(authors.len(), "search");
        let mut results = ByAuthor::new();
        let mut counts = Counts::default();
        let total = authors.len();

        for (i, name) in authors.iter().enumerate() {
            if let Err(e) = pacer.wait() {
                progress.finish();
                return Err(e);
            }
            let author = AuthorQuery::new(name);
            let resolution = resolver.resolve_detailed(&author);
            let found = resolution.result.records.len();
            if resolution.outcome.is_degraded() {
                counts.degraded();
                progress.warn(format!("[{}/{}] {}: {}", i + 1, total, author, resolution.outcome));
            } else {
                counts.ok();
                progress.line(format!(
                    "[{}/{}] {}: {} audiobooks ({} reported)",
                    i + 1,
                    total,
                    author,
                    found,
                    resolution.result.reported_count
                ));
            }
            results.insert(resolution.result);
            progress.inc();
        }
        progress.finish();
        self.check_cancelled()?;

        let path = self.store.save(output, &results)?;
        let with_books = results.iter().filter(|r| !r.records.is_empty()).count();
        let books: usize = results.iter().map(|r| r.records.len()).sum();
        info!(
            authors = results.len(),
            with_books,
            books,
            degraded = counts.degraded,
            "search summary"
        );
        Ok(StageRun::from_counts(counts, path))
    }

    // ── Refine ──

    pub fn run_refine(&self, input: &Path, output: &Path, limit: Option<usize>) -> Result<StageRun, StageError> {
        let results: ByAuthor<SearchResult> = self.store.load(input)?;
        if results.is_empty() {
            warn!("{} holds no authors", input.display());
        }
        let take = limit.unwrap_or(usize::MAX);
        let (refined, report) = refine::refine_all(results.iter().take(take));
        report.log();

        let path = self.store.save(output, &refined)?;
        self.store
            .save_table(table_path(output, ""), &refine::summary_table(&refined))?;
        self.store
            .save_table(table_path(output, "_changes"), &refine::changes_table(&refined))?;

        let counts = Counts {
            processed: report.authors,
            succeeded: report.authors,
            degraded: 0,
        };
        Ok(StageRun::from_counts(counts, path))
    }

    // ── Probe ──

    pub fn run_probe(&self, input: &Path, output: &Path, opts: StageOptions) -> Result<StageRun, StageError> {
        // Refined artifacts read as plain search results.
        let results: ByAuthor<SearchResult> = self.store.load(input)?;
        let mut books: Vec<(&AuthorQuery, &CatalogRecord)> = results
            .iter()
            .filter(|r| !r.queried_author.is_empty() && !r.records.is_empty())
            .flat_map(|r| r.records.iter().map(move |b| (&r.queried_author, b)))
            .collect();
        let all = books.len();
        if let Some(n) = opts.limit {
            books.truncate(n);
            info!("Checking availability for up to {} books (of {})", books.len(), all);
        } else {
            info!("Checking availability for {} books", all);
        }

        let prober = AvailabilityProber::new(self.fetcher, self.settings);
        let mut pacer = self.pacer(opts.delay, self.settings.probe_delay);
        let progress = self.progress(books.len(), "probe");
        let mut available = Vec::new();
        let mut counts = Counts::default();
        let total = books.len();

        for (i, (author, book)) in books.iter().enumerate() {
            if let Err(e) = pacer.wait() {
                progress.finish();
                return Err(e);
            }
            let outcome = prober.probe_detailed(&book.external_id);
            if outcome.is_degraded() {
                counts.degraded();
                let reason = outcome.failure.map(|e| e.to_string()).unwrap_or_default();
                progress.warn(format!("[{}/{}] {} by {}: failed ({})", i + 1, total, book.title, author, reason));
                progress.inc();
                continue;
            }
            counts.ok();
            let availability = outcome.availability;
            let status = if availability.available_copies > 0 {
                format!("AVAILABLE ({}/{})", availability.available_copies, availability.owned_copies)
            } else {
                format!("not available ({}/{})", availability.available_copies, availability.owned_copies)
            };
            progress.line(format!("[{}/{}] {} by {}: {}", i + 1, total, book.title, author, status));
            let url = prober.item_url(&book.external_id);
            if let Some(record) = AvailabilityRecord::from_probe(book, author, url, availability) {
                available.push(record);
            }
            progress.inc();
        }
        progress.finish();
        self.check_cancelled()?;

        let path = self.store.save(output, &available)?;
        info!(
            checked = counts.processed,
            available = available.len(),
            failed = counts.degraded,
            "availability summary"
        );
        for record in &available {
            info!(
                "{} by {} ({}/{} copies) {}",
                record.title, record.author, record.available_copies, record.owned_copies, record.url
            );
            if let Some(desc) = &record.description {
                info!("    {}", metrics::truncate(desc, 200));
            }
        }
        Ok(StageRun::from_counts(counts, path))
    }

    // ── Orchestration ──

    /// Run `stages` (in pipeline order) for one source. A stage whose input
    /// artifact is missing is skipped; malformed input stops this source.
    pub fn run_source(&self, source: Source, stages: &[Stage], opts: StageOptions) -> RunReport {
        let mut report = RunReport::new(metrics::new_run_id(), source.name());
        let mut selected: Vec<Stage> = stages.to_vec();
        selected.sort();
        selected.dedup();

        for stage in selected {
            let started = report.begin();
            let output = stage.output(source);
            if let Some(input) = stage.input(source) {
                if !self.store.exists(&input) {
                    report.record(
                        stage.name(),
                        StageStatus::Skipped,
                        Counts::default(),
                        None,
                        Some(format!("input {} not found, skipping", input)),
                        started,
                    );
                    continue;
                }
            }
            let result = match stage {
                Stage::Harvest => self.run_harvest(source, Path::new(&output), opts, None),
                Stage::Search => self.run_search(
                    Path::new(&source.authors_artifact()),
                    Path::new(&output),
                    opts,
                ),
                Stage::Refine => self.run_refine(Path::new(&search_artifact(source)), Path::new(&output), None),
                Stage::Probe => self.run_probe(Path::new(&refined_artifact(source)), Path::new(&output), opts),
            };
            match result {
                Ok(run) => report.record(
                    stage.name(),
                    run.status,
                    run.counts,
                    run.artifact.map(|p| p.display().to_string()),
                    run.message,
                    started,
                ),
                Err(e) if e.is_missing_input() => report.record(
                    stage.name(),
                    StageStatus::Skipped,
                    Counts::default(),
                    None,
                    Some(e.to_string()),
                    started,
                ),
                Err(StageError::Interrupted) => {
                    report.record(
                        stage.name(),
                        StageStatus::Interrupted,
                        Counts::default(),
                        None,
                        Some("interrupted; no artifact written".into()),
                        started,
                    );
                    break;
                }
                Err(e) => {
                    report.record(stage.name(), StageStatus::Failed, Counts::default(), None, Some(e.to_string()), started);
                    break;
                }
            }
        }

        report.finish();
        if let Err(e) = self.store.save(report.file_name(), &report) {
            warn!("could not save run report: {}", e);
        }
        report
    }

    // ── Ad-hoc lookups ──

    /// One catalog search outside the pipeline; never fails.
    pub fn search_one(&self, name: &str) -> SearchResult {
        SearchResolver::new(self.fetcher, self.settings).resolve(&AuthorQuery::new(name))
    }

    /// Probe a single catalog item, surfacing transport errors.
    pub fn check_item(&self, external_id: &str) -> Result<(String, ProbedPage), FetchError> {
        let prober = AvailabilityProber::new(self.fetcher, self.settings);
        let page = prober.try_probe(external_id)?;
        Ok((prober.item_url(external_id), page))
    }

    /// Find `name` (case-insensitive) in the given refined artifacts.
    /// Artifacts that do not exist are ignored.
    pub fn find_author(&self, name: &str, inputs: &[PathBuf]) -> Result<AuthorLookup, ArtifactError> {
        let query = AuthorQuery::new(name);
        let wanted = query.as_str().to_lowercase();
        let mut known = Vec::new();
        let mut any_loaded = false;
        for input in inputs {
            let results: ByAuthor<SearchResult> = match self.store.load(input) {
                Ok(r) => r,
                Err(ArtifactError::Missing(_)) => continue,
                Err(e) => return Err(e),
            };
            any_loaded = true;
            if let Some(exact) = results.get(query.as_str()) {
                return Ok(AuthorLookup::Found(exact.clone()));
            }
            for result in results.into_vec() {
                if result.queried_author.as_str().to_lowercase() == wanted {
                    return Ok(AuthorLookup::Found(result));
                }
                if !result.records.is_empty() {
                    known.push((result.queried_author.to_string(), result.records.len()));
                }
            }
        }
        if !any_loaded {
            let first = inputs.first().cloned().unwrap_or_default();
            return Err(ArtifactError::Missing(self.store.path(first)));
        }
        Ok(AuthorLookup::NotFound { known })
    }

    /// Probe every book of one author with pacing. A failed check reads as
    /// no copies.
    pub fn probe_books(
        &self,
        books: &[CatalogRecord],
        delay: Option<f64>,
    ) -> Result<Vec<(CatalogRecord, Availability)>, StageError> {
        let prober = AvailabilityProber::new(self.fetcher, self.settings);
        let mut pacer = self.pacer(delay, self.settings.probe_delay);
        let mut out = Vec::with_capacity(books.len());
        for book in books {
            pacer.wait()?;
            out.push((book.clone(), prober.probe(&book.external_id)));
        }
        Ok(out)
    }
}

pub enum AuthorLookup {
    Found(SearchResult),
    NotFound { known: Vec<(String, usize)> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockFetcher;
    use crate::model::RefinedResult;

    fn settings(dir: &Path) -> Settings {
        Settings {
            base_url: "https://lib.example.com".into(),
            data_dir: dir.to_path_buf(),
            search_delay: 0.0,
            probe_delay: 0.0,
            harvest_delay: 0.0,
            ..Settings::default()
        }
    }

    fn search_body(items: &str) -> String {
        format!(r#"<h1 class="search-text">Showing 1-1 of 1 results</h1><script>window.OverDrive.titleCollection = {};</script>"#, items)
    }

    fn search_url(s: &Settings, author: &str) -> String {
        let mock = MockFetcher::new();
        SearchResolver::new(&mock, s).query_url(&AuthorQuery::new(author))
    }

    #[test]
    fn stage_names_and_aliases() {
        assert_eq!("scrape".parse::<Stage>().unwrap(), Stage::Harvest);
        assert_eq!("Availability".parse::<Stage>().unwrap(), Stage::Probe);
        assert!("publish".parse::<Stage>().is_err());
        assert_eq!(Stage::Probe.output(Source::Hugo), "hugo_available_audiobooks.json");
        assert_eq!(Stage::Search.input(Source::Bbc).as_deref(), Some("bbc_authors.json"));
        assert_eq!(
            table_path(Path::new("/d/hugo_audiobook_search_results_refined.json"), "_changes"),
            PathBuf::from("/d/hugo_audiobook_search_results_refined_changes.csv")
        );
    }

    #[test]
    fn end_to_end_jane_doe() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        store
            .save(Source::Hugo.authors_artifact(), &vec!["Jane Doe".to_string()])
            .unwrap();

        let mock = MockFetcher::new()
            .with_page(
                &search_url(&s, "Jane Doe"),
                &search_body(r#"[{"id":"77","title":"X","firstCreatorName":"J. Doe","isAvailable":true,"formats":[{"name":"OverDrive Listen audiobook"}]}]"#),
            )
            .with_page(
                "https://lib.example.com/media/77",
                r#"<script>window.OverDrive.titleCollection = {"id":"77","publisher":{"id":"1","name":"P"},"description":"A quiet novel."};</script>"availableCopies":1,"ownedCopies":1"#,
            );
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let report = pipeline.run_source(Source::Hugo, &[Stage::Search, Stage::Refine, Stage::Probe], StageOptions::default());

        let statuses: Vec<StageStatus> = report.stages.iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![StageStatus::Completed; 3]);

        let refined: ByAuthor<RefinedResult> = store.load(refined_artifact(Source::Hugo)).unwrap();
        let jane = refined.get("Jane Doe").unwrap();
        assert_eq!(jane.records().len(), 1);
        assert_eq!(jane.removed_count(), 0);

        let available: Vec<AvailabilityRecord> = store.load(available_artifact(Source::Hugo)).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].available_copies, 1);
        assert_eq!(available[0].author, "Jane Doe");
        assert_eq!(available[0].url, "https://lib.example.com/media/77");
        assert_eq!(available[0].description.as_deref(), Some("A quiet novel."));

        assert!(dir.path().join("hugo_audiobook_search_results_refined.csv").is_file());
        assert!(dir.path().join("hugo_run_report.json").is_file());
    }

    #[test]
    fn missing_input_skips_stage() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let mock = MockFetcher::new();
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let report = pipeline.run_source(Source::Booker, &[Stage::Search, Stage::Refine], StageOptions::default());
        assert!(report.stages.iter().all(|m| m.status == StageStatus::Skipped));
        assert!(!report.has_failures());
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn malformed_input_stops_source() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::write(dir.path().join(search_artifact(Source::Nobel)), "[oops").unwrap();
        let mock = MockFetcher::new();
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let report = pipeline.run_source(Source::Nobel, &[Stage::Refine, Stage::Probe], StageOptions::default());
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].status, StageStatus::Failed);
        assert!(!dir.path().join(refined_artifact(Source::Nobel)).exists());
        assert!(report.has_failures());
    }

    #[test]
    fn search_failure_degrades_single_author() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        store
            .save("authors.json", &vec!["Ann Leckie", "Mo Yan"])
            .unwrap();
        let mock = MockFetcher::new()
            .with_failure(&search_url(&s, "Ann Leckie"))
            .with_page(
                &search_url(&s, "Mo Yan"),
                &search_body(r#"[{"id":"1","title":"Red Sorghum","firstCreatorName":"Mo Yan"}]"#),
            );
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let run = pipeline
            .run_search(Path::new("authors.json"), Path::new("out.json"), StageOptions::default())
            .unwrap();
        assert_eq!(run.counts, Counts { processed: 2, succeeded: 1, degraded: 1 });
        assert_eq!(run.status, StageStatus::Completed);

        let results: ByAuthor<SearchResult> = store.load("out.json").unwrap();
        let ann = results.get("Ann Leckie").unwrap();
        assert_eq!(ann.reported_count, 0);
        assert!(ann.source_url.contains("query=Ann%20Leckie"));
        assert_eq!(results.get("Mo Yan").unwrap().records.len(), 1);
    }

    #[test]
    fn limit_caps_probed_books() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        let books: Vec<CatalogRecord> = (1..=3)
            .map(|i| CatalogRecord {
                title: format!("Book {}", i),
                author: "Ann Leckie".into(),
                external_id: i.to_string(),
                available_flag: true,
                formats: vec![],
            })
            .collect();
        let mut map = ByAuthor::new();
        map.insert(SearchResult {
            queried_author: AuthorQuery::new("Ann Leckie"),
            reported_count: 3,
            records: books,
            source_url: String::new(),
        });
        store.save("in.json", &map).unwrap();
        let mock = MockFetcher::new()
            .with_page("https://lib.example.com/media/1", r#""availableCopies":2,"ownedCopies":2"#)
            .with_page("https://lib.example.com/media/2", r#""availableCopies":0,"ownedCopies":1"#);
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let opts = StageOptions { delay: None, limit: Some(2) };
        let run = pipeline.run_probe(Path::new("in.json"), Path::new("out.json"), opts).unwrap();
        assert_eq!(run.counts.processed, 2);
        assert_eq!(mock.request_count(), 2);
        let out: Vec<AvailabilityRecord> = store.load("out.json").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Book 1");
    }

    #[test]
    fn limit_caps_searched_authors() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        store
            .save("authors.json", &vec!["Ann Leckie", "Mo Yan", "Han Kang"])
            .unwrap();
        let mock = MockFetcher::new()
            .with_page(&search_url(&s, "Ann Leckie"), &search_body("[]"))
            .with_page(&search_url(&s, "Mo Yan"), &search_body("[]"))
            .with_page(&search_url(&s, "Han Kang"), &search_body("[]"));
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let opts = StageOptions { delay: None, limit: Some(2) };
        let run = pipeline
            .run_search(Path::new("authors.json"), Path::new("out.json"), opts)
            .unwrap();
        assert_eq!(run.counts.processed, 2);
        assert_eq!(mock.request_count(), 2);
        let results: ByAuthor<SearchResult> = store.load("out.json").unwrap();
        assert_eq!(results.iter().count(), 2);
        assert!(results.get("Han Kang").is_none());
    }

    #[test]
    fn failed_book_check_reads_as_no_copies() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let books: Vec<CatalogRecord> = ["1", "2"]
            .iter()
            .map(|id| CatalogRecord {
                title: format!("Book {}", id),
                author: "Ann Leckie".into(),
                external_id: id.to_string(),
                available_flag: true,
                formats: vec![],
            })
            .collect();
        let mock = MockFetcher::new()
            .with_page("https://lib.example.com/media/1", r#""availableCopies":1,"ownedCopies":3"#)
            .with_failure("https://lib.example.com/media/2");
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let checked = pipeline.probe_books(&books, Some(0.0)).unwrap();
        assert_eq!(checked.len(), 2);
        assert_eq!(checked[0].1.available_copies, 1);
        assert_eq!(checked[1].1, Availability::absent());
    }

    #[test]
    fn single_search_swallows_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let url = search_url(&s, "Mo Yan");
        let mock = MockFetcher::new().with_failure(&url);
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let result = pipeline.search_one("  Mo   Yan ");
        assert_eq!(result.queried_author.as_str(), "Mo Yan");
        assert_eq!(result.reported_count, 0);
        assert!(result.records.is_empty());
        assert_eq!(result.source_url, url);
    }

    #[test]
    fn cancellation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        store.save("authors.json", &vec!["Ann Leckie"]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mock = MockFetcher::new();
        let pipeline = Pipeline::new(&mock, &s, cancel).with_progress(false);
        let err = pipeline
            .run_search(Path::new("authors.json"), Path::new("out.json"), StageOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::Interrupted));
        assert!(!store.exists("out.json"));
    }

    #[test]
    fn harvest_failure_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        let previous = vec![harvest::HarvestRecord::new("Ann Leckie")];
        store.save(Source::Hugo.records_artifact(), &previous).unwrap();
        let mock = MockFetcher::new().with_failure(crate::harvest::wiki::HUGO_URL);
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let report = pipeline.run_source(Source::Hugo, &[Stage::Harvest], StageOptions::default());
        assert_eq!(report.stages[0].status, StageStatus::Degraded);
        let kept: Vec<harvest::HarvestRecord> = store.load(Source::Hugo.records_artifact()).unwrap();
        assert_eq!(kept, previous);
    }

    #[test]
    fn find_author_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let store = ArtifactStore::new(dir.path());
        let mut map = ByAuthor::new();
        map.insert(SearchResult {
            queried_author: AuthorQuery::new("Abdulrazak Gurnah"),
            reported_count: 1,
            records: vec![CatalogRecord {
                title: "Paradise".into(),
                author: "Abdulrazak Gurnah".into(),
                external_id: "8919230".into(),
                available_flag: false,
                formats: vec![],
            }],
            source_url: String::new(),
        });
        store.save(refined_artifact(Source::Nobel), &map).unwrap();
        let mock = MockFetcher::new();
        let pipeline = Pipeline::new(&mock, &s, CancelToken::new()).with_progress(false);
        let inputs: Vec<PathBuf> = Source::ALL.iter().map(|s| PathBuf::from(refined_artifact(*s))).collect();
        match pipeline.find_author("abdulrazak  gurnah", &inputs).unwrap() {
            AuthorLookup::Found(r) => assert_eq!(r.records[0].external_id, "8919230"),
            AuthorLookup::NotFound { .. } => panic!("expected a match"),
        }
        match pipeline.find_author("Nobody", &inputs).unwrap() {
            AuthorLookup::NotFound { known } => assert_eq!(known, vec![("Abdulrazak Gurnah".to_string(), 1)]),
            AuthorLookup::Found(_) => panic!("unexpected match"),
        }
        let missing = pipeline.find_author("x", &[PathBuf::from("none.json")]);
        assert!(matches!(missing, Err(ArtifactError::Missing(_))));
    }
}
