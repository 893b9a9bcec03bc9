use tracing::info;

use crate::matcher;
use crate::model::{ByAuthor, CatalogRecord, RefinedResult, SearchResult};
use crate::store::Table;

/// Keep only records whose catalog author matches the queried author.
///
/// `reported_count` of the refined result is the number of kept records;
/// `original_count` is the number of records that were examined.
pub fn refine(result: &SearchResult) -> RefinedResult {
    let query = result.queried_author.as_str();
    let kept: Vec<CatalogRecord> = result
        .records
        .iter()
        .filter(|r| matcher::matches(query, &r.author))
        .cloned()
        .collect();
    let mut refined = result.clone();
    refined.reported_count = kept.len() as u32;
    refined.records = kept;
    RefinedResult::new(refined, result.records.len())
}

#[derive(Debug, Clone)]
pub struct AuthorChange {
    pub author: String,
    pub before: usize,
    pub after: usize,
    pub removed: Vec<CatalogRecord>,
}

#[derive(Debug, Default)]
pub struct RefineReport {
    pub authors: usize,
    pub books_before: usize,
    pub books_after: usize,
    pub changes: Vec<AuthorChange>,
}

impl RefineReport {
    pub fn books_removed(&self) -> usize {
        self.books_before - self.books_after
    }

    pub fn log(&self) {
        for change in &self.changes {
            info!(
                "{}: {} -> {} audiobooks (removed {})",
                change.author,
                change.before,
                change.after,
                change.removed.len()
            );
            for book in &change.removed {
                info!("  removed '{}' by {}", book.title, book.author);
            }
        }
        info!(
            authors = self.authors,
            changed = self.changes.len(),
            before = self.books_before,
            after = self.books_after,
            removed = self.books_removed(),
            "refinement summary"
        );
        for (i, change) in self.top_removals(10).iter().enumerate() {
            info!(
                "{:>2}. {}: removed {} ({} -> {})",
                i + 1,
                change.author,
                change.removed.len(),
                change.before,
                change.after
            );
        }
    }

    /// Authors with the most removed records, ties by name.
    pub fn top_removals(&self, n: usize) -> Vec<&AuthorChange> {
        let mut sorted: Vec<&AuthorChange> = self.changes.iter().collect();
        sorted.sort_by(|a, b| {
            b.removed
                .len()
                .cmp(&a.removed.len())
                .then_with(|| a.author.cmp(&b.author))
        });
        sorted.truncate(n);
        sorted
    }
}

/// Refine every result, in input order.
pub fn refine_all<'a, I>(results: I) -> (ByAuthor<RefinedResult>, RefineReport)
where
    I: IntoIterator<Item = &'a SearchResult>,
{
    let mut out = ByAuthor::new();
    let mut report = RefineReport::default();
    for result in results {
        let refined = refine(result);
        report.authors += 1;
        report.books_before += refined.original_count();
        report.books_after += refined.records().len();
        if refined.removed_count() > 0 {
            let removed = result
                .records
                .iter()
                .filter(|r| !refined.records().contains(r))
                .cloned()
                .collect();
            report.changes.push(AuthorChange {
                author: result.queried_author.to_string(),
                before: refined.original_count(),
                after: refined.records().len(),
                removed,
            });
        }
        out.insert(refined);
    }
    (out, report)
}

/// One row per author: name, count, titles, search URL. Most books first.
pub fn summary_table(refined: &ByAuthor<RefinedResult>) -> Table {
    let mut rows: Vec<&RefinedResult> = refined.iter().collect();
    rows.sort_by(|a, b| {
        b.records()
            .len()
            .cmp(&a.records().len())
            .then_with(|| a.result.queried_author.as_str().cmp(b.result.queried_author.as_str()))
    });
    let mut table = Table::new(&["Author", "Audiobook Count", "Book Titles", "Search URL"]);
    for r in rows {
        let titles: Vec<&str> = r.records().iter().map(|b| b.title.as_str()).collect();
        table.push(vec![
            r.result.queried_author.to_string(),
            r.records().len().to_string(),
            titles.join("; "),
            r.result.source_url.clone(),
        ]);
    }
    table
}

/// Only authors whose record count changed.
pub fn changes_table(refined: &ByAuthor<RefinedResult>) -> Table {
    let mut rows: Vec<&RefinedResult> = refined.iter().filter(|r| r.removed_count() > 0).collect();
    rows.sort_by(|a, b| {
        b.removed_count()
            .cmp(&a.removed_count())
            .then_with(|| a.result.queried_author.as_str().cmp(b.result.queried_author.as_str()))
    });
    let mut table = Table::new(&["Author", "Original Count", "Refined Count", "Books Removed"]);
    for r in rows {
        table.push(vec![
            r.result.queried_author.to_string(),
            r.original_count().to_string(),
            r.records().len().to_string(),
            r.removed_count().to_string(),
        ]);
    }
    table
}
