mod config;
mod error;
mod fetch;
mod harvest;
mod matcher;
mod metrics;
mod model;
mod parser;
mod pipeline;
mod probe;
mod refine;
mod search;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::{Settings, MAX_DELAY_SECS};
use crate::fetch::{CancelToken, HttpFetcher};
use crate::harvest::Source;
use crate::metrics::{format_duration, truncate, StageStatus};
use crate::pipeline::{refined_artifact, AuthorLookup, Pipeline, Stage, StageOptions, StageRun};

#[derive(Parser)]
#[command(
    name = "audiobook_scout",
    about = "Find borrowable audiobooks by award-listed authors in a library catalog"
)]
struct Cli {
    /// Directory holding the pipeline artifacts (overrides SCOUT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hide progress bars (per-item lines still print)
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest author/title records from a reference source
    #[command(alias = "scrape")]
    Harvest {
        #[arg(short, long)]
        source: Source,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Seconds between page fetches
        #[arg(long, value_parser = parse_delay)]
        delay: Option<f64>,
        /// Keep the first N records after de-duplication
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Last BBC archive page to fetch
        #[arg(long)]
        pages: Option<u32>,
    },
    /// Search the catalog for every author in the input
    Search {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "audiobook_search_results.json")]
        output: PathBuf,
        /// Seconds between searches (default: search_delay setting)
        #[arg(long, value_parser = parse_delay)]
        delay: Option<f64>,
        /// Search only the first N authors
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Drop search hits whose author does not match the queried author
    Refine {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "audiobook_search_results_refined.json")]
        output: PathBuf,
        /// Refine only the first N authors
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Check live copy availability of every refined book
    #[command(alias = "availability")]
    Probe {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "available_audiobooks.json")]
        output: PathBuf,
        /// Seconds between item checks (default: probe_delay setting)
        #[arg(long, value_parser = parse_delay)]
        delay: Option<f64>,
        /// Check at most N books
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Run the pipeline for one source or all of them
    Run {
        /// Source name or "all"
        #[arg(short, long, default_value = "all")]
        source: String,
        /// Stages to run, in pipeline order (default: all)
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        stages: Vec<Stage>,
        /// Delay override for every network stage
        #[arg(long, value_parser = parse_delay)]
        delay: Option<f64>,
        /// Item limit for every stage
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Check one catalog item by ID
    Check { id: String },
    /// Run one catalog search and print what it resolved to
    Lookup { name: String },
    /// Check every refined book of one author
    Author {
        name: String,
        /// Refined artifact (default: every source's refined artifact)
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(long, value_parser = parse_delay)]
        delay: Option<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    let cancel = CancelToken::new();
    fetch::install_ctrl_c(cancel.clone());
    let fetcher = HttpFetcher::new(&settings, cancel.clone()).context("Failed to build HTTP client")?;
    let pipeline = Pipeline::new(&fetcher, &settings, cancel).with_progress(!cli.no_progress);

    match cli.command {
        Commands::Harvest {
            source,
            output,
            delay,
            limit,
            pages,
        } => {
            let output = output
                .map(|p| absolute(&p))
                .transpose()?
                .unwrap_or_else(|| PathBuf::from(source.records_artifact()));
            let run = pipeline.run_harvest(source, &output, StageOptions { delay, limit }, pages)?;
            finish_stage("harvest", &run)?;
        }
        Commands::Search {
            input,
            output,
            delay,
            limit,
        } => {
            let run = pipeline.run_search(&absolute(&input)?, &absolute(&output)?, StageOptions { delay, limit })?;
            finish_stage("search", &run)?;
        }
        Commands::Refine { input, output, limit } => {
            let run = pipeline.run_refine(&absolute(&input)?, &absolute(&output)?, limit)?;
            finish_stage("refine", &run)?;
        }
        Commands::Probe {
            input,
            output,
            delay,
            limit,
        } => {
            let run = pipeline.run_probe(&absolute(&input)?, &absolute(&output)?, StageOptions { delay, limit })?;
            finish_stage("probe", &run)?;
        }
        Commands::Run {
            source,
            stages,
            delay,
            limit,
        } => {
            let sources = if source.eq_ignore_ascii_case("all") {
                Source::ALL.to_vec()
            } else {
                vec![source.parse::<Source>().map_err(anyhow::Error::msg)?]
            };
            let stages = if stages.is_empty() { Stage::ALL.to_vec() } else { stages };
            let opts = StageOptions { delay, limit };

            let mut failed = Vec::new();
            for src in sources {
                println!("\n=== {} ===", src);
                let report = pipeline.run_source(src, &stages, opts);
                for m in &report.stages {
                    println!(
                        "  {:<8} {:<12} processed {:>4} | ok {:>4} | degraded {:>4}",
                        m.stage,
                        format!("{:?}", m.status).to_lowercase(),
                        m.processed,
                        m.succeeded,
                        m.degraded
                    );
                }
                let t = report.totals();
                println!(
                    "  {:<21} processed {:>4} | ok {:>4} | degraded {:>4}",
                    "total", t.processed, t.succeeded, t.degraded
                );
                let interrupted = report
                    .stages
                    .iter()
                    .any(|m| m.status == StageStatus::Interrupted);
                if report.has_failures() {
                    failed.push(src);
                }
                if interrupted {
                    break;
                }
            }
            if !failed.is_empty() {
                let names: Vec<&str> = failed.iter().map(|s| s.name()).collect();
                bail!("pipeline did not complete for: {}", names.join(", "));
            }
        }
        Commands::Check { id } => {
            let (url, page) = pipeline
                .check_item(&id)
                .with_context(|| format!("Could not check item {}", id))?;
            let a = &page.availability;
            println!("Title:       {}", page.title.as_deref().unwrap_or("Unknown"));
            println!("ID:          {}", id);
            println!("URL:         {}", url);
            println!("Copies:      {} available / {} owned", a.available_copies, a.owned_copies);
            println!(
                "Status:      {}",
                if a.available_copies > 0 { "AVAILABLE" } else { "not available" }
            );
            if let Some(desc) = &a.description {
                println!("Description: {}", truncate(desc, 200));
            }
        }
        Commands::Lookup { name } => {
            let result = pipeline.search_one(&name);
            println!("Author:   {}", result.queried_author);
            println!("URL:      {}", result.source_url);
            println!("Reported: {}", result.reported_count);
            println!("Parsed:   {}", result.records.len());
            for book in &result.records {
                println!(
                    "  [{}] {} by {}{}",
                    book.external_id,
                    book.title,
                    book.author,
                    if book.available_flag { "" } else { " (unavailable)" }
                );
            }
        }
        Commands::Author { name, input, delay } => {
            let inputs = match input {
                Some(p) => vec![absolute(&p)?],
                None => {
                    let mut all: Vec<PathBuf> = Source::ALL
                        .iter()
                        .map(|s| PathBuf::from(refined_artifact(*s)))
                        .collect();
                    all.push(PathBuf::from("audiobook_search_results_refined.json"));
                    all
                }
            };
            check_author(&pipeline, &name, &inputs, delay)?;
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

/// Reject delays `Duration` cannot hold or that would stall a run.
fn parse_delay(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if !secs.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&secs) {
        return Err(format!("must be between 0 and {} seconds", MAX_DELAY_SECS));
    }
    Ok(secs)
}

/// CLI paths are relative to the working directory, not the data dir.
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Cannot read the working directory")?;
    Ok(cwd.join(path))
}

fn finish_stage(stage: &str, run: &StageRun) -> anyhow::Result<()> {
    let c = &run.counts;
    println!(
        "{}: {} processed ({} ok, {} degraded)",
        stage, c.processed, c.succeeded, c.degraded
    );
    if let Some(path) = &run.artifact {
        println!("Saved {}", path.display());
    }
    if let Some(msg) = &run.message {
        println!("{}", msg);
    }
    if run.status == StageStatus::Failed {
        bail!("{} failed", stage);
    }
    Ok(())
}

fn check_author<F: fetch::Fetch>(
    pipeline: &Pipeline<'_, F>,
    name: &str,
    inputs: &[PathBuf],
    delay: Option<f64>,
) -> anyhow::Result<()> {
    let result = match pipeline.find_author(name, inputs)? {
        AuthorLookup::Found(result) => result,
        AuthorLookup::NotFound { known } => {
            println!("Author '{}' not found.", name);
            if !known.is_empty() {
                println!("\nAuthors with books:");
                for (author, count) in &known {
                    println!("  {} ({} books)", author, count);
                }
            }
            bail!("no refined results for '{}'", name);
        }
    };

    println!("{}: {} book(s)\n", result.queried_author, result.records.len());
    if result.records.is_empty() {
        return Ok(());
    }
    let checked = pipeline.probe_books(&result.records, delay)?;
    let mut available = 0;
    for (book, a) in &checked {
        if a.available_copies > 0 {
            available += 1;
            println!("  AVAILABLE     {} ({}/{})", book.title, a.available_copies, a.owned_copies);
        } else {
            println!("  not available {} ({}/{})", book.title, a.available_copies, a.owned_copies);
        }
    }
    println!("\n{} of {} book(s) available", available, checked.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_flag_rejects_unrepresentable_values() {
        assert_eq!(parse_delay("1.5"), Ok(1.5));
        assert_eq!(parse_delay("0"), Ok(0.0));
        for bad in ["inf", "NaN", "1e20", "-1", "soon"] {
            assert!(parse_delay(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn delay_flag_is_wired_to_every_network_command() {
        let cli = Cli::try_parse_from(["audiobook_scout", "--no-progress", "search", "-i", "a.json", "--delay", "2"]).unwrap();
        assert!(cli.no_progress);
        assert!(matches!(cli.command, Commands::Search { delay: Some(d), .. } if d == 2.0));
        assert!(Cli::try_parse_from(["audiobook_scout", "probe", "-i", "a.json", "--delay", "inf"]).is_err());
        assert!(Cli::try_parse_from(["audiobook_scout", "run", "--delay", "1e20"]).is_err());
    }
}
