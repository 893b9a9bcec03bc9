use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Skipped,
    Degraded,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub status: StageStatus,
    pub processed: usize,
    pub succeeded: usize,
    pub degraded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-item counts for one stage run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub processed: usize,
    pub succeeded: usize,
    pub degraded: usize,
}

impl Counts {
    pub fn ok(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn degraded(&mut self) {
        self.processed += 1;
        self.degraded += 1;
    }
}

/// Collects stage outcomes of one orchestrated run for one source.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageMetric>,
}

impl RunReport {
    pub fn new(run_id: String, source: &str) -> Self {
        RunReport {
            run_id,
            source: source.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    pub fn begin(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn record(
        &mut self,
        stage: &str,
        status: StageStatus,
        counts: Counts,
        artifact: Option<String>,
        message: Option<String>,
        started_at: DateTime<Utc>,
    ) {
        match status {
            StageStatus::Completed => info!(
                source = %self.source,
                stage,
                processed = counts.processed,
                succeeded = counts.succeeded,
                degraded = counts.degraded,
                "stage completed"
            ),
            _ => warn!(
                source = %self.source,
                stage,
                status = ?status,
                processed = counts.processed,
                degraded = counts.degraded,
                "{}",
                message.as_deref().unwrap_or("stage did not complete cleanly")
            ),
        }
        self.stages.push(StageMetric {
            stage: stage.to_string(),
            status,
            processed: counts.processed,
            succeeded: counts.succeeded,
            degraded: counts.degraded,
            artifact,
            message,
            started_at,
            finished_at: Utc::now(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn has_failures(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.status, StageStatus::Failed | StageStatus::Interrupted))
    }

    pub fn totals(&self) -> Counts {
        self.stages.iter().fold(Counts::default(), |acc, s| Counts {
            processed: acc.processed + s.processed,
            succeeded: acc.succeeded + s.succeeded,
            degraded: acc.degraded + s.degraded,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}_run_report.json", self.source)
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Progress bar for a network stage. Log lines go through `suspend` so they
/// do not tear the bar.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(len: usize, label: &str) -> Self {
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:>8} [{elapsed_precise}] {bar:40} {pos}/{len} (eta {eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(label.to_string());
        Progress { bar }
    }

    pub fn hidden() -> Self {
        Progress {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn line(&self, msg: impl AsRef<str>) {
        self.bar.suspend(|| info!("{}", msg.as_ref()));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.bar.suspend(|| warn!("{}", msg.as_ref()));
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// At most `max` characters, with `...` appended when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
