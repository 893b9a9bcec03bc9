use std::path::PathBuf;

use thiserror::Error;

/// Network-level failure for one outbound request. Always caught by the
/// caller that issued the request; it never escapes a resolver or prober.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} cancelled")]
    Cancelled { url: String },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {} not found", .0.display())]
    Missing(PathBuf),
    #[error("artifact {} is not valid JSON: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("stage interrupted before completion")]
    Interrupted,
}

impl StageError {
    /// Missing input is the only stage error the orchestrator treats as a skip.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, StageError::Artifact(ArtifactError::Missing(_)))
    }
}
