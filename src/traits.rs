// src/traits.rs

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What one pipeline stage did in one run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    /// Rows in the produced artifact (0 for stages without a table output).
    pub rows: usize,
    /// Rows dropped by row-level skip handling.
    pub skipped: usize,
    /// True when the staleness gate served the previous artifact unchanged.
    pub cache_hit: bool,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cache_hit {
            write!(f, "up to date ({} rows)", self.rows)
        } else {
            write!(f, "{} rows, {} skipped", self.rows, self.skipped)
        }
    }
}

/// A stage failure. Row-level problems never surface here; this is for
/// whole-stage faults the scheduler logs and counts before moving on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed table {path}: {detail}")]
    MalformedTable { path: String, detail: String },
    #[error("{0}")]
    Other(String),
}

/// One step of the update pipeline.
///
/// Stages are registered at startup as an explicit ordered list; the
/// scheduler runs them strictly in sequence. External steps (fetchers,
/// normalizers) plug in through this same interface.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Returns the name of this stage (for logging and the run tally).
    fn name(&self) -> &str;

    /// Runs the stage to completion.
    async fn run(&self) -> Result<StageReport, StageError>;
}

/// Shared stage handle, as registered with the scheduler.
pub type SharedStage = Arc<dyn Stage>;
