//! Import completion event types
//!
//! `ImportCompletion` travels from a background parse back to the interactive
//! context; `ImportFinished` is what the host receives once the result has
//! been merged (or rejected).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::project::ProjectId;
use crate::project::metadata::CompilationSnapshot;

/// Raw result of a background parse, before merging
#[derive(Debug)]
pub struct ImportCompletion {
    pub project: ProjectId,
    /// Import generation this parse was scheduled as; stale generations are dropped
    pub generation: u64,
    pub snapshot: CompilationSnapshot,
}

/// Outcome of an import as reported to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    /// The snapshot was merged; `changed` tells whether dependent state needs refreshing
    Merged { changed: bool },
    /// The database was missing or unusable; previous metadata was kept
    Failed { reason: String },
}

/// "Import finished" notification delivered to the host
#[derive(Debug, Clone, Serialize)]
pub struct ImportFinished {
    pub project: ProjectId,
    #[serde(flatten)]
    pub outcome: ImportOutcome,
    /// Files with exact metadata after the import
    pub file_count: usize,
    /// Entries of the latest parse that had to be skipped
    pub skipped_entries: usize,
    pub finished_at: DateTime<Utc>,
}

impl ImportFinished {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ImportOutcome::Merged { .. })
    }

    pub fn changed(&self) -> bool {
        matches!(self.outcome, ImportOutcome::Merged { changed: true })
    }
}
