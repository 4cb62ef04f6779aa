//! Metadata index and incremental import pipeline
//!
//! - `project_index`: ProjectIndex holding a project's merged snapshot and answering lookups
//! - `import_job`: ImportJob running one background parse of the compilation database
//! - `events`: completion and "import finished" events exchanged with the host
//! - `trigger`: ReanalysisTrigger seam invoked when a merge changed the metadata

pub mod events;
pub mod import_job;
pub mod project_index;
pub mod trigger;

pub use events::{ImportCompletion, ImportFinished, ImportOutcome};
pub use import_job::ImportJob;
pub use project_index::{ProjectIndex, ProjectItem};
pub use trigger::{ChannelReanalysisTrigger, LoggingReanalysisTrigger, ReanalysisTrigger};
