//! Build metadata for attached projects
//!
//! Compile commands are tokenized and classified (`command`), parsed from the
//! compilation database into snapshots (`compilation_database`, `metadata`),
//! and merged into per-project indexes owned by a `WorkspaceSession`.

pub mod command;
pub mod compilation_database;
pub mod error;
pub mod index;
pub mod metadata;
pub mod workspace;
pub mod workspace_session;

pub use error::ProjectError;
pub use workspace::{ProjectId, ProjectLayout};
pub use workspace_session::WorkspaceSession;
