//! Background import of a compilation database
//!
//! An `ImportJob` parses the database on tokio's blocking pool and sends the
//! resulting snapshot back to the interactive context over a channel. The
//! interactive context never waits on the parse itself.

use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::io::file_system::FileSystemTrait;
use crate::project::ProjectId;
use crate::project::compilation_database::{CompilationDatabaseError, CompilationDatabaseParser};
use crate::project::index::events::ImportCompletion;
use crate::project::metadata::CompilationSnapshot;

/// Handle to one outstanding background parse
#[derive(Debug)]
pub struct ImportJob {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ImportJob {
    /// Spawn a parse of `commands_file`; the completion is sent on `completions`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F: FileSystemTrait + 'static>(
        project: ProjectId,
        generation: u64,
        commands_file: PathBuf,
        parser: CompilationDatabaseParser<F>,
        completions: mpsc::Sender<ImportCompletion>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        debug!(
            "Scheduling import {} of {} for project {}",
            generation,
            commands_file.display(),
            project
        );

        let handle = tokio::spawn(async move {
            let parse_cancel = task_cancel.clone();
            let parse_path = commands_file.clone();
            let result = tokio::task::spawn_blocking(move || {
                parser.parse_cancellable(&parse_path, &parse_cancel)
            })
            .await;

            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Import task for {} failed: {}", commands_file.display(), e);
                    CompilationSnapshot::invalid(CompilationDatabaseError::TaskFailed {
                        error: e.to_string(),
                    })
                }
            };

            if task_cancel.is_cancelled() {
                debug!("Import {} for project {} was superseded, discarding", generation, project);
                return;
            }

            let completion = ImportCompletion {
                project,
                generation,
                snapshot,
            };
            if completions.send(completion).await.is_err() {
                debug!("Completion receiver dropped, discarding import {}", generation);
            }
        });

        Self {
            generation,
            cancel,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the job; a parse already running stops at the next entry and its result is dropped
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::file_system::TestFileSystem;
    use std::path::Path;

    const DB_PATH: &str = "/ws/build/compile_commands.json";

    fn parser_with(content: &str) -> CompilationDatabaseParser<TestFileSystem> {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, content);
        CompilationDatabaseParser::new(fs)
    }

    #[tokio::test]
    async fn test_job_delivers_completion() {
        let (tx, mut rx) = mpsc::channel(4);
        let project = ProjectId::new();
        let parser = parser_with(
            r#"[ { "file": "/ws/a.c", "directory": "/ws", "command": "cc -DA -c a.c" } ]"#,
        );

        let job = ImportJob::spawn(project, 7, PathBuf::from(DB_PATH), parser, tx);
        assert_eq!(job.generation(), 7);

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.project, project);
        assert_eq!(completion.generation, 7);
        assert!(completion.snapshot.is_valid());
        assert!(completion.snapshot.file(Path::new("/ws/a.c")).is_some());
    }

    #[tokio::test]
    async fn test_job_reports_missing_database_as_invalid_snapshot() {
        let (tx, mut rx) = mpsc::channel(4);
        let parser = CompilationDatabaseParser::new(TestFileSystem::new());

        let _job = ImportJob::spawn(ProjectId::new(), 1, PathBuf::from(DB_PATH), parser, tx);

        let completion = rx.recv().await.unwrap();
        assert!(!completion.snapshot.is_valid());
    }

    #[tokio::test]
    async fn test_cancelled_job_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let parser = parser_with("[]");

        let job = ImportJob::spawn(ProjectId::new(), 1, PathBuf::from(DB_PATH), parser, tx);
        job.cancel();

        // the job owned the only sender, so the channel closes without a message
        assert!(rx.recv().await.is_none());
    }
}
