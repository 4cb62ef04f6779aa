//! Workspace session management
//!
//! `WorkspaceSession` is the interactive context of the metadata service. It
//! owns one `ProjectIndex` per attached project, schedules background imports
//! and merges their results one at a time. Queries and merges both run on the
//! task that owns the session, so a query never observes a half-rebuilt
//! fallback table.

use chrono::Utc;
use path_clean::PathClean;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::io::file_system::FileSystemTrait;
use crate::project::command::VariableSource;
use crate::project::compilation_database::CompilationDatabaseParser;
use crate::project::index::{
    ImportCompletion, ImportFinished, ImportJob, ImportOutcome, ProjectIndex, ProjectItem,
    ReanalysisTrigger,
};
use crate::project::metadata::FileMetadata;
use crate::project::{ProjectError, ProjectId, ProjectLayout};

/// Channel buffer size for import completions
pub const COMPLETION_CHANNEL_BUFFER_SIZE: usize = 64;

/// State kept for one attached project
struct AttachedProject {
    layout: ProjectLayout,
    index: ProjectIndex,
    /// The single outstanding import, if any
    job: Option<ImportJob>,
    last_import: Option<ImportFinished>,
}

/// Summary of an attached project for the host
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project: ProjectId,
    pub project_root_path: PathBuf,
    pub commands_file_path: PathBuf,
    pub file_count: usize,
    /// Folders that resolve through the fallback table
    pub folder_count: usize,
    pub import_pending: bool,
    pub last_import: Option<ImportFinished>,
}

/// Owns the metadata indexes of all attached projects
///
/// Completions of background imports arrive on the receiver returned by
/// [`WorkspaceSession::new`]; the owner feeds them back through
/// [`WorkspaceSession::handle_completion`].
pub struct WorkspaceSession<F: FileSystemTrait + 'static> {
    projects: HashMap<ProjectId, AttachedProject>,
    filesystem: F,
    parser: CompilationDatabaseParser<F>,
    trigger: Arc<dyn ReanalysisTrigger>,
    completion_tx: mpsc::Sender<ImportCompletion>,
    next_generation: u64,
}

impl<F: FileSystemTrait + 'static> WorkspaceSession<F> {
    pub fn new(
        filesystem: F,
        trigger: Arc<dyn ReanalysisTrigger>,
    ) -> (Self, mpsc::Receiver<ImportCompletion>) {
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_BUFFER_SIZE);
        let session = Self {
            projects: HashMap::new(),
            parser: CompilationDatabaseParser::new(filesystem.clone()),
            filesystem,
            trigger,
            completion_tx,
            next_generation: 0,
        };
        (session, completion_rx)
    }

    /// Use a different source for `$NAME` expansion in recorded commands
    pub fn with_variables(mut self, variables: Arc<dyn VariableSource>) -> Self {
        self.parser = self.parser.clone().with_variables(variables);
        self
    }

    /// Attach a project and schedule its first import
    #[instrument(name = "workspace_session_attach", skip(self))]
    pub fn attach(&mut self, layout: ProjectLayout) -> ProjectId {
        let project = ProjectId::new();

        if !self.filesystem.exists(&layout.commands_file_path) {
            warn!(
                "No compilation database at {}, project {} has no metadata until one appears",
                layout.commands_file_path.display(),
                project
            );
        }
        info!(
            "Attached project {} rooted at {}",
            project,
            layout.project_root_path.display()
        );

        self.projects.insert(
            project,
            AttachedProject {
                layout,
                index: ProjectIndex::new(),
                job: None,
                last_import: None,
            },
        );
        self.schedule_import(project);
        project
    }

    /// Detach a project; an outstanding import is cancelled and its result dropped
    pub fn detach(&mut self, project: ProjectId) -> bool {
        match self.projects.remove(&project) {
            Some(attached) => {
                if let Some(job) = attached.job {
                    job.cancel();
                }
                info!("Detached project {}", project);
                true
            }
            None => false,
        }
    }

    /// Handles of all attached projects
    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.projects.keys().copied().collect()
    }

    /// The compilation database at `path` changed; reimport every project reading it
    pub fn source_changed(&mut self, path: &Path) -> Vec<ProjectId> {
        let changed = path.clean();
        let changed_canonical = self.filesystem.canonicalize(&changed).ok();

        let affected: Vec<ProjectId> = self
            .projects
            .iter()
            .filter(|(_, attached)| {
                let commands_file = &attached.layout.commands_file_path;
                if *commands_file == changed {
                    return true;
                }
                match (&changed_canonical, self.filesystem.canonicalize(commands_file)) {
                    (Some(a), Ok(b)) => *a == b,
                    _ => false,
                }
            })
            .map(|(project, _)| *project)
            .collect();

        if affected.is_empty() {
            debug!("No attached project reads {}", changed.display());
        }
        for project in &affected {
            self.schedule_import(*project);
        }
        affected
    }

    /// Schedule a fresh import of one project, superseding any import in flight
    pub fn reimport(&mut self, project: ProjectId) -> Result<(), ProjectError> {
        if !self.projects.contains_key(&project) {
            return Err(ProjectError::UnknownProject(project));
        }
        self.schedule_import(project);
        Ok(())
    }

    fn schedule_import(&mut self, project: ProjectId) {
        let Some(attached) = self.projects.get_mut(&project) else {
            return;
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        if let Some(previous) = attached.job.take() {
            debug!(
                "Import {} of project {} superseded by {}",
                previous.generation(),
                project,
                generation
            );
            previous.cancel();
        }

        attached.job = Some(ImportJob::spawn(
            project,
            generation,
            attached.layout.commands_file_path.clone(),
            self.parser.clone(),
            self.completion_tx.clone(),
        ));
    }

    /// Merge a finished import into its project's index
    ///
    /// Returns `None` when the completion is no longer relevant: the project
    /// was detached or a newer import was scheduled in the meantime.
    #[instrument(name = "workspace_session_handle_completion", skip_all, fields(project = %completion.project, generation = completion.generation))]
    pub async fn handle_completion(&mut self, completion: ImportCompletion) -> Option<ImportFinished> {
        let ImportCompletion {
            project,
            generation,
            snapshot,
        } = completion;

        let Some(attached) = self.projects.get_mut(&project) else {
            debug!("Discarding import for detached project {}", project);
            return None;
        };

        match &attached.job {
            Some(job) if job.generation() == generation => {}
            _ => {
                debug!("Discarding stale import {} for project {}", generation, project);
                return None;
            }
        }
        attached.job = None;

        let skipped_entries = snapshot.skipped().len();
        let outcome = match attached.index.apply(snapshot) {
            Ok(changed) => ImportOutcome::Merged { changed },
            Err(e) => ImportOutcome::Failed {
                reason: e.to_string(),
            },
        };

        let finished = ImportFinished {
            project,
            outcome,
            file_count: attached.index.file_count(),
            skipped_entries,
            finished_at: Utc::now(),
        };
        attached.last_import = Some(finished.clone());

        match &finished.outcome {
            ImportOutcome::Merged { changed: true } => {
                info!(
                    "Metadata of project {} changed ({} files)",
                    project, finished.file_count
                );
                if let Err(e) = self.trigger.trigger(project).await {
                    warn!("Failed to request re-analysis of project {}: {}", project, e);
                }
            }
            ImportOutcome::Merged { changed: false } => {
                debug!("Import for project {} produced no changes", project);
            }
            ImportOutcome::Failed { reason } => {
                warn!("Import for project {} failed: {}", project, reason);
            }
        }

        Some(finished)
    }

    /// Whether an import is outstanding for the project
    pub fn is_import_pending(&self, project: ProjectId) -> bool {
        self.projects
            .get(&project)
            .is_some_and(|attached| attached.job.is_some())
    }

    pub fn status(&self, project: ProjectId) -> Result<ProjectStatus, ProjectError> {
        let attached = self.project(project)?;
        Ok(ProjectStatus {
            project,
            project_root_path: attached.layout.project_root_path.clone(),
            commands_file_path: attached.layout.commands_file_path.clone(),
            file_count: attached.index.file_count(),
            folder_count: attached
                .index
                .snapshot()
                .map_or(0, |snapshot| snapshot.folder_fallback().len()),
            import_pending: self.is_import_pending(project),
            last_import: attached.last_import.clone(),
        })
    }

    /// Describe `path` as a file or a folder by asking the filesystem
    pub fn item_for(&self, path: impl Into<PathBuf>) -> ProjectItem {
        let path = path.into();
        if self.filesystem.is_dir(&path) {
            ProjectItem::folder(path)
        } else {
            ProjectItem::file(path)
        }
    }

    /// Full metadata for an item; empty when nothing is known
    pub fn resolve(&self, project: ProjectId, item: &ProjectItem) -> Result<FileMetadata, ProjectError> {
        Ok(self.project(project)?.index.resolve(item, &self.filesystem))
    }

    pub fn include_directories(
        &self,
        project: ProjectId,
        item: &ProjectItem,
    ) -> Result<Vec<PathBuf>, ProjectError> {
        Ok(self.resolve(project, item)?.includes)
    }

    pub fn framework_directories(
        &self,
        project: ProjectId,
        item: &ProjectItem,
    ) -> Result<Vec<PathBuf>, ProjectError> {
        Ok(self.resolve(project, item)?.framework_directories)
    }

    pub fn defines(
        &self,
        project: ProjectId,
        item: &ProjectItem,
    ) -> Result<BTreeMap<String, String>, ProjectError> {
        Ok(self.resolve(project, item)?.defines)
    }

    pub fn extra_compile_flags(&self, project: ProjectId, item: &ProjectItem) -> Result<String, ProjectError> {
        Ok(self.resolve(project, item)?.compile_flags)
    }

    pub fn has_metadata(&self, project: ProjectId, item: &ProjectItem) -> Result<bool, ProjectError> {
        Ok(self
            .project(project)?
            .index
            .has_metadata(item, &self.filesystem))
    }

    fn project(&self, project: ProjectId) -> Result<&AttachedProject, ProjectError> {
        self.projects
            .get(&project)
            .ok_or(ProjectError::UnknownProject(project))
    }
}

impl<F: FileSystemTrait + 'static> Drop for WorkspaceSession<F> {
    fn drop(&mut self) {
        for attached in self.projects.values() {
            if let Some(job) = &attached.job {
                job.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::file_system::TestFileSystem;
    use crate::project::index::trigger::MockReanalysisTrigger;
    use crate::project::metadata::CompilationSnapshot;

    #[cfg(feature = "test-logging")]
    crate::setup_test_logging!();

    const ROOT: &str = "/ws/src";
    const DB_PATH: &str = "/ws/build/compile_commands.json";

    fn database(define: &str) -> String {
        format!(
            r#"[
                {{ "file": "/ws/src/pkg/a.cpp", "directory": "/ws/build",
                   "command": "c++ -D{define} -I/ws/src/pkg/include -Wall -c /ws/src/pkg/a.cpp" }}
            ]"#
        )
    }

    fn session_with(
        fs: &TestFileSystem,
        trigger: MockReanalysisTrigger,
    ) -> (
        WorkspaceSession<TestFileSystem>,
        mpsc::Receiver<ImportCompletion>,
    ) {
        WorkspaceSession::new(fs.clone(), Arc::new(trigger))
    }

    fn layout() -> ProjectLayout {
        ProjectLayout::conventional(PathBuf::from(ROOT))
    }

    async fn next_finished(
        session: &mut WorkspaceSession<TestFileSystem>,
        rx: &mut mpsc::Receiver<ImportCompletion>,
    ) -> ImportFinished {
        loop {
            let completion = rx.recv().await.unwrap();
            if let Some(finished) = session.handle_completion(completion).await {
                return finished;
            }
        }
    }

    #[tokio::test]
    async fn test_first_import_triggers_reanalysis_once() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));

        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().times(1).returning(|_| Ok(()));
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        assert!(session.is_import_pending(project));

        let finished = next_finished(&mut session, &mut rx).await;
        assert_eq!(finished.project, project);
        assert!(finished.changed());
        assert_eq!(finished.file_count, 1);
        assert!(!session.is_import_pending(project));

        let item = ProjectItem::file("/ws/src/pkg/a.cpp");
        let defines = session.defines(project, &item).unwrap();
        assert!(defines.contains_key("FOO"));
        assert_eq!(
            session.include_directories(project, &item).unwrap(),
            vec![PathBuf::from("/ws/src/pkg/include")]
        );
        assert_eq!(session.extra_compile_flags(project, &item).unwrap(), "-Wall");
        assert!(session.framework_directories(project, &item).unwrap().is_empty());

        // identical reimport: no change, no second trigger
        let affected = session.source_changed(Path::new(DB_PATH));
        assert_eq!(affected, vec![project]);
        let finished = next_finished(&mut session, &mut rx).await;
        assert_eq!(finished.outcome, ImportOutcome::Merged { changed: false });
    }

    #[tokio::test]
    async fn test_changed_database_triggers_again() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));

        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().times(2).returning(|_| Ok(()));
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        next_finished(&mut session, &mut rx).await;

        fs.set_file_content(DB_PATH, &database("BAR"));
        session.source_changed(Path::new(DB_PATH));
        let finished = next_finished(&mut session, &mut rx).await;
        assert!(finished.changed());

        let defines = session
            .defines(project, &ProjectItem::file("/ws/src/pkg/a.cpp"))
            .unwrap();
        assert!(defines.contains_key("BAR"));
        assert!(!defines.contains_key("FOO"));
    }

    #[tokio::test]
    async fn test_missing_database_reports_failure_and_empty_metadata() {
        let fs = TestFileSystem::new();
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().never();
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        let finished = next_finished(&mut session, &mut rx).await;

        assert!(!finished.is_success());
        match &finished.outcome {
            ImportOutcome::Failed { reason } => assert!(reason.contains("not found")),
            other => panic!("Expected failure, got {:?}", other),
        }

        let item = ProjectItem::file("/ws/src/pkg/a.cpp");
        assert!(session.resolve(project, &item).unwrap().is_empty());
        assert!(!session.has_metadata(project, &item).unwrap());
    }

    #[tokio::test]
    async fn test_failed_reimport_keeps_previous_metadata() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));

        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().times(1).returning(|_| Ok(()));
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        next_finished(&mut session, &mut rx).await;

        fs.remove_file(DB_PATH);
        session.source_changed(Path::new(DB_PATH));
        let finished = next_finished(&mut session, &mut rx).await;

        assert!(!finished.is_success());
        assert_eq!(finished.file_count, 1);
        assert!(
            session
                .has_metadata(project, &ProjectItem::folder("/ws/src/pkg"))
                .unwrap()
        );
        assert_eq!(
            session.status(project).unwrap().last_import.map(|f| f.is_success()),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_completion_for_detached_project_is_discarded() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().never();
        let (mut session, _rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        assert!(session.detach(project));
        assert!(!session.detach(project));

        let completion = ImportCompletion {
            project,
            generation: 0,
            snapshot: CompilationSnapshot::from_files(BTreeMap::new(), Vec::new()),
        };
        assert!(session.handle_completion(completion).await.is_none());
        assert!(matches!(
            session.resolve(project, &ProjectItem::file("/ws/src/pkg/a.cpp")),
            Err(ProjectError::UnknownProject(p)) if p == project
        ));
    }

    #[tokio::test]
    async fn test_superseded_import_is_discarded() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().times(1).returning(|_| Ok(()));
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        session.reimport(project).unwrap();

        // the first generation was superseded before it could report
        let stale = ImportCompletion {
            project,
            generation: 0,
            snapshot: CompilationSnapshot::from_files(BTreeMap::new(), Vec::new()),
        };
        assert!(session.handle_completion(stale).await.is_none());
        assert!(session.is_import_pending(project));

        let finished = next_finished(&mut session, &mut rx).await;
        assert!(finished.changed());

        let status = session.status(project).unwrap();
        assert_eq!(status.file_count, 1);
        // /ws/src/pkg and its ancestors up to the root
        assert_eq!(status.folder_count, 4);
    }

    #[tokio::test]
    async fn test_source_changed_only_affects_matching_projects() {
        let fs = TestFileSystem::new();
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().returning(|_| Ok(()));
        let (mut session, _rx) = session_with(&fs, trigger);

        let first = session.attach(layout());
        let second = session.attach(
            ProjectLayout::conventional(PathBuf::from("/other/src")),
        );

        assert_eq!(
            session.source_changed(Path::new("/ws/build/../build/compile_commands.json")),
            vec![first]
        );
        assert_eq!(
            session.source_changed(Path::new("/other/build/compile_commands.json")),
            vec![second]
        );
        assert!(session.source_changed(Path::new("/nowhere/compile_commands.json")).is_empty());
    }

    #[tokio::test]
    async fn test_source_changed_through_symlink() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, "[]");
        fs.add_symlink("/ws/src/compile_commands.json", DB_PATH);
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().returning(|_| Ok(()));
        let (mut session, _rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        assert_eq!(
            session.source_changed(Path::new("/ws/src/compile_commands.json")),
            vec![project]
        );
    }

    #[tokio::test]
    async fn test_trigger_failure_does_not_undo_merge() {
        let fs = TestFileSystem::new();
        fs.set_file_content(DB_PATH, &database("FOO"));
        let mut trigger = MockReanalysisTrigger::new();
        trigger
            .expect_trigger()
            .times(1)
            .returning(|_| Err(ProjectError::Reanalysis("host busy".to_string())));
        let (mut session, mut rx) = session_with(&fs, trigger);

        let project = session.attach(layout());
        let finished = next_finished(&mut session, &mut rx).await;

        assert!(finished.changed());
        assert!(
            session
                .has_metadata(project, &ProjectItem::file("/ws/src/pkg/a.cpp"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let fs = TestFileSystem::new();
        let (mut session, _rx) = session_with(&fs, MockReanalysisTrigger::new());
        let stranger = ProjectId::new();

        assert!(matches!(
            session.reimport(stranger),
            Err(ProjectError::UnknownProject(_))
        ));
        assert!(session.status(stranger).is_err());
        assert!(!session.is_import_pending(stranger));
    }

    #[tokio::test]
    async fn test_injected_variables_reach_the_parser() {
        let fs = TestFileSystem::new();
        fs.set_file_content(
            DB_PATH,
            r#"[ { "file": "/ws/src/a.c", "directory": "/ws/build", "command": "cc -I$SDK/include -c /ws/src/a.c" } ]"#,
        );
        let mut trigger = MockReanalysisTrigger::new();
        trigger.expect_trigger().returning(|_| Ok(()));
        let variables: HashMap<String, String> =
            [("SDK".to_string(), "/opt/sdk".to_string())].into();

        let (session, mut rx) = session_with(&fs, trigger);
        let mut session = session.with_variables(Arc::new(variables));
        let project = session.attach(layout());
        next_finished(&mut session, &mut rx).await;

        assert_eq!(
            session
                .include_directories(project, &ProjectItem::file("/ws/src/a.c"))
                .unwrap(),
            vec![PathBuf::from("/opt/sdk/include")]
        );
    }

    #[tokio::test]
    async fn test_item_for_uses_filesystem_kind() {
        let fs = TestFileSystem::new();
        fs.add_dir("/ws/src/pkg");
        let (session, _rx) = session_with(&fs, MockReanalysisTrigger::new());

        assert_eq!(session.item_for("/ws/src/pkg"), ProjectItem::folder("/ws/src/pkg"));
        assert_eq!(
            session.item_for("/ws/src/pkg/a.cpp"),
            ProjectItem::file("/ws/src/pkg/a.cpp")
        );
    }
}
