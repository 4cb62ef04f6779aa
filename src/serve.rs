//! Line-oriented host protocol
//!
//! Each input line is one command; each output line is one JSON object.
//!
//! ```text
//! query <path>       metadata for a file or folder
//! includes <path>    include directories only
//! frameworks <path>  framework directories only
//! defines <path>     macro definitions only
//! flags <path>       pass-through compile flags only
//! changed [<path>]   the compilation database at <path> (or every project's) changed
//! status             state of every attached project
//! quit               stop serving
//! ```
//!
//! Import completions are merged on the same task that answers queries and
//! reported as `import_finished` lines as soon as they arrive. A merge that
//! changed a project's metadata is followed by a `reanalyze` line.

use clap::ValueEnum;
use path_clean::PathClean;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::io::file_system::FileSystemTrait;
use crate::project::index::{ImportCompletion, ImportFinished, ProjectItem};
use crate::project::metadata::{CompilationSnapshot, FileMetadata};
use crate::project::workspace_session::ProjectStatus;
use crate::project::{ProjectError, ProjectId, WorkspaceSession};

/// Re-analysis requests that may queue up before the serve loop reports them
pub const REANALYSIS_BUFFER_SIZE: usize = 64;

/// A single metadata field a host can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetadataField {
    Includes,
    Frameworks,
    Defines,
    Flags,
}

impl MetadataField {
    fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "includes" => Some(Self::Includes),
            "frameworks" => Some(Self::Frameworks),
            "defines" => Some(Self::Defines),
            "flags" => Some(Self::Flags),
            _ => None,
        }
    }
}

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum ServeCommand {
    Query(PathBuf),
    Field(MetadataField, PathBuf),
    Changed(Option<PathBuf>),
    Status,
    Quit,
}

impl ServeCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        if let Some(field) = MetadataField::from_verb(verb) {
            if rest.is_empty() {
                return Err(format!("{} needs a path", verb));
            }
            return Ok(Self::Field(field, PathBuf::from(rest)));
        }

        match verb {
            "query" if rest.is_empty() => Err("query needs a path".to_string()),
            "query" => Ok(Self::Query(PathBuf::from(rest))),
            "changed" if rest.is_empty() => Ok(Self::Changed(None)),
            "changed" => Ok(Self::Changed(Some(PathBuf::from(rest)))),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

/// Resolved metadata for one queried item
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    #[serde(flatten)]
    pub item: ProjectItem,
    pub has_metadata: bool,
    pub metadata: FileMetadata,
}

impl QueryReport {
    pub fn collect<F: FileSystemTrait + 'static>(
        session: &WorkspaceSession<F>,
        project: ProjectId,
        item: ProjectItem,
    ) -> Result<Self, ProjectError> {
        Ok(Self {
            has_metadata: session.has_metadata(project, &item)?,
            metadata: session.resolve(project, &item)?,
            item,
        })
    }
}

/// A skipped database entry as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct SkippedReport {
    pub index: usize,
    pub file: Option<PathBuf>,
    pub reason: String,
}

/// What a one-off parse found in a compilation database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseReport {
    pub commands_file_path: PathBuf,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub files: Vec<PathBuf>,
    pub folder_count: usize,
    pub skipped: Vec<SkippedReport>,
}

impl DatabaseReport {
    pub fn from_snapshot(commands_file_path: PathBuf, snapshot: &CompilationSnapshot) -> Self {
        if snapshot.is_valid() && snapshot.is_empty() {
            warn!(
                "Compilation database {} has no usable entries",
                commands_file_path.display()
            );
        }

        Self {
            valid: snapshot.is_valid(),
            failure: snapshot.failure().map(ToString::to_string),
            files: snapshot.files().keys().cloned().collect(),
            folder_count: snapshot.folder_fallback().len(),
            skipped: snapshot
                .skipped()
                .iter()
                .map(|entry| SkippedReport {
                    index: entry.index,
                    file: entry.file.clone(),
                    reason: entry.reason.to_string(),
                })
                .collect(),
            commands_file_path,
        }
    }
}

/// A line written back to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServeOutput {
    Metadata(QueryReport),
    Includes {
        path: PathBuf,
        includes: Vec<PathBuf>,
    },
    Frameworks {
        path: PathBuf,
        framework_directories: Vec<PathBuf>,
    },
    Defines {
        path: PathBuf,
        defines: BTreeMap<String, String>,
    },
    Flags {
        path: PathBuf,
        compile_flags: String,
    },
    Status { projects: Vec<ProjectStatus> },
    ImportFinished(ImportFinished),
    Reanalyze { project: ProjectId },
    Rescheduled { projects: Vec<ProjectId> },
    Error { message: String },
}

/// Answer for a single metadata field of `item`
pub fn field_output<F: FileSystemTrait + 'static>(
    session: &WorkspaceSession<F>,
    project: ProjectId,
    field: MetadataField,
    item: ProjectItem,
) -> Result<ServeOutput, ProjectError> {
    Ok(match field {
        MetadataField::Includes => ServeOutput::Includes {
            includes: session.include_directories(project, &item)?,
            path: item.path,
        },
        MetadataField::Frameworks => ServeOutput::Frameworks {
            framework_directories: session.framework_directories(project, &item)?,
            path: item.path,
        },
        MetadataField::Defines => ServeOutput::Defines {
            defines: session.defines(project, &item)?,
            path: item.path,
        },
        MetadataField::Flags => ServeOutput::Flags {
            compile_flags: session.extra_compile_flags(project, &item)?,
            path: item.path,
        },
    })
}

/// Turn a user-supplied path into an absolute one, relative paths being taken from `root`
pub fn absolute_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.clean()
    } else {
        root.join(path).clean()
    }
}

/// Serve `project` until `quit` or end of input
pub async fn run<F, R, W>(
    session: &mut WorkspaceSession<F>,
    completions: &mut mpsc::Receiver<ImportCompletion>,
    reanalysis: &mut mpsc::Receiver<ProjectId>,
    project: ProjectId,
    root: &Path,
    input: R,
    mut output: W,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FileSystemTrait + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    info!("Serving project {}", project);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match ServeCommand::parse(&line) {
                    Ok(command) => match execute(session, project, root, command) {
                        Some(reply) => reply,
                        None => break,
                    },
                    Err(message) => {
                        warn!("Rejected input line '{}': {}", line, message);
                        ServeOutput::Error { message }
                    }
                };
                write_line(&mut output, &reply).await?;
            }
            Some(completion) = completions.recv() => {
                if let Some(finished) = session.handle_completion(completion).await {
                    debug!(
                        "Reporting import of project {} (changed: {})",
                        finished.project,
                        finished.changed()
                    );
                    write_line(&mut output, &ServeOutput::ImportFinished(finished)).await?;
                }
            }
            Some(requested) = reanalysis.recv() => {
                write_line(&mut output, &ServeOutput::Reanalyze { project: requested }).await?;
            }
        }
    }

    output.flush().await?;
    Ok(())
}

/// Run one command; `None` means the host asked to stop
fn execute<F: FileSystemTrait + 'static>(
    session: &mut WorkspaceSession<F>,
    project: ProjectId,
    root: &Path,
    command: ServeCommand,
) -> Option<ServeOutput> {
    let result = match command {
        ServeCommand::Query(path) => {
            let item = session.item_for(absolute_path(root, &path));
            QueryReport::collect(session, project, item).map(ServeOutput::Metadata)
        }
        ServeCommand::Field(field, path) => {
            let item = session.item_for(absolute_path(root, &path));
            field_output(session, project, field, item)
        }
        ServeCommand::Changed(Some(path)) => Ok(ServeOutput::Rescheduled {
            projects: session.source_changed(&absolute_path(root, &path)),
        }),
        ServeCommand::Changed(None) => {
            let projects = session.project_ids();
            projects
                .iter()
                .try_for_each(|id| session.reimport(*id))
                .map(|()| ServeOutput::Rescheduled { projects })
        }
        ServeCommand::Status => session
            .project_ids()
            .into_iter()
            .map(|id| session.status(id))
            .collect::<Result<Vec<_>, _>>()
            .map(|projects| ServeOutput::Status { projects }),
        ServeCommand::Quit => return None,
    };

    Some(result.unwrap_or_else(|e| ServeOutput::Error {
        message: e.to_string(),
    }))
}

async fn write_line<W: AsyncWrite + Unpin>(
    output: &mut W,
    value: &ServeOutput,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}
