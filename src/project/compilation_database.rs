use path_clean::PathClean;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::io::file_system::FileSystemTrait;
use crate::project::command::{
    ProcessEnvironment, ShellError, VariableSource, classify_arguments, classify_command,
};
use crate::project::metadata::{CompilationSnapshot, FileMetadata, SkippedEntry};

/// Conventional file name of the compilation database
pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";

/// Reasons a whole compilation database could not be used
///
/// All of these are recoverable: the snapshot is marked invalid and the
/// previously known index, if any, stays untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompilationDatabaseError {
    #[error("Compilation database file not found: {path}")]
    MissingSource { path: PathBuf },
    #[error("Failed to read compilation database file {path}: {error}")]
    ReadError { path: PathBuf, error: String },
    #[error("Compilation database is not a JSON array of entries: {error}")]
    MalformedContainer { error: String },
    #[error("Import was cancelled")]
    Cancelled,
    #[error("Import task failed: {error}")]
    TaskFailed { error: String },
}

/// Reasons a single entry was skipped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntryError {
    #[error("Entry is not a JSON object")]
    NotAnObject,
    #[error("Entry is missing required field '{field}'")]
    MissingField { field: &'static str },
    #[error("Entry has an invalid field: {error}")]
    InvalidField { error: String },
    #[error("Command could not be tokenized: {0}")]
    Tokenize(#[from] ShellError),
}

/// One record of the compilation database as written by the build tool
#[derive(Debug, Deserialize)]
struct RawEntry {
    file: Option<String>,
    directory: Option<String>,
    command: Option<String>,
    arguments: Option<Vec<String>>,
}

/// Parses a compilation database into a [`CompilationSnapshot`]
///
/// Parsing is pure with respect to shared state: it only reads the database
/// file and produces a fresh snapshot, which makes it safe to run on a
/// background worker.
#[derive(Clone)]
pub struct CompilationDatabaseParser<F: FileSystemTrait> {
    filesystem: F,
    variables: Arc<dyn VariableSource>,
}

impl<F: FileSystemTrait> CompilationDatabaseParser<F> {
    /// Create a parser expanding variables from the process environment
    pub fn new(filesystem: F) -> Self {
        Self {
            filesystem,
            variables: Arc::new(ProcessEnvironment),
        }
    }

    /// Use a different source for `$NAME` expansion
    pub fn with_variables(mut self, variables: Arc<dyn VariableSource>) -> Self {
        self.variables = variables;
        self
    }

    /// Parse the database at `path`
    pub fn parse(&self, path: &Path) -> CompilationSnapshot {
        self.parse_cancellable(path, &CancellationToken::new())
    }

    /// Parse the database at `path`, giving up between entries once `cancel` fires
    #[instrument(name = "compilation_database_parse", skip(self, cancel))]
    pub fn parse_cancellable(&self, path: &Path, cancel: &CancellationToken) -> CompilationSnapshot {
        let started = Instant::now();

        let entries = match self.read_entries(path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not import compilation database: {}", e);
                return CompilationSnapshot::invalid(e);
            }
        };
        debug!("Found compilation database {} with {} entries", path.display(), entries.len());

        let database_dir = path.parent().unwrap_or(Path::new("/"));
        let mut files: BTreeMap<PathBuf, FileMetadata> = BTreeMap::new();
        let mut skipped = Vec::new();

        for (index, value) in entries.into_iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Parse of {} cancelled at entry {}", path.display(), index);
                return CompilationSnapshot::invalid(CompilationDatabaseError::Cancelled);
            }

            match self.parse_entry(value, database_dir) {
                Ok((file, metadata)) => {
                    // later entries for the same file win
                    files.insert(file, metadata);
                }
                Err((file, reason)) => {
                    warn!(
                        "Skipping compilation database entry {} ({:?}): {}",
                        index, file, reason
                    );
                    skipped.push(SkippedEntry {
                        index,
                        file,
                        reason,
                    });
                }
            }
        }

        info!(
            "Imported {} files from {} ({} entries skipped)",
            files.len(),
            path.display(),
            skipped.len()
        );
        crate::log_timing!(tracing::Level::DEBUG, "compilation_database_parse", started.elapsed());

        CompilationSnapshot::from_files(files, skipped)
    }

    fn read_entries(&self, path: &Path) -> Result<Vec<serde_json::Value>, CompilationDatabaseError> {
        if !self.filesystem.exists(path) {
            return Err(CompilationDatabaseError::MissingSource {
                path: path.to_path_buf(),
            });
        }

        let bytes = self
            .filesystem
            .read(path)
            .map_err(|e| CompilationDatabaseError::ReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        let document: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            CompilationDatabaseError::MalformedContainer {
                error: e.to_string(),
            }
        })?;

        match document {
            serde_json::Value::Array(entries) => Ok(entries),
            other => Err(CompilationDatabaseError::MalformedContainer {
                error: format!("expected an array, found {}", json_kind(&other)),
            }),
        }
    }

    fn parse_entry(
        &self,
        value: serde_json::Value,
        database_dir: &Path,
    ) -> Result<(PathBuf, FileMetadata), (Option<PathBuf>, EntryError)> {
        if !value.is_object() {
            return Err((None, EntryError::NotAnObject));
        }

        let entry: RawEntry = serde_json::from_value(value).map_err(|e| {
            (
                None,
                EntryError::InvalidField {
                    error: e.to_string(),
                },
            )
        })?;

        let file = entry
            .file
            .ok_or((None, EntryError::MissingField { field: "file" }))?;
        let file_path = PathBuf::from(&file);

        let directory = entry.directory.ok_or((
            Some(file_path.clone()),
            EntryError::MissingField { field: "directory" },
        ))?;
        let directory = absolutize(Path::new(&directory), database_dir);
        let file_path = absolutize(&file_path, &directory);

        let mut metadata = match (entry.command, entry.arguments) {
            (Some(command), _) => {
                classify_command(&command, &directory, self.variables.as_ref(), &self.filesystem)
                    .map_err(|e| (Some(file_path.clone()), EntryError::from(e)))?
            }
            (None, Some(arguments)) => classify_arguments(&arguments, &directory),
            (None, None) => {
                return Err((
                    Some(file_path),
                    EntryError::MissingField { field: "command" },
                ));
            }
        };

        if metadata.language.is_empty() {
            metadata.language = language_for_extension(&file_path).to_string();
        }

        Ok((file_path, metadata))
    }
}

/// Resolve `path` against `base` when relative, then normalize it lexically
fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.clean()
    } else {
        base.join(path).clean()
    }
}

/// Language tag implied by a source file's extension, empty when unknown
pub fn language_for_extension(path: &Path) -> &'static str {
    let extension = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext,
        None => return "",
    };
    match extension {
        "c" => "C",
        "cc" | "cpp" | "cxx" | "c++" | "C" => "C++",
        "m" => "Objective-C",
        "mm" => "Objective-C++",
        "cu" => "CUDA",
        _ => "",
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
