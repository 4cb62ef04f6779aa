//! Per-file compilation metadata and parse snapshots
//!
//! A `CompilationSnapshot` is produced wholesale by one parse of the
//! compilation database. Besides the file -> metadata table it carries a
//! derived folder -> representative-file table used to approximate metadata
//! for files the database does not list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::project::compilation_database::{CompilationDatabaseError, EntryError};

/// Build context derived from one compiled source file's command line
///
/// Equality is field-wise; the incremental updater relies on it to decide
/// whether a re-import changed anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Include directories in command-line order (duplicates kept)
    pub includes: Vec<PathBuf>,
    /// Framework search directories in command-line order
    pub framework_directories: Vec<PathBuf>,
    /// Macro name -> value; valueless defines map to an empty string
    pub defines: BTreeMap<String, String>,
    /// Unclassified pass-through flags, space separated
    pub compile_flags: String,
    /// Free-form language tag, empty when unknown
    pub language: String,
}

impl FileMetadata {
    /// True when no include, framework, define or flag information is present
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
            && self.framework_directories.is_empty()
            && self.compile_flags.is_empty()
            && self.defines.is_empty()
    }
}

/// An entry the parser had to skip, kept for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    /// Position of the entry in the database array
    pub index: usize,
    /// File named by the entry, when it had one
    pub file: Option<PathBuf>,
    pub reason: EntryError,
}

/// One complete parse result
#[derive(Debug, Clone, Default)]
pub struct CompilationSnapshot {
    files: BTreeMap<PathBuf, FileMetadata>,
    folder_fallback: BTreeMap<PathBuf, PathBuf>,
    failure: Option<CompilationDatabaseError>,
    skipped: Vec<SkippedEntry>,
}

impl CompilationSnapshot {
    /// Create a valid snapshot and derive its folder fallback table
    pub fn from_files(files: BTreeMap<PathBuf, FileMetadata>, skipped: Vec<SkippedEntry>) -> Self {
        let mut snapshot = Self {
            files,
            folder_fallback: BTreeMap::new(),
            failure: None,
            skipped,
        };
        snapshot.rebuild_folder_fallback();
        snapshot
    }

    /// Create an unusable snapshot recording why the parse failed
    pub fn invalid(failure: CompilationDatabaseError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&CompilationDatabaseError> {
        self.failure.as_ref()
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, FileMetadata> {
        &self.files
    }

    pub fn folder_fallback(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.folder_fallback
    }

    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Exact metadata for a file path
    pub fn file(&self, path: &Path) -> Option<&FileMetadata> {
        self.files.get(path)
    }

    /// Metadata of the representative file recorded for a directory
    pub fn file_for_folder(&self, folder: &Path) -> Option<&FileMetadata> {
        self.folder_fallback
            .get(folder)
            .and_then(|file| self.files.get(file))
    }

    /// Recompute the folder -> representative file table from `files`
    ///
    /// Every file's parent directory maps to the first file (in path order)
    /// found in it. Each such directory then propagates its representative to
    /// all ancestors, stopping at the first ancestor that is already mapped.
    pub fn rebuild_folder_fallback(&mut self) {
        let mut fallback: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

        for file in self.files.keys() {
            if let Some(folder) = file.parent() {
                fallback
                    .entry(folder.to_path_buf())
                    .or_insert_with(|| file.clone());
            }
        }

        let direct: Vec<(PathBuf, PathBuf)> = fallback
            .iter()
            .map(|(folder, file)| (folder.clone(), file.clone()))
            .collect();

        for (folder, file) in direct {
            let mut current = folder.as_path();
            while let Some(parent) = current.parent() {
                if fallback.contains_key(parent) {
                    break;
                }
                fallback.insert(parent.to_path_buf(), file.clone());
                current = parent;
            }
        }

        trace!(
            "Folder fallback rebuilt: {} folders for {} files",
            fallback.len(),
            self.files.len()
        );
        self.folder_fallback = fallback;
    }

    /// Merge a newer snapshot's entries into this one
    ///
    /// New paths are inserted and differing values overwritten; paths missing
    /// from `incoming` are retained. Returns whether anything changed. The
    /// folder fallback table is rebuilt only when something did.
    pub fn merge_from(&mut self, incoming: CompilationSnapshot) -> bool {
        let mut inserted = 0usize;
        let mut updated = 0usize;

        for (path, metadata) in incoming.files {
            match self.files.get_mut(&path) {
                None => {
                    self.files.insert(path, metadata);
                    inserted += 1;
                }
                Some(existing) if *existing != metadata => {
                    *existing = metadata;
                    updated += 1;
                }
                Some(_) => {}
            }
        }
        self.skipped = incoming.skipped;

        let changed = inserted > 0 || updated > 0;
        if changed {
            self.rebuild_folder_fallback();
        }
        debug!(
            "Merged snapshot: {} inserted, {} updated, {} total entries",
            inserted,
            updated,
            self.files.len()
        );
        changed
    }
}
