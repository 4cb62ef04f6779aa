//! Live metadata index for one attached project
//!
//! `ProjectIndex` owns at most one `CompilationSnapshot`. The first valid
//! import is adopted wholesale; later imports are merged into it so entries
//! for files untouched by a rebuild are never lost.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::io::file_system::FileSystemTrait;
use crate::project::compilation_database::CompilationDatabaseError;
use crate::project::metadata::{CompilationSnapshot, FileMetadata};

/// Whether a queried project item is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// A path in the host's project tree together with its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectItem {
    pub path: PathBuf,
    pub kind: ItemKind,
}

impl ProjectItem {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::Folder,
        }
    }
}

/// Metadata index of one project
#[derive(Debug, Default)]
pub struct ProjectIndex {
    snapshot: Option<CompilationSnapshot>,
}

impl ProjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, `None` until the first successful import
    pub fn snapshot(&self) -> Option<&CompilationSnapshot> {
        self.snapshot.as_ref()
    }

    /// Number of files with exact metadata
    pub fn file_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, CompilationSnapshot::len)
    }

    /// Apply a freshly parsed snapshot
    ///
    /// Returns `Ok(changed)` when the snapshot was usable. An invalid snapshot
    /// leaves the index untouched and hands back the parse failure.
    pub fn apply(&mut self, incoming: CompilationSnapshot) -> Result<bool, CompilationDatabaseError> {
        if let Some(failure) = incoming.failure() {
            warn!("Keeping previous metadata, import failed: {}", failure);
            return Err(failure.clone());
        }

        match self.snapshot.as_mut() {
            None => {
                debug!("Adopting first snapshot with {} files", incoming.len());
                self.snapshot = Some(incoming);
                Ok(true)
            }
            Some(existing) => Ok(existing.merge_from(incoming)),
        }
    }

    /// Metadata for an item, falling back to the nearest known ancestor folder
    pub fn lookup<F: FileSystemTrait>(&self, item: &ProjectItem, filesystem: &F) -> Option<&FileMetadata> {
        let snapshot = self.snapshot.as_ref()?;

        let folder = match item.kind {
            ItemKind::File => {
                if let Some(metadata) = snapshot.file(&item.path) {
                    return Some(metadata);
                }
                // databases are generated against canonical paths, editor paths may traverse symlinks
                if let Some(canonical) = canonical_alternative(&item.path, filesystem) {
                    if let Some(metadata) = snapshot.file(&canonical) {
                        trace!("Found metadata via canonical path {}", canonical.display());
                        return Some(metadata);
                    }
                }
                item.path.parent()?
            }
            ItemKind::Folder => item.path.as_path(),
        };

        let mut current = Some(folder);
        while let Some(dir) = current {
            if let Some(metadata) = snapshot.file_for_folder(dir) {
                return Some(metadata);
            }
            if let Some(canonical) = canonical_alternative(dir, filesystem) {
                if let Some(metadata) = snapshot.file_for_folder(&canonical) {
                    return Some(metadata);
                }
            }
            current = dir.parent();
        }

        debug!("No metadata found for {}", item.path.display());
        None
    }

    /// Metadata for an item, or empty metadata when nothing is known
    pub fn resolve<F: FileSystemTrait>(&self, item: &ProjectItem, filesystem: &F) -> FileMetadata {
        self.lookup(item, filesystem).cloned().unwrap_or_default()
    }

    /// Whether any file or folder entry applies to the item
    pub fn has_metadata<F: FileSystemTrait>(&self, item: &ProjectItem, filesystem: &F) -> bool {
        self.lookup(item, filesystem).is_some()
    }
}

/// The canonical form of `path`, when it differs from `path`
fn canonical_alternative<F: FileSystemTrait>(path: &Path, filesystem: &F) -> Option<PathBuf> {
    match filesystem.canonicalize(path) {
        Ok(canonical) if canonical != path => Some(canonical),
        _ => None,
    }
}
