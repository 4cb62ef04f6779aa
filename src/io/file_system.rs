//! File system abstraction layer
//!
//! Provides trait-based abstractions for the few file system operations the
//! compilation database pipeline needs, enabling dependency injection and
//! testing of symlink-sensitive lookups and pathname expansion without
//! touching the real disk.

use std::path::{Path, PathBuf};

// ============================================================================
// File System Trait
// ============================================================================

/// Trait for file system operations
///
/// The parser reads the description file and expands glob words through this
/// trait, and the metadata index uses it to canonicalize editor-facing paths
/// that may traverse symlinks.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystemTrait: Clone + Send + Sync {
    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if a path names a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Read file contents as bytes
    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error>;

    /// Resolve symlinks and normalize the path
    fn canonicalize(&self, path: &Path) -> Result<PathBuf, std::io::Error>;

    /// Paths matching a shell glob pattern, sorted; an invalid pattern matches nothing
    fn glob(&self, pattern: &str) -> Vec<PathBuf>;
}

// ============================================================================
// Real File System Implementation
// ============================================================================

/// Real file system implementation using std::fs
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystemTrait for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        std::fs::read(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::canonicalize(path)
    }

    fn glob(&self, pattern: &str) -> Vec<PathBuf> {
        match glob::glob(pattern) {
            Ok(paths) => {
                let mut matches: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
                matches.sort();
                matches
            }
            Err(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Test File System Implementation
// ============================================================================


#[cfg(test)]
pub use test_filesystem::TestFileSystem;

// MockFileSystemTrait Clone implementation for dependency injection patterns
#[cfg(test)]
impl Clone for MockFileSystemTrait {
    fn clone(&self) -> Self {
        MockFileSystemTrait::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
