use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::project::compilation_database::COMPILE_COMMANDS_FILE;

/// Environment variable overriding the compilation database location
pub const COMMANDS_FILE_ENV: &str = "COMPDB_COMMANDS_FILE";

/// Handle identifying one attached project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a project lives and where its compilation database is expected
///
/// The conventional layout is a colcon workspace: the project root is the
/// workspace's `src` folder and the merged database sits in the sibling
/// `build` folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayout {
    /// Root directory of the project as the host sees it
    pub project_root_path: PathBuf,

    /// Path to the compilation database (compile_commands.json)
    pub commands_file_path: PathBuf,
}

impl ProjectLayout {
    /// Layout with the database at `<root>/../build/compile_commands.json`
    pub fn conventional(project_root_path: PathBuf) -> Self {
        let commands_file_path = project_root_path
            .join("..")
            .join("build")
            .join(COMPILE_COMMANDS_FILE)
            .clean();
        Self {
            project_root_path,
            commands_file_path,
        }
    }

    /// Use an explicit database path; relative paths are taken from the project root
    pub fn with_commands_file(mut self, commands_file: impl AsRef<Path>) -> Self {
        let commands_file = commands_file.as_ref();
        self.commands_file_path = if commands_file.is_absolute() {
            commands_file.clean()
        } else {
            self.project_root_path.join(commands_file).clean()
        };
        self
    }

    /// Resolve the layout with priority: CLI argument > environment value > convention
    pub fn resolve(
        project_root_path: PathBuf,
        cli_override: Option<PathBuf>,
        env_override: Option<String>,
    ) -> Self {
        let layout = Self::conventional(project_root_path);
        match cli_override.or_else(|| env_override.filter(|s| !s.is_empty()).map(PathBuf::from)) {
            Some(commands_file) => layout.with_commands_file(commands_file),
            None => layout,
        }
    }

    /// Resolve the layout reading the override from `COMPDB_COMMANDS_FILE`
    pub fn from_env(project_root_path: PathBuf, cli_override: Option<PathBuf>) -> Self {
        Self::resolve(
            project_root_path,
            cli_override,
            std::env::var(COMMANDS_FILE_ENV).ok(),
        )
    }
}
