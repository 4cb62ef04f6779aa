//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and compilation database
//! fixtures.

use std::path::{Path, PathBuf};

use crate::project::compilation_database::COMPILE_COMMANDS_FILE;

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// the runtime. Output goes through the test writer so it is captured per
    /// test.
    ///
    /// ```bash
    /// RUST_LOG=compdb_meta::project=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Global test logging setup
///
/// Add `setup_test_logging!();` to a test module to initialize logging
/// before any of its tests run.
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// One compilation database record using the `command` form
pub fn compile_entry(file: &str, directory: &str, command: &str) -> serde_json::Value {
    serde_json::json!({
        "file": file,
        "directory": directory,
        "command": command,
    })
}

/// Write `entries` as `compile_commands.json` into `dir` and return its path
pub fn write_compile_commands(dir: &Path, entries: &[serde_json::Value]) -> PathBuf {
    let path = dir.join(COMPILE_COMMANDS_FILE);
    let content = serde_json::to_string_pretty(entries).expect("entries serialize");
    std::fs::write(&path, content).expect("write compile_commands.json");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_compile_commands_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_compile_commands(
            dir.path(),
            &[compile_entry("/ws/a.c", "/ws", "cc -c a.c")],
        );

        assert_eq!(path.file_name().unwrap(), COMPILE_COMMANDS_FILE);
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["file"], "/ws/a.c");
        assert_eq!(parsed[0]["command"], "cc -c a.c");
    }
}
