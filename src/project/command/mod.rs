//! Command tokenizer and classifier
//!
//! Turns one recorded compiler invocation into structured per-file metadata:
//! - `shell`: POSIX word expansion (variables, quoting, globbing)
//! - `classifier`: the option state machine producing `FileMetadata`

pub mod classifier;
pub mod shell;

pub use classifier::{classify_arguments, classify_command};
pub use shell::{OverlayVariables, ProcessEnvironment, ShellError, VariableSource};
