//! Classification of compiler arguments into per-file metadata
//!
//! A small state machine walks the argument words (skipping the executable)
//! and sorts each one into includes, framework directories, defines, language
//! or opaque pass-through flags. Options whose value lives in the following
//! word park the machine in a pending state until that word arrives.

use path_clean::PathClean;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::shell::{ShellError, VariableSource, expand_words};
use crate::io::file_system::FileSystemTrait;
use crate::project::metadata::FileMetadata;

/// Options that carry no metadata and take no value
const DISCARDED_FLAGS: &[&str] = &["-c", "-MD", "-MMD", "-MP"];

/// Options whose following word is an output path
const OUTPUT_FLAGS: &[&str] = &["-o", "-MF", "-MT", "-MQ"];

/// Include-path options, longest prefixes first so `-isystem` wins over `-I`
const INCLUDE_PREFIXES: &[&str] = &["-isystem", "-idirafter", "-iquote", "-I"];

/// Framework-path options
const FRAMEWORK_PREFIXES: &[&str] = &["-iframework", "-F"];

/// What the next word will be consumed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Include,
    Framework,
    Define,
    Undefine,
    Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    Value(Pending),
    Ignore,
}

/// Turns compiler argument words into a [`FileMetadata`]
///
/// Relative paths are resolved against the working directory recorded with
/// the command, never against the process's current directory.
pub struct CommandClassifier<'a> {
    working_dir: &'a Path,
    metadata: FileMetadata,
    state: State,
}

impl<'a> CommandClassifier<'a> {
    pub fn new(working_dir: &'a Path) -> Self {
        Self {
            working_dir,
            metadata: FileMetadata::default(),
            state: State::Default,
        }
    }

    /// Classify a full argument vector; word 0 is the executable and is skipped
    pub fn classify<S: AsRef<str>>(mut self, arguments: &[S]) -> FileMetadata {
        for word in arguments.iter().skip(1) {
            self.feed(word.as_ref());
        }
        if self.state != State::Default {
            trace!("Command ended while waiting for a value: {:?}", self.state);
        }
        self.metadata
    }

    fn feed(&mut self, word: &str) {
        self.state = match self.state {
            State::Default => self.classify_option(word),
            State::Value(pending) => {
                self.apply(pending, word);
                State::Default
            }
            State::Ignore => State::Default,
        };
    }

    fn classify_option(&mut self, word: &str) -> State {
        if !word.starts_with('-') {
            // Positional arguments (the source file) carry no metadata; the
            // file identity comes from the database entry itself.
            return State::Default;
        }
        if DISCARDED_FLAGS.contains(&word) {
            return State::Default;
        }
        if OUTPUT_FLAGS.contains(&word) {
            return State::Ignore;
        }

        if let Some(rest) = strip_any(word, INCLUDE_PREFIXES) {
            return self.inline_or_pending(Pending::Include, rest);
        }
        if let Some(rest) = strip_any(word, FRAMEWORK_PREFIXES) {
            return self.inline_or_pending(Pending::Framework, rest);
        }
        if let Some(rest) = word.strip_prefix("-D") {
            return self.inline_or_pending(Pending::Define, rest);
        }
        if let Some(rest) = word.strip_prefix("-U") {
            return self.inline_or_pending(Pending::Undefine, rest);
        }
        if word == "-x" {
            return State::Value(Pending::Language);
        }

        self.add_flag(word);
        State::Default
    }

    fn inline_or_pending(&mut self, pending: Pending, inline: &str) -> State {
        if inline.is_empty() {
            State::Value(pending)
        } else {
            self.apply(pending, inline);
            State::Default
        }
    }

    fn apply(&mut self, pending: Pending, value: &str) {
        match pending {
            Pending::Include => {
                if let Some(path) = self.resolve_path(value) {
                    self.metadata.includes.push(path);
                }
            }
            Pending::Framework => {
                if let Some(path) = self.resolve_path(value) {
                    self.metadata.framework_directories.push(path);
                }
            }
            Pending::Define => self.add_define(value),
            Pending::Undefine => {
                if self.metadata.defines.remove(value).is_some() {
                    trace!("Undefined macro {}", value);
                }
            }
            Pending::Language => self.metadata.language = value.to_string(),
        }
    }

    fn add_define(&mut self, definition: &str) {
        let (name, value) = match definition.split_once('=') {
            Some((name, value)) => (name, value),
            None => (definition, ""),
        };
        if name.is_empty() {
            trace!("Ignoring define without a name: {:?}", definition);
            return;
        }
        self.metadata
            .defines
            .insert(name.to_string(), value.to_string());
    }

    fn add_flag(&mut self, flag: &str) {
        if !self.metadata.compile_flags.is_empty() {
            self.metadata.compile_flags.push(' ');
        }
        self.metadata.compile_flags.push_str(flag);
    }

    fn resolve_path(&self, raw: &str) -> Option<PathBuf> {
        if raw.is_empty() {
            return None;
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.working_dir.join(path).clean())
        }
    }
}

fn strip_any<'w>(word: &'w str, prefixes: &[&str]) -> Option<&'w str> {
    prefixes.iter().find_map(|prefix| word.strip_prefix(prefix))
}

/// Classify a pre-split argument vector
pub fn classify_arguments<S: AsRef<str>>(arguments: &[S], working_dir: &Path) -> FileMetadata {
    CommandClassifier::new(working_dir).classify(arguments)
}

/// Expand a recorded shell command and classify the resulting words
pub fn classify_command<F: FileSystemTrait>(
    command: &str,
    working_dir: &Path,
    variables: &dyn VariableSource,
    filesystem: &F,
) -> Result<FileMetadata, ShellError> {
    let words = expand_words(command, working_dir, variables, filesystem)?;
    Ok(classify_arguments(&words, working_dir))
}
