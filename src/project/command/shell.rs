//! POSIX-style word expansion for recorded compiler invocations
//!
//! Build tools record commands shell-quoted, sometimes with variable references
//! left in. Expansion follows `wordexp` with `WRDE_NOCMD` and no positional
//! parameters, in three passes:
//! 1. a quote-aware scan that substitutes `$NAME` / `${NAME}` and the special
//!    parameters, rejects command substitution and the unquoted characters
//!    `| & ; < > ( ) { }` and newline, and detects unbalanced quoting
//! 2. word splitting and quote removal via `shlex`
//! 3. pathname expansion of words with unquoted glob metacharacters, relative
//!    to the command's working directory and read through [`FileSystemTrait`]

use std::collections::HashMap;
use std::path::Path;
use tracing::trace;

use crate::io::file_system::FileSystemTrait;

/// Errors produced while expanding a command string into words
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShellError {
    #[error("Unbalanced {quote} quote in command")]
    UnbalancedQuote { quote: char },

    #[error("Command substitution is not allowed")]
    CommandSubstitution,

    #[error("Unquoted shell special character {0:?} in command")]
    BadCharacter(char),

    #[error("Bad variable substitution: ${{{name}}}")]
    BadSubstitution { name: String },

    #[error("Command could not be split into words")]
    Split,
}

/// Source of values for `$NAME` references in recorded commands
pub trait VariableSource: Send + Sync {
    /// Look up a variable; unset variables expand to the empty string
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Variables taken from the current process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl VariableSource for ProcessEnvironment {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl VariableSource for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Explicit values taking precedence over another source
#[derive(Debug, Clone)]
pub struct OverlayVariables<S: VariableSource> {
    overrides: HashMap<String, String>,
    fallback: S,
}

impl<S: VariableSource> OverlayVariables<S> {
    pub fn new(overrides: HashMap<String, String>, fallback: S) -> Self {
        Self {
            overrides,
            fallback,
        }
    }
}

impl<S: VariableSource> VariableSource for OverlayVariables<S> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| self.fallback.lookup(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Result of the substitution pass
struct Substituted {
    text: String,
    /// Cleared when any glob metacharacter was quoted or escaped
    globbing: bool,
}

/// Expand a recorded command into its argument words
pub fn expand_words<F: FileSystemTrait>(
    command: &str,
    working_dir: &Path,
    variables: &dyn VariableSource,
    filesystem: &F,
) -> Result<Vec<String>, ShellError> {
    let substituted = substitute_variables(command, variables)?;
    let words = shlex::split(&substituted.text).ok_or(ShellError::Split)?;

    if !substituted.globbing {
        return Ok(words);
    }

    Ok(words
        .into_iter()
        .flat_map(|word| {
            if word.chars().any(is_glob_char) {
                expand_pattern(word, working_dir, filesystem)
            } else {
                vec![word]
            }
        })
        .collect())
}

fn is_glob_char(ch: char) -> bool {
    matches!(ch, '*' | '?' | '[')
}

fn is_name_start(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphabetic()
}

fn is_name_char(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphanumeric()
}

/// Value of a special parameter, `None` when `ch` does not name one
///
/// No positional parameters are ever set, and no command has run yet.
fn special_parameter(ch: char) -> Option<String> {
    match ch {
        '0'..='9' | '@' | '*' | '!' | '-' => Some(String::new()),
        '#' | '?' => Some("0".to_string()),
        '$' => Some(std::process::id().to_string()),
        _ => None,
    }
}

fn substitute_variables(
    command: &str,
    variables: &dyn VariableSource,
) -> Result<Substituted, ShellError> {
    let mut text = String::with_capacity(command.len());
    let mut quote = Quote::None;
    let mut globbing = true;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Quote::Single, '\'') => {
                quote = Quote::None;
                text.push(ch);
            }
            (Quote::Single, _) => {
                globbing &= !is_glob_char(ch);
                text.push(ch);
            }
            (_, '\\') => {
                text.push(ch);
                // A trailing backslash is left for the splitter to reject
                if let Some(next) = chars.next() {
                    globbing &= !is_glob_char(next);
                    text.push(next);
                }
            }
            (Quote::None, '\'') => {
                quote = Quote::Single;
                text.push(ch);
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                text.push(ch);
            }
            (Quote::Double, '"') => {
                quote = Quote::None;
                text.push(ch);
            }
            (_, '`') => return Err(ShellError::CommandSubstitution),
            (_, '$') => match chars.peek().copied() {
                Some('(') => return Err(ShellError::CommandSubstitution),
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(ShellError::BadSubstitution { name }),
                        }
                    }
                    let value = if name.chars().next().is_some_and(is_name_start)
                        && name.chars().all(is_name_char)
                    {
                        lookup(variables, &name)
                    } else if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
                        String::new()
                    } else {
                        let mut single = name.chars();
                        match (single.next().and_then(special_parameter), single.next()) {
                            (Some(value), None) => value,
                            _ => return Err(ShellError::BadSubstitution { name }),
                        }
                    };
                    push_value(&mut text, &value, quote);
                }
                Some(c) if is_name_start(c) => {
                    let mut name = String::new();
                    while let Some(c) = chars.peek().copied() {
                        if !is_name_char(c) {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    push_value(&mut text, &lookup(variables, &name), quote);
                }
                Some(c) => match special_parameter(c) {
                    Some(value) => {
                        chars.next();
                        push_value(&mut text, &value, quote);
                    }
                    None => text.push('$'),
                },
                None => text.push('$'),
            },
            (Quote::Double, _) => {
                globbing &= !is_glob_char(ch);
                text.push(ch);
            }
            (Quote::None, '|' | '&' | ';' | '<' | '>' | '(' | ')' | '{' | '}' | '\n') => {
                return Err(ShellError::BadCharacter(ch));
            }
            (Quote::None, _) => text.push(ch),
        }
    }

    match quote {
        Quote::None => Ok(Substituted { text, globbing }),
        Quote::Single => Err(ShellError::UnbalancedQuote { quote: '\'' }),
        Quote::Double => Err(ShellError::UnbalancedQuote { quote: '"' }),
    }
}

fn lookup(variables: &dyn VariableSource, name: &str) -> String {
    let value = variables.lookup(name).unwrap_or_default();
    trace!("Expanded ${} to {:?}", name, value);
    value
}

/// Insert an expanded value so that the splitter sees its characters literally.
/// Unquoted whitespace is kept as-is so the value undergoes field splitting.
fn push_value(text: &mut String, value: &str, quote: Quote) {
    for ch in value.chars() {
        let escape = match quote {
            Quote::Double => matches!(ch, '"' | '\\'),
            _ => matches!(ch, '"' | '\'' | '\\'),
        };
        if escape {
            text.push('\\');
        }
        text.push(ch);
    }
}

/// Matches of `word` through `filesystem`, or the word itself when nothing matches
fn expand_pattern<F: FileSystemTrait>(word: String, working_dir: &Path, filesystem: &F) -> Vec<String> {
    let relative = !Path::new(&word).is_absolute();
    let pattern = if relative {
        format!(
            "{}/{}",
            glob::Pattern::escape(&working_dir.to_string_lossy()),
            word
        )
    } else {
        word.clone()
    };

    if let Err(e) = glob::Pattern::new(&pattern) {
        trace!("Not a valid glob pattern {:?}: {}", word, e);
        return vec![word];
    }

    let mut matches: Vec<String> = filesystem
        .glob(&pattern)
        .into_iter()
        .map(|path| {
            let path = if relative {
                path.strip_prefix(working_dir)
                    .map(Path::to_path_buf)
                    .unwrap_or(path)
            } else {
                path
            };
            path.to_string_lossy().into_owned()
        })
        .collect();

    if matches.is_empty() {
        return vec![word];
    }
    matches.sort();
    matches
}
