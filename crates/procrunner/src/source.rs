//! Commands to supervise and the sources they come from.
//!
//! The supervisor never discovers commands itself; it is handed the result
//! of a [`CommandSource`]. Two sources ship with the crate: an in-memory list
//! and a command file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors produced while loading commands.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Command has no program")]
    EmptyCommand,

    #[error("Failed to read command file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse command file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Empty command in {path} (entry {entry})")]
    EmptyEntry { path: PathBuf, entry: usize },
}

/// One external program invocation: program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    tokens: Vec<String>,
}

impl Command {
    pub fn new<I, S>(tokens: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(SourceError::EmptyCommand);
        }
        Ok(Self { tokens })
    }

    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Provider of the ordered command list for one run.
pub trait CommandSource {
    fn commands(&self) -> Result<Vec<Command>, SourceError>;
}

/// A fixed, caller-supplied list.
#[derive(Debug, Clone, Default)]
pub struct StaticCommands(pub Vec<Command>);

impl CommandSource for StaticCommands {
    fn commands(&self) -> Result<Vec<Command>, SourceError> {
        Ok(self.0.clone())
    }
}

/// Commands produced by a closure.
pub struct FnSource<F>(pub F);

impl<F> CommandSource for FnSource<F>
where
    F: Fn() -> Result<Vec<Command>, SourceError>,
{
    fn commands(&self) -> Result<Vec<Command>, SourceError> {
        (self.0)()
    }
}

/// Commands read from a file.
///
/// Files ending in `.toml` hold `[[command]]` tables with an `args` array.
/// Anything else is plain text: one command per line, tokens separated by
/// whitespace, blank lines and `#` comments ignored.
#[derive(Debug, Clone)]
pub struct CommandFile {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CommandFileSpec {
    #[serde(default)]
    command: Vec<CommandEntry>,
}

#[derive(Debug, Deserialize)]
struct CommandEntry {
    args: Vec<String>,
}

impl CommandFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_toml(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
    }
}

impl CommandSource for CommandFile {
    fn commands(&self) -> Result<Vec<Command>, SourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        if self.is_toml() {
            parse_toml(&self.path, &content)
        } else {
            Ok(parse_plain(&content))
        }
    }
}

fn parse_toml(path: &Path, content: &str) -> Result<Vec<Command>, SourceError> {
    let spec: CommandFileSpec = toml::from_str(content).map_err(|source| SourceError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    spec.command
        .into_iter()
        .enumerate()
        .map(|(entry, c)| {
            Command::new(c.args).map_err(|_| SourceError::EmptyEntry {
                path: path.to_path_buf(),
                entry: entry + 1,
            })
        })
        .collect()
}

/// Parse the plain-text command format.
pub fn parse_plain(content: &str) -> Vec<Command> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| Command::new(line.split_whitespace()).ok())
        .collect()
}
