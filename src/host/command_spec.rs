//! Command construction
//!
//! Arguments are kept as discrete argv elements so values such as an image name
//! or container id can never be reinterpreted by a shell. Shell text is only
//! accepted through [`CommandLine::Shell`], the raw-command escape hatch.

use std::fmt;
use std::path::Path;

use tokio::process::Command;

/// Program plus argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Start a command for a binary on disk
    pub fn for_binary(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A command for the run-to-completion path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Free-form text interpreted by the platform shell
    Shell(String),
    Argv(CommandSpec),
}

impl CommandLine {
    /// Only a zero-length command is empty; whitespace is handed to the shell as is
    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Shell(text) => text.is_empty(),
            CommandLine::Argv(spec) => spec.is_empty(),
        }
    }

    pub fn to_command(&self) -> Command {
        match self {
            CommandLine::Shell(text) => shell_command(text),
            CommandLine::Argv(spec) => spec.to_command(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Shell(text) => f.write_str(text),
            CommandLine::Argv(spec) => spec.fmt(f),
        }
    }
}

impl From<CommandSpec> for CommandLine {
    fn from(spec: CommandSpec) -> Self {
        CommandLine::Argv(spec)
    }
}

#[cfg(unix)]
fn shell_command(text: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(text);
    cmd
}

#[cfg(windows)]
fn shell_command(text: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(text);
    cmd
}
