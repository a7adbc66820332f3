//! Command Runner
//!
//! Runs a command to completion, buffering its output, and delivers exactly
//! one envelope for it. Nothing is retried.

use std::collections::HashMap;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::CommandLine;
use crate::core::{IntentType, ResultEnvelope};
use crate::dispatch::Dispatcher;
use crate::kernel::OutputTransform;

/// What to do when a command runs but exits non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitCodePolicy {
    /// Report a non-zero exit as an error envelope
    #[default]
    Report,
    /// Only spawn failures are errors; output is delivered whatever the exit code
    Ignore,
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    /// Captured stdout
    pub text: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code if the process was not killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Command runner errors
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Binary '{0}' not found. Install it or add to PATH.")]
    BinaryNotFound(String),

    #[error("Failed to launch process: {0}")]
    LaunchFailed(String),

    #[error("Command failed with exit code {code}{}", stderr_suffix(.stderr))]
    NonZeroExit { code: i32, stderr: String },

    #[error("Command terminated by signal{}", stderr_suffix(.stderr))]
    Terminated { stderr: String },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

impl CommandError {
    fn from_spawn(command: &CommandLine, err: std::io::Error) -> Self {
        match (command, err.kind()) {
            (CommandLine::Argv(spec), std::io::ErrorKind::NotFound) => {
                CommandError::BinaryNotFound(spec.program.clone())
            }
            _ => CommandError::LaunchFailed(err.to_string()),
        }
    }
}

/// Runner for run-to-completion commands
#[derive(Clone)]
pub struct CommandRunner {
    dispatcher: Dispatcher,
    exit_code_policy: ExitCodePolicy,
    /// Environment variables to add
    env_additions: HashMap<String, String>,
}

impl CommandRunner {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            exit_code_policy: ExitCodePolicy::default(),
            env_additions: HashMap::new(),
        }
    }

    pub fn with_exit_code_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.exit_code_policy = policy;
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_additions.insert(key.into(), value.into());
        self
    }

    /// Run a command and capture its output
    pub async fn execute(&self, command: &CommandLine) -> Result<CommandResult, CommandError> {
        let mut cmd = command.to_command();
        cmd.envs(&self.env_additions);
        cmd.stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .map_err(|e| CommandError::from_spawn(command, e))?;

        Ok(CommandResult {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    /// Apply the exit code policy to a finished command
    pub fn check_exit(&self, result: CommandResult) -> Result<CommandResult, CommandError> {
        if self.exit_code_policy == ExitCodePolicy::Ignore || result.success() {
            return Ok(result);
        }

        match result.exit_code {
            Some(code) => Err(CommandError::NonZeroExit {
                code,
                stderr: result.stderr,
            }),
            None => Err(CommandError::Terminated {
                stderr: result.stderr,
            }),
        }
    }

    /// Run `command` in the background and deliver one envelope for it.
    ///
    /// Returns `None` without doing anything when the request id or the command
    /// is empty. With `capture_output` off the process is fire-and-forget and
    /// no envelope is ever sent.
    pub fn run(
        &self,
        request_id: &str,
        intent: IntentType,
        command: CommandLine,
        transform: OutputTransform,
        capture_output: bool,
    ) -> Option<JoinHandle<()>> {
        if request_id.is_empty() || command.is_empty() {
            tracing::debug!("Skipping {} request with empty id or command", intent);
            return None;
        }

        if !capture_output {
            return Some(self.spawn_uncaptured(request_id.to_string(), command));
        }

        tracing::debug!(request_id, "Running: {}", command);
        let runner = self.clone();
        let request_id = request_id.to_string();

        Some(tokio::spawn(async move {
            let outcome = match runner.execute(&command).await {
                Ok(result) => runner.check_exit(result),
                Err(e) => Err(e),
            };

            let envelope = match outcome {
                Ok(result) => ResultEnvelope::ok(&request_id, intent, transform.apply(&result.text)),
                Err(e) => {
                    tracing::warn!(request_id = %request_id, "{} failed: {}", intent, e);
                    ResultEnvelope::error(&request_id, intent, e.to_string())
                }
            };

            runner.dispatcher.deliver(&envelope).await;
        }))
    }

    fn spawn_uncaptured(&self, request_id: String, command: CommandLine) -> JoinHandle<()> {
        let mut cmd = command.to_command();
        cmd.envs(&self.env_additions);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        tokio::spawn(async move {
            match cmd.status().await {
                Ok(status) => {
                    tracing::debug!(request_id = %request_id, "Uncaptured command finished: {}", status)
                }
                Err(e) => {
                    tracing::warn!(request_id = %request_id, "Uncaptured command failed to start: {}", e)
                }
            }
        })
    }
}
