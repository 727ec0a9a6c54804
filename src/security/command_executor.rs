//! SafeCommandExecutor: whitelisted container engine invocation
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only container engine binaries can execute
//! - **Injection prevention**: Uses `tokio::process::Command`, never a shell
//! - **Secret transport**: Secrets are written to stdin, never to argv
//! - **Working directory validation**: Validates existence before execution
//! - **Timeout control**: Hanging processes are killed after the timeout
//!
//! # Example
//!
//! ```rust,no_run
//! use image_publisher::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), image_publisher::CommandError> {
//! let mut executor = SafeCommandExecutor::new(std::env::temp_dir())?;
//! executor.set_timeout(Duration::from_secs(30));
//!
//! let output = executor.execute("docker", &["version"]).await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Allowed commands whitelist for security.
const ALLOWED_COMMANDS: &[&str] = &["docker", "podman"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command execution failed (e.g., binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty line of stderr, falling back to stdout
    ///
    /// Engines print the actionable part of an error last.
    pub fn summary(&self) -> String {
        [&self.stderr, &self.stdout]
            .iter()
            .find_map(|stream| stream.lines().rev().map(str::trim).find(|l| !l.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    /// Working directory where commands will be executed
    working_dir: PathBuf,
    /// Optional timeout for command execution
    timeout: Option<Duration>,
}

impl SafeCommandExecutor {
    /// Create a new SafeCommandExecutor with working directory validation.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidWorkingDirectory` if the directory does not exist.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
        })
    }

    /// Set command execution timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Execute a whitelisted command
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        self.run(command, args, &[], None).await
    }

    /// Execute a whitelisted command with extra environment variables
    pub async fn execute_with_env(
        &self,
        command: &str,
        args: &[&str],
        envs: &[(&str, &OsStr)],
    ) -> Result<CommandOutput, CommandError> {
        self.run(command, args, envs, None).await
    }

    /// Execute a whitelisted command, writing `secret` to its stdin
    pub async fn execute_with_stdin(
        &self,
        command: &str,
        args: &[&str],
        envs: &[(&str, &OsStr)],
        secret: &SecretString,
    ) -> Result<CommandOutput, CommandError> {
        self.run(command, args, envs, Some(secret)).await
    }

    async fn run(
        &self,
        command: &str,
        args: &[&str],
        envs: &[(&str, &OsStr)],
        stdin: Option<&SecretString>,
    ) -> Result<CommandOutput, CommandError> {
        if !ALLOWED_COMMANDS.contains(&command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        debug!(command, args = ?args, envs = ?envs, "Executing command");

        let mut child = Command::new(command)
            .args(args)
            .envs(envs.iter().copied())
            .current_dir(&self.working_dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", command, e)))?;

        if let Some(secret) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(secret.expose_secret().as_bytes())
                    .await
                    .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
                // Closing stdin signals end of input
                drop(pipe);
            }
        }

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| CommandError::Timeout(timeout))?,
            None => wait.await,
        }
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
