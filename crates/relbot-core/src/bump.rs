//! Running the external version-bump command.
//!
//! The command (for example `pnpm version-packages`) consumes the pending
//! changesets and rewrites package manifests and changelogs in place. Its
//! output is forwarded to stderr as it runs, keeping stdout free for
//! `--json`. Only the exit status is interpreted.

use std::process::{Command, Stdio};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Default version command.
pub const DEFAULT_VERSION_COMMAND: &str = "pnpm version-packages";

/// Errors from the version-bump step.
#[derive(Error, Debug)]
pub enum BumpError {
    /// The configured command is empty.
    #[error("version command is empty")]
    EmptyCommand,

    /// The command could not be started or exited non-zero.
    #[error("version command `{tool}` failed: {message}")]
    ToolFailed {
        /// The full command line.
        tool: String,
        /// Spawn error or exit status.
        message: String,
    },
}

/// Result alias for bump operations.
pub type BumpResult<T> = Result<T, BumpError>;

/// Applies pending changesets to the working tree.
///
/// Implementations must be deterministic: the same changesets and starting
/// manifests always produce the same manifests and changelog.
pub trait VersionBumper {
    /// Bump versions in the repository rooted at `root`.
    fn bump(&mut self, root: &Utf8Path) -> BumpResult<()>;
}

impl<T: VersionBumper + ?Sized> VersionBumper for &mut T {
    fn bump(&mut self, root: &Utf8Path) -> BumpResult<()> {
        (**self).bump(root)
    }
}

/// [`VersionBumper`] that runs a command line in the repository root.
///
/// The command is split on whitespace; no shell is involved.
#[derive(Debug, Clone)]
pub struct CommandBumper {
    command: String,
}

impl CommandBumper {
    /// Bumper for `command`, e.g. `"pnpm version-packages"`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The command line that will be run.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The program name, i.e. the first word of the command.
    pub fn program(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }
}

impl VersionBumper for CommandBumper {
    #[instrument(skip(self), fields(command = %self.command))]
    fn bump(&mut self, root: &Utf8Path) -> BumpResult<()> {
        let parts: Vec<&str> = self.command.split_whitespace().collect();
        let Some((bin, args)) = parts.split_first() else {
            return Err(BumpError::EmptyCommand);
        };

        debug!(%bin, ?args, "running version command");

        let status = Command::new(bin)
            .args(args)
            .current_dir(root.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| BumpError::ToolFailed {
                tool: self.command.clone(),
                message: format!("failed to execute: {e}"),
            })?;

        if !status.success() {
            let message = match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(BumpError::ToolFailed {
                tool: self.command.clone(),
                message,
            });
        }

        info!("version command succeeded");
        Ok(())
    }
}
