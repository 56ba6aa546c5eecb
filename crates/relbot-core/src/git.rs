//! Git operations for the release branch.
//!
//! Shells out to `git` for all operations. This ensures we inherit the
//! runner's credentials, hooks, and other configuration.
//!
//! The pipeline talks to git through the [`SourceControl`] trait so its
//! branch handling can be exercised against an in-memory fake.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Default remote that the release branch is pushed to.
pub const DEFAULT_REMOTE: &str = "origin";

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to execute the `git` command.
    #[error("failed to run git: {0}")]
    Exec(#[from] std::io::Error),

    /// `git` returned a non-zero exit code.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed (e.g., "push").
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,

    /// The working tree has no changes to commit.
    #[error("nothing to commit: the version command left the working tree unchanged")]
    NothingToCommit,
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Committer identity configured before the release commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// `user.name`
    pub name: String,
    /// `user.email`
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "github-actions[bot]".into(),
            email: "github-actions[bot]@users.noreply.github.com".into(),
        }
    }
}

/// The source-control operations the release pipeline depends on.
///
/// Every operation is fatal on failure; implementations must not retry.
pub trait SourceControl {
    /// Configure the committer identity for subsequent commits.
    fn setup_identity(&mut self, identity: &Identity) -> GitResult<()>;

    /// Switch to `branch`, creating it locally if needed. A branch that
    /// exists only on the remote is checked out as a tracking branch.
    fn checkout(&mut self, branch: &str) -> GitResult<()>;

    /// Hard-reset the current branch, index and working tree to the tip of
    /// `base`, discarding anything local to the current branch.
    fn reset_to_base(&mut self, base: &str) -> GitResult<()>;

    /// Stage every change (including deletions) and commit.
    ///
    /// Returns the short hash of the new commit. An empty commit is an error.
    fn commit_all(&mut self, message: &str) -> GitResult<String>;

    /// Publish the current `HEAD` as `branch` on the remote, replacing its
    /// history unconditionally.
    fn force_push(&mut self, branch: &str) -> GitResult<()>;

    /// What is checked out now: a branch name, or a commit id when detached.
    fn head(&mut self) -> GitResult<String>;

    /// Check out `target` (as returned by [`head`](Self::head)), discarding
    /// uncommitted changes to tracked files.
    fn restore(&mut self, target: &str) -> GitResult<()>;
}

impl<T: SourceControl + ?Sized> SourceControl for &mut T {
    fn setup_identity(&mut self, identity: &Identity) -> GitResult<()> {
        (**self).setup_identity(identity)
    }

    fn checkout(&mut self, branch: &str) -> GitResult<()> {
        (**self).checkout(branch)
    }

    fn reset_to_base(&mut self, base: &str) -> GitResult<()> {
        (**self).reset_to_base(base)
    }

    fn commit_all(&mut self, message: &str) -> GitResult<String> {
        (**self).commit_all(message)
    }

    fn force_push(&mut self, branch: &str) -> GitResult<()> {
        (**self).force_push(branch)
    }

    fn head(&mut self) -> GitResult<String> {
        (**self).head()
    }

    fn restore(&mut self, target: &str) -> GitResult<()> {
        (**self).restore(target)
    }
}

/// [`SourceControl`] backed by the `git` binary, run inside a repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: Utf8PathBuf,
    remote: String,
}

impl GitCli {
    /// Operate on the repository at `root`, pushing to and resetting from `remote`.
    pub fn new(root: impl Into<Utf8PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            remote: remote.into(),
        }
    }

    /// Repository root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn git(&self, args: &[&str]) -> GitResult<String> {
        git_in(&self.root, args)
    }
}

impl SourceControl for GitCli {
    #[instrument(skip(self), fields(root = %self.root))]
    fn setup_identity(&mut self, identity: &Identity) -> GitResult<()> {
        self.git(&["config", "user.name", &identity.name])?;
        self.git(&["config", "user.email", &identity.email])?;
        debug!(name = %identity.name, email = %identity.email, "committer identity set");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    fn checkout(&mut self, branch: &str) -> GitResult<()> {
        // `switch` only takes branches, so a same-named path is never restored
        // instead. It also creates a tracking branch for a remote-only one.
        match self.git(&["switch", branch]) {
            Ok(_) => {
                debug!(%branch, "checked out existing branch");
                Ok(())
            }
            Err(GitError::Command { stderr, .. }) if is_unknown_ref(&stderr) => {
                self.git(&["switch", "--create", branch])?;
                debug!(%branch, "created new branch");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(root = %self.root, remote = %self.remote))]
    fn reset_to_base(&mut self, base: &str) -> GitResult<()> {
        self.git(&["fetch", "--quiet", &self.remote, base])?;
        let target = format!("{}/{base}", self.remote);
        self.git(&["reset", "--hard", &target])?;
        info!(%target, "reset release branch to base");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    fn commit_all(&mut self, message: &str) -> GitResult<String> {
        self.git(&["add", "--all"])?;
        if self.git(&["status", "--porcelain"])?.trim().is_empty() {
            return Err(GitError::NothingToCommit);
        }
        self.git(&["commit", "--message", message])?;
        let hash = self.git(&["rev-parse", "--short", "HEAD"])?.trim().to_string();
        info!(%hash, "created release commit");
        Ok(hash)
    }

    #[instrument(skip(self), fields(root = %self.root, remote = %self.remote))]
    fn force_push(&mut self, branch: &str) -> GitResult<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.git(&["push", "--force", &self.remote, &refspec])?;
        info!(%branch, "force-pushed release branch");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    fn head(&mut self) -> GitResult<String> {
        if let Some(branch) = current_branch(&self.root)? {
            return Ok(branch);
        }
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    fn restore(&mut self, target: &str) -> GitResult<()> {
        self.git(&["checkout", "--force", target, "--"])?;
        info!(%target, "restored starting checkout");
        Ok(())
    }
}

/// Whether `git switch` failed because no branch of that name exists
/// locally or on any remote.
fn is_unknown_ref(stderr: &str) -> bool {
    stderr.contains("invalid reference") || stderr.contains("did not match any")
}

/// Get the current branch name of the repository at `root`.
///
/// Returns `None` if in a detached HEAD state.
#[instrument]
pub fn current_branch(root: &Utf8Path) -> GitResult<Option<String>> {
    let output = git_in(root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    let branch = output.trim().to_string();
    if branch == "HEAD" {
        debug!("detached HEAD");
        Ok(None)
    } else {
        debug!(%branch, "current branch");
        Ok(Some(branch))
    }
}

/// Get the URL of a named remote, or `None` if it isn't configured.
#[instrument]
pub fn remote_url(root: &Utf8Path, remote: &str) -> GitResult<Option<String>> {
    match git_in(root, &["remote", "get-url", remote]) {
        Ok(url) => {
            let url = url.trim().to_string();
            debug!(%remote, %url, "remote URL");
            Ok(Some(url))
        }
        Err(GitError::Command { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse owner and repo from a git remote URL.
///
/// Handles both HTTPS and SSH formats:
/// - `https://github.com/owner/repo.git`
/// - `git@github.com:owner/repo.git`
///
/// Returns `None` if the URL cannot be parsed.
pub fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let path = url.strip_prefix("git@").map_or_else(
        || {
            url.split("//")
                .nth(1)
                .and_then(|after_scheme| after_scheme.split_once('/').map(|(_, path)| path))
        },
        |rest| rest.split_once(':').map(|(_, path)| path),
    )?;

    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.split_once('/')?;

    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }

    Some((owner.to_string(), repo.to_string()))
}

/// Check if `root` is inside a git work tree.
#[instrument]
pub fn is_inside_repo(root: &Utf8Path) -> GitResult<bool> {
    match git_in(root, &["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => Ok(output.trim() == "true"),
        Err(GitError::Command { .. } | GitError::NotARepo) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Run a git command in `root` and return its stdout.
fn git_in(root: &Utf8Path, args: &[&str]) -> GitResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root.as_std_path())
        .output()?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if stderr.contains("not a git repository") {
            return Err(GitError::NotARepo);
        }

        Err(GitError::Command {
            command: args.first().unwrap_or(&"").to_string(),
            stderr,
        })
    }
}
