//! Pull request operations on GitHub.
//!
//! Shells out to `gh api` so authentication comes from the environment
//! (`GH_TOKEN`/`GITHUB_TOKEN` in CI, the user's `gh auth` session locally).
//! The release pipeline depends only on the [`PullRequestHost`] trait.

use std::fmt;
use std::io::Write;
use std::process::Command;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::git;

/// Environment variable GitHub Actions sets to `owner/repo`.
pub const GITHUB_REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

/// Errors from the code-hosting API.
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Failed to execute `gh`.
    #[error("failed to run gh: {0}")]
    Exec(#[from] std::io::Error),

    /// `gh api` returned a non-zero exit code.
    #[error("gh api {endpoint} failed: {stderr}")]
    Command {
        /// Method and endpoint, e.g. `PATCH repos/o/r/pulls/42`.
        endpoint: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The response was not the expected JSON.
    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        /// Method and endpoint.
        endpoint: String,
        /// Parse error.
        source: serde_json::Error,
    },

    /// The request payload could not be serialized.
    #[error("failed to encode request payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A repository slug was not of the form `owner/repo`.
    #[error("invalid repository `{0}`: expected OWNER/REPO")]
    InvalidSlug(String),

    /// No repository could be determined.
    #[error(
        "could not determine the GitHub repository: set github.repository, \
         GITHUB_REPOSITORY, or an origin remote pointing at GitHub"
    )]
    UnknownRepository,
}

/// Result alias for GitHub operations.
pub type GitHubResult<T> = Result<T, GitHubError>;

/// `owner/repo` pair identifying a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSlug {
    /// Account or organization.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl FromStr for RepoSlug {
    type Err = GitHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(GitHubError::InvalidSlug(s.to_string())),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A branch reference on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// Branch name.
    #[serde(rename = "ref")]
    pub name: String,
}

/// A pull request as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number.
    pub number: u64,
    /// Title.
    pub title: String,
    /// Body, absent when empty.
    #[serde(default)]
    pub body: Option<String>,
    /// `open` or `closed`.
    pub state: String,
    /// Web URL.
    #[serde(default)]
    pub html_url: Option<String>,
    /// Source branch.
    pub head: BranchRef,
    /// Target branch.
    pub base: BranchRef,
}

/// Payload for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    /// Target branch.
    pub base: String,
    /// Source branch.
    pub head: String,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
}

/// Payload for editing a pull request. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullRequestEdit {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// New state, e.g. `closed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// The pull request operations the release pipeline depends on.
pub trait PullRequestHost {
    /// Open pull requests from `head` into `base`, in API order.
    fn list_open(&mut self, base: &str, head: &str) -> GitHubResult<Vec<PullRequest>>;

    /// Open a new pull request.
    fn create(&mut self, pr: &NewPullRequest) -> GitHubResult<PullRequest>;

    /// Edit pull request `number`.
    fn update(&mut self, number: u64, edit: &PullRequestEdit) -> GitHubResult<PullRequest>;

    /// Close pull request `number` without merging.
    fn close(&mut self, number: u64) -> GitHubResult<()>;
}

impl<T: PullRequestHost + ?Sized> PullRequestHost for &mut T {
    fn list_open(&mut self, base: &str, head: &str) -> GitHubResult<Vec<PullRequest>> {
        (**self).list_open(base, head)
    }

    fn create(&mut self, pr: &NewPullRequest) -> GitHubResult<PullRequest> {
        (**self).create(pr)
    }

    fn update(&mut self, number: u64, edit: &PullRequestEdit) -> GitHubResult<PullRequest> {
        (**self).update(number, edit)
    }

    fn close(&mut self, number: u64) -> GitHubResult<()> {
        (**self).close(number)
    }
}

/// [`PullRequestHost`] backed by `gh api`.
#[derive(Debug, Clone)]
pub struct GhCli {
    root: Utf8PathBuf,
    repo: RepoSlug,
}

impl GhCli {
    /// Talk to `repo`, running `gh` from `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, repo: RepoSlug) -> Self {
        Self {
            root: root.into(),
            repo,
        }
    }

    /// The repository pull requests are managed in.
    pub fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    fn pulls_endpoint(&self) -> String {
        format!("repos/{}/pulls", self.repo)
    }

    fn api<T, P>(
        &self,
        method: &str,
        endpoint: &str,
        payload: Option<&P>,
        fields: &[(&str, &str)],
    ) -> GitHubResult<T>
    where
        T: for<'de> Deserialize<'de>,
        P: Serialize,
    {
        let label = format!("{method} {endpoint}");
        let mut args: Vec<String> = vec![
            "api".into(),
            "--method".into(),
            method.into(),
            "-H".into(),
            "Accept: application/vnd.github+json".into(),
            endpoint.into(),
        ];
        for (key, value) in fields {
            args.push("-f".into());
            args.push(format!("{key}={value}"));
        }

        // Keep the temp file alive until gh has read it.
        let mut input = None;
        if let Some(payload) = payload {
            let mut file = tempfile::NamedTempFile::new()?;
            serde_json::to_writer(&mut file, payload)?;
            file.flush()?;
            args.push("--input".into());
            args.push(file.path().to_string_lossy().to_string());
            input = Some(file);
        }

        debug!(endpoint = %label, "calling GitHub API");
        let output = Command::new("gh")
            .args(&args)
            .current_dir(self.root.as_std_path())
            .output()?;
        drop(input);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitHubError::Command {
                endpoint: label,
                stderr,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| GitHubError::Decode {
            endpoint: label,
            source,
        })
    }
}

impl PullRequestHost for GhCli {
    #[instrument(skip(self), fields(repo = %self.repo))]
    fn list_open(&mut self, base: &str, head: &str) -> GitHubResult<Vec<PullRequest>> {
        let qualified = qualify_head(&self.repo.owner, head);
        let prs: Vec<PullRequest> = self.api(
            "GET",
            &self.pulls_endpoint(),
            None::<&()>,
            &[("state", "open"), ("base", base), ("head", &qualified)],
        )?;
        debug!(count = prs.len(), "listed open pull requests");
        Ok(prs)
    }

    #[instrument(skip(self, pr), fields(repo = %self.repo, title = %pr.title))]
    fn create(&mut self, pr: &NewPullRequest) -> GitHubResult<PullRequest> {
        let created: PullRequest = self.api("POST", &self.pulls_endpoint(), Some(pr), &[])?;
        info!(number = created.number, "opened pull request");
        Ok(created)
    }

    #[instrument(skip(self, edit), fields(repo = %self.repo))]
    fn update(&mut self, number: u64, edit: &PullRequestEdit) -> GitHubResult<PullRequest> {
        let endpoint = format!("{}/{number}", self.pulls_endpoint());
        let updated: PullRequest = self.api("PATCH", &endpoint, Some(edit), &[])?;
        info!(number, "updated pull request");
        Ok(updated)
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    fn close(&mut self, number: u64) -> GitHubResult<()> {
        let edit = PullRequestEdit {
            state: Some("closed".into()),
            ..PullRequestEdit::default()
        };
        let endpoint = format!("{}/{number}", self.pulls_endpoint());
        let _: PullRequest = self.api("PATCH", &endpoint, Some(&edit), &[])?;
        info!(number, "closed pull request");
        Ok(())
    }
}

/// `owner:branch`, the form the list endpoint expects for `head`.
pub fn qualify_head(owner: &str, branch: &str) -> String {
    if branch.contains(':') {
        branch.to_string()
    } else {
        format!("{owner}:{branch}")
    }
}

/// Determine the repository from config, `GITHUB_REPOSITORY`, or the remote.
#[instrument]
pub fn resolve_repo_slug(
    root: &Utf8Path,
    configured: Option<&str>,
    remote: &str,
) -> GitHubResult<RepoSlug> {
    let from_env = std::env::var(GITHUB_REPOSITORY_ENV).ok();
    let remote_url = git::remote_url(root, remote).ok().flatten();
    pick_repo_slug(configured, from_env.as_deref(), remote_url.as_deref())
}

fn pick_repo_slug(
    configured: Option<&str>,
    from_env: Option<&str>,
    remote_url: Option<&str>,
) -> GitHubResult<RepoSlug> {
    if let Some(slug) = configured.filter(|s| !s.trim().is_empty()) {
        debug!(%slug, "repository from config");
        return slug.parse();
    }
    if let Some(slug) = from_env.filter(|s| !s.trim().is_empty()) {
        debug!(%slug, "repository from environment");
        return slug.parse();
    }
    if let Some((owner, name)) = remote_url.and_then(git::parse_owner_repo) {
        debug!(%owner, %name, "repository from remote URL");
        return Ok(RepoSlug { owner, name });
    }
    Err(GitHubError::UnknownRepository)
}
