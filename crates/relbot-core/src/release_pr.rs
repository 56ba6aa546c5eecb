//! Keeping one open release pull request in sync.
//!
//! The pull request from the release branch into the base branch is found
//! by listing open pull requests for that branch pair. None found means a
//! new one is opened; otherwise the first listed one has its title and body
//! overwritten. Reviewer edits to either are discarded.

use serde::Serialize;
use tracing::instrument;

use crate::github::{GitHubError, NewPullRequest, PullRequest, PullRequestEdit, PullRequestHost};
use crate::reconcile::{self, DuplicatePolicy, Reconcile, Reconciled};

/// Default pull request title.
pub const DEFAULT_TITLE_TEMPLATE: &str = "Release {name}@{version}";

/// Default release commit message.
pub const DEFAULT_COMMIT_TEMPLATE: &str = "Version {version}";

/// Replace `{name}` and `{version}` placeholders. Unknown placeholders are
/// left as written.
pub fn interpolate(template: &str, name: &str, version: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{version}", version)
}

/// The state the release pull request should be in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredPullRequest {
    /// Target branch.
    pub base: String,
    /// Release branch.
    pub head: String,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
}

/// Whether the run opened a pull request or edited one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    /// A new pull request was opened.
    Created,
    /// An open pull request was overwritten.
    Updated,
}

impl std::fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// Result of [`upsert`].
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    /// Create or update.
    pub action: UpsertAction,
    /// The release pull request after the write.
    pub pull_request: PullRequest,
    /// Numbers of other open release pull requests that were left open.
    pub duplicates: Vec<u64>,
    /// Numbers of other open release pull requests that were closed.
    pub closed: Vec<u64>,
}

struct Upserter<'a, H> {
    host: &'a mut H,
    desired: &'a DesiredPullRequest,
}

impl<H: PullRequestHost> Reconcile for Upserter<'_, H> {
    type Resource = PullRequest;
    type Error = GitHubError;

    fn observe(&mut self) -> Result<Vec<PullRequest>, GitHubError> {
        self.host.list_open(&self.desired.base, &self.desired.head)
    }

    fn create(&mut self) -> Result<PullRequest, GitHubError> {
        self.host.create(&NewPullRequest {
            base: self.desired.base.clone(),
            head: self.desired.head.clone(),
            title: self.desired.title.clone(),
            body: self.desired.body.clone(),
        })
    }

    fn update(&mut self, existing: &PullRequest) -> Result<PullRequest, GitHubError> {
        self.host.update(
            existing.number,
            &PullRequestEdit {
                title: Some(self.desired.title.clone()),
                body: Some(self.desired.body.clone()),
                state: None,
            },
        )
    }

    fn retire(&mut self, extra: &PullRequest) -> Result<(), GitHubError> {
        self.host.close(extra.number)
    }
}

/// Create or update the release pull request on `host`.
///
/// Exactly one create or update is issued. Under
/// [`DuplicatePolicy::CloseExtras`] every other open match is closed too.
#[instrument(skip(host, desired), fields(head = %desired.head, base = %desired.base))]
pub fn upsert<H: PullRequestHost>(
    host: &mut H,
    desired: &DesiredPullRequest,
    policy: DuplicatePolicy,
) -> Result<UpsertOutcome, GitHubError> {
    let mut upserter = Upserter { host, desired };
    let outcome = match reconcile::ensure(&mut upserter, policy)? {
        Reconciled::Created(pull_request) => UpsertOutcome {
            action: UpsertAction::Created,
            pull_request,
            duplicates: Vec::new(),
            closed: Vec::new(),
        },
        Reconciled::Updated {
            resource,
            duplicates,
            retired,
        } => UpsertOutcome {
            action: UpsertAction::Updated,
            pull_request: resource,
            duplicates: duplicates.iter().map(|pr| pr.number).collect(),
            closed: retired.iter().map(|pr| pr.number).collect(),
        },
    };
    Ok(outcome)
}
