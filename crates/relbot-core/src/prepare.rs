//! The release preparation pipeline.
//!
//! One linear pass, gated on pending changesets:
//!
//! 1. **Inventory**: count pending changesets; stop successfully at zero.
//! 2. **Sync**: set the committer identity, check out the release branch and
//!    hard-reset it to the tip of the base branch.
//! 3. **Bump**: run the version command.
//! 4. **Artifacts**: read the package manifest and changelog it produced.
//! 5. **Publish**: commit everything and force-push the release branch.
//! 6. **Extract**: pull the changelog section for the new version.
//! 7. **Pull request**: create or update the single release pull request.
//! 8. **Restore**: check the starting branch out again.
//!
//! Every failure is fatal and reported with the phase it happened in. The
//! starting branch is checked out again whether the run succeeds or fails.
//! Because each run rebuilds the release branch from the base branch and
//! force-pushes it, a failed run leaves nothing a later run has to undo.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::artifacts::{self, ArtifactError};
use crate::bump::{self, BumpError, VersionBumper};
use crate::changelog::{self, BumpLevel, SectionNotFound};
use crate::changeset::{self, ChangesetError, ChangesetInventory};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::git::{self, GitError, Identity, SourceControl};
use crate::github::{GitHubError, PullRequestHost};
use crate::reconcile::DuplicatePolicy;
use crate::release_pr::{self, DesiredPullRequest, UpsertOutcome};

/// Default branch the release commit is pushed to.
pub const DEFAULT_RELEASE_BRANCH: &str = "release";

/// Default branch the release branch is rebuilt from.
pub const DEFAULT_BASE_BRANCH: &str = "next";

/// Default package directory.
pub const DEFAULT_PACKAGE_DIR: &str = "packages/ch-test-infra";

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// The error from one pipeline step.
#[derive(Error, Debug)]
pub enum StepError {
    /// Reading the changeset directory failed.
    #[error(transparent)]
    Changeset(#[from] ChangesetError),

    /// A git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// The version command failed.
    #[error(transparent)]
    Bump(#[from] BumpError),

    /// The manifest or changelog could not be read.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The changelog has no section for the new version.
    #[error(transparent)]
    Changelog(#[from] SectionNotFound),

    /// The code-hosting API failed.
    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

impl StepError {
    /// Coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Changeset(_) | Self::Artifact(ArtifactError::Io { .. }) => ErrorKind::Io,
            // A manifest the version command left unreadable is the tool's fault.
            Self::Bump(_)
            | Self::Git(GitError::NothingToCommit)
            | Self::Artifact(
                ArtifactError::InvalidManifest { .. } | ArtifactError::EmptyField { .. },
            ) => ErrorKind::ExternalTool,
            Self::Artifact(ArtifactError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Changelog(_) => ErrorKind::SectionNotFound,
            Self::Git(_) | Self::GitHub(_) => ErrorKind::Transport,
        }
    }
}

/// A fatal pipeline failure.
#[derive(Error, Debug)]
#[error("{phase} phase failed")]
pub struct PrepareError {
    /// The phase that failed.
    pub phase: PreparePhase,
    /// What went wrong.
    #[source]
    pub source: StepError,
}

impl PrepareError {
    /// Coarse classification of the failure.
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Result alias for the pipeline.
pub type PrepareResult<T> = Result<T, PrepareError>;

// ──────────────────────────────────────────────
// Phases and events
// ──────────────────────────────────────────────

/// Phases of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreparePhase {
    /// Count pending changesets.
    Inventory,
    /// Rebuild the release branch from the base branch.
    Sync,
    /// Run the version command.
    Bump,
    /// Read the manifest and changelog.
    Artifacts,
    /// Commit and force-push.
    Publish,
    /// Extract the changelog section.
    Extract,
    /// Create or update the release pull request.
    PullRequest,
    /// Check the starting branch out again.
    Restore,
}

impl PreparePhase {
    /// Every phase, in order.
    pub const ALL: [Self; 8] = [
        Self::Inventory,
        Self::Sync,
        Self::Bump,
        Self::Artifacts,
        Self::Publish,
        Self::Extract,
        Self::PullRequest,
        Self::Restore,
    ];
}

impl std::fmt::Display for PreparePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inventory => write!(f, "inventory"),
            Self::Sync => write!(f, "sync"),
            Self::Bump => write!(f, "bump"),
            Self::Artifacts => write!(f, "artifacts"),
            Self::Publish => write!(f, "publish"),
            Self::Extract => write!(f, "extract"),
            Self::PullRequest => write!(f, "pull request"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Progress events for the CLI.
#[derive(Debug, Clone)]
pub enum PrepareEvent {
    /// A phase has started.
    PhaseStarted(PreparePhase),
    /// A phase has completed or was skipped.
    PhaseCompleted(PreparePhase, PhaseOutcome),
    /// A phase failed; the run stops here.
    PhaseFailed(PreparePhase),
}

/// Outcome of a single phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PhaseOutcome {
    /// Phase completed successfully.
    Success {
        /// Description of what happened.
        message: String,
    },
    /// Phase was skipped.
    Skipped {
        /// Why the phase was skipped.
        reason: String,
    },
}

// ──────────────────────────────────────────────
// Settings and outcome
// ──────────────────────────────────────────────

/// Everything the pipeline needs to know, after config and flags are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareSettings {
    /// Branch the release commit is force-pushed to.
    pub release_branch: String,
    /// Branch the release branch is rebuilt from.
    pub base_branch: String,
    /// Package directory relative to the repository root.
    pub package_dir: Utf8PathBuf,
    /// Command that applies pending changesets.
    pub version_command: String,
    /// Changeset directory relative to the repository root.
    pub changeset_dir: String,
    /// Pull request title template.
    pub title_template: String,
    /// Commit message template.
    pub commit_template: String,
    /// What to do when several release pull requests are open.
    pub on_multiple: DuplicatePolicy,
    /// Git remote.
    pub remote: String,
    /// Committer identity.
    pub identity: Identity,
    /// Configured `owner/repo`, if any.
    pub repository: Option<String>,
    /// Stop after the inventory without changing anything.
    pub dry_run: bool,
}

impl Default for PrepareSettings {
    fn default() -> Self {
        Self {
            release_branch: DEFAULT_RELEASE_BRANCH.into(),
            base_branch: DEFAULT_BASE_BRANCH.into(),
            package_dir: DEFAULT_PACKAGE_DIR.into(),
            version_command: bump::DEFAULT_VERSION_COMMAND.into(),
            changeset_dir: changeset::DEFAULT_CHANGESET_DIR.into(),
            title_template: release_pr::DEFAULT_TITLE_TEMPLATE.into(),
            commit_template: release_pr::DEFAULT_COMMIT_TEMPLATE.into(),
            on_multiple: DuplicatePolicy::default(),
            remote: git::DEFAULT_REMOTE.into(),
            identity: Identity::default(),
            repository: None,
            dry_run: false,
        }
    }
}

impl PrepareSettings {
    /// Defaults overridden by whatever `config` sets.
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self::default();

        if let Some(release) = &config.release {
            if let Some(v) = &release.release_branch {
                settings.release_branch.clone_from(v);
            }
            if let Some(v) = &release.base_branch {
                settings.base_branch.clone_from(v);
            }
            if let Some(v) = &release.package_dir {
                settings.package_dir.clone_from(v);
            }
            if let Some(v) = &release.version_command {
                settings.version_command.clone_from(v);
            }
            if let Some(v) = &release.changeset_dir {
                settings.changeset_dir.clone_from(v);
            }
            if let Some(v) = &release.title {
                settings.title_template.clone_from(v);
            }
            if let Some(v) = &release.commit_message {
                settings.commit_template.clone_from(v);
            }
            if let Some(v) = release.on_multiple {
                settings.on_multiple = v;
            }
        }

        if let Some(git) = &config.git {
            if let Some(v) = &git.remote {
                settings.remote.clone_from(v);
            }
            if let Some(v) = &git.user_name {
                settings.identity.name.clone_from(v);
            }
            if let Some(v) = &git.user_email {
                settings.identity.email.clone_from(v);
            }
        }

        settings.repository = config.github.as_ref().and_then(|g| g.repository.clone());
        settings
    }
}

/// What a completed release preparation produced.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedRelease {
    /// Package name from the manifest.
    pub package: String,
    /// New version from the manifest.
    pub version: String,
    /// Short hash of the release commit.
    pub commit: String,
    /// Branch that was force-pushed.
    pub release_branch: String,
    /// Branch the pull request targets.
    pub base_branch: String,
    /// Number of changesets consumed.
    pub pending_changesets: usize,
    /// Highest bump level named in the changelog section.
    pub highest_level: Option<BumpLevel>,
    /// The pull request write.
    pub pull_request: UpsertOutcome,
    /// Per-phase results.
    pub phases: Vec<(PreparePhase, PhaseOutcome)>,
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PrepareOutcome {
    /// Nothing pending; nothing was touched.
    NoChangesets,
    /// Dry run: changesets are pending but nothing was changed.
    DryRun {
        /// Number of pending changesets.
        pending_changesets: usize,
        /// Per-phase results, all but the inventory skipped.
        phases: Vec<(PreparePhase, PhaseOutcome)>,
    },
    /// The release branch was published and the pull request written.
    Prepared(Box<PreparedRelease>),
}

// ──────────────────────────────────────────────
// Pipeline
// ──────────────────────────────────────────────

/// The pipeline over its three external collaborators.
#[derive(Debug)]
pub struct Pipeline<S, B, H> {
    scm: S,
    bumper: B,
    host: H,
}

impl<S, B, H> Pipeline<S, B, H>
where
    S: SourceControl,
    B: VersionBumper,
    H: PullRequestHost,
{
    /// Assemble a pipeline.
    pub const fn new(scm: S, bumper: B, host: H) -> Self {
        Self { scm, bumper, host }
    }

    /// Take the collaborators back.
    pub fn into_parts(self) -> (S, B, H) {
        (self.scm, self.bumper, self.host)
    }

    /// Run once against the repository at `root`.
    ///
    /// Calls `on_event` at phase boundaries for progress display.
    #[instrument(skip(self, settings, on_event), fields(
        %root,
        release = %settings.release_branch,
        base = %settings.base_branch,
        dry_run = settings.dry_run
    ))]
    pub fn run(
        &mut self,
        root: &Utf8Path,
        settings: &PrepareSettings,
        on_event: impl FnMut(PrepareEvent),
    ) -> PrepareResult<PrepareOutcome> {
        let mut progress = Progress {
            on_event,
            phases: Vec::new(),
        };

        // ── Inventory ──
        let inventory = ChangesetInventory::new(root, &settings.changeset_dir);
        let pending = progress.step(PreparePhase::Inventory, || {
            let count = inventory.count()?;
            Ok::<_, ChangesetError>((count, format!("{count} pending changeset(s)")))
        })?;

        if pending == 0 {
            info!("no pending changesets, nothing to do");
            return Ok(PrepareOutcome::NoChangesets);
        }

        if settings.dry_run {
            for phase in &PreparePhase::ALL[1..] {
                progress.skip(*phase, "dry run");
            }
            return Ok(PrepareOutcome::DryRun {
                pending_changesets: pending,
                phases: progress.phases,
            });
        }

        // The next run takes its inventory from whatever is checked out, so
        // the work tree goes back to where it started on every exit path.
        let start = self.scm.head().map_err(|e| PrepareError {
            phase: PreparePhase::Sync,
            source: e.into(),
        })?;

        let release = match self.release(root, settings, pending, &mut progress) {
            Ok(release) => release,
            Err(e) => {
                if let Err(restore) = self.scm.restore(&start) {
                    warn!(error = %restore, %start, "could not return to the starting checkout");
                }
                return Err(e);
            }
        };

        // ── Restore ──
        let scm = &mut self.scm;
        progress.step(PreparePhase::Restore, || {
            scm.restore(&start)?;
            Ok::<_, GitError>(((), format!("back on {start}")))
        })?;

        info!(
            package = %release.package,
            version = %release.version,
            pr = release.pull_request.pull_request.number,
            "release prepared"
        );

        Ok(PrepareOutcome::Prepared(Box::new(PreparedRelease {
            phases: progress.phases,
            ..release
        })))
    }

    /// Sync through pull request. Phases are recorded in `progress`, not in
    /// the returned release.
    fn release<F: FnMut(PrepareEvent)>(
        &mut self,
        root: &Utf8Path,
        settings: &PrepareSettings,
        pending: usize,
        progress: &mut Progress<F>,
    ) -> PrepareResult<PreparedRelease> {
        // ── Sync ──
        let scm = &mut self.scm;
        progress.step(PreparePhase::Sync, || {
            scm.setup_identity(&settings.identity)?;
            scm.checkout(&settings.release_branch)?;
            scm.reset_to_base(&settings.base_branch)?;
            Ok::<_, GitError>((
                (),
                format!(
                    "{} reset to {}/{}",
                    settings.release_branch, settings.remote, settings.base_branch
                ),
            ))
        })?;

        // ── Bump ──
        let bumper = &mut self.bumper;
        progress.step(PreparePhase::Bump, || {
            bumper.bump(root)?;
            Ok::<_, BumpError>(((), format!("ran `{}`", settings.version_command)))
        })?;

        // ── Artifacts ──
        let package_dir = root.join(&settings.package_dir);
        let artifacts = progress.step(PreparePhase::Artifacts, || {
            let artifacts = artifacts::read_artifacts(&package_dir)?;
            let message = format!(
                "{}@{}",
                artifacts.manifest.name, artifacts.manifest.version
            );
            Ok::<_, ArtifactError>((artifacts, message))
        })?;
        let manifest = &artifacts.manifest;

        // ── Publish ──
        let scm = &mut self.scm;
        let commit = progress.step(PreparePhase::Publish, || {
            let message =
                release_pr::interpolate(&settings.commit_template, &manifest.name, &manifest.version);
            let hash = scm.commit_all(&message)?;
            scm.force_push(&settings.release_branch)?;
            let summary = format!("{hash} force-pushed to {}", settings.release_branch);
            Ok::<_, GitError>((hash, summary))
        })?;

        // ── Extract ──
        let entry = progress.step(PreparePhase::Extract, || {
            let entry = changelog::extract(&artifacts.changelog.text, &manifest.version)?;
            let message = format!("{} byte section for {}", entry.content.len(), entry.version);
            Ok::<_, SectionNotFound>((entry, message))
        })?;

        // ── Pull request ──
        let host = &mut self.host;
        let desired = DesiredPullRequest {
            base: settings.base_branch.clone(),
            head: settings.release_branch.clone(),
            title: release_pr::interpolate(
                &settings.title_template,
                &manifest.name,
                &manifest.version,
            ),
            body: entry.content,
        };
        let pull_request = progress.step(PreparePhase::PullRequest, || {
            let outcome = release_pr::upsert(host, &desired, settings.on_multiple)?;
            let message = format!("{} #{}", outcome.action, outcome.pull_request.number);
            Ok::<_, GitHubError>((outcome, message))
        })?;

        Ok(PreparedRelease {
            package: manifest.name.clone(),
            version: manifest.version.clone(),
            commit,
            release_branch: settings.release_branch.clone(),
            base_branch: settings.base_branch.clone(),
            pending_changesets: pending,
            highest_level: entry.highest_level,
            pull_request,
            phases: Vec::new(),
        })
    }
}

struct Progress<F> {
    on_event: F,
    phases: Vec<(PreparePhase, PhaseOutcome)>,
}

impl<F: FnMut(PrepareEvent)> Progress<F> {
    fn step<T, E>(
        &mut self,
        phase: PreparePhase,
        f: impl FnOnce() -> Result<(T, String), E>,
    ) -> PrepareResult<T>
    where
        E: Into<StepError>,
    {
        (self.on_event)(PrepareEvent::PhaseStarted(phase));
        match f() {
            Ok((value, message)) => {
                self.complete(phase, PhaseOutcome::Success { message });
                Ok(value)
            }
            Err(e) => {
                (self.on_event)(PrepareEvent::PhaseFailed(phase));
                Err(PrepareError {
                    phase,
                    source: e.into(),
                })
            }
        }
    }

    fn skip(&mut self, phase: PreparePhase, reason: &str) {
        self.complete(
            phase,
            PhaseOutcome::Skipped {
                reason: reason.into(),
            },
        );
    }

    fn complete(&mut self, phase: PreparePhase, outcome: PhaseOutcome) {
        (self.on_event)(PrepareEvent::PhaseCompleted(phase, outcome.clone()));
        self.phases.push((phase, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bump::BumpResult;
    use crate::git::GitResult;
    use crate::github::{BranchRef, GitHubResult, NewPullRequest, PullRequest, PullRequestEdit};
    use crate::release_pr::UpsertAction;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    const PACKAGE_DIR: &str = "packages/ch-test-infra";

    const BASE_CHANGELOG: &str = "\
# ch-test-infra

## 1.9.0

### Minor Changes

- 9a8b7c6: Add nested fixtures
";

    const RELEASE_SECTION: &str = "\
### Major Changes

- 1a2b3c4: Drop Node 16 support
";

    type Tree = BTreeMap<String, String>;

    fn tree(root: &Utf8Path) -> Tree {
        let mut out = Tree::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in dir.read_dir_utf8().unwrap() {
                let path = entry.unwrap().path().to_path_buf();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string();
                    out.insert(rel, fs::read_to_string(&path).unwrap());
                }
            }
        }
        out
    }

    fn write_tree(root: &Utf8Path, files: &Tree) {
        for (rel, text) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
    }

    /// Working tree backed by a temp dir. Local branches are tree snapshots;
    /// the remote base branch is a fixed one.
    #[derive(Debug)]
    struct FakeRepo {
        root: Utf8PathBuf,
        base: Tree,
        branches: BTreeMap<String, Tree>,
        current: String,
        calls: Vec<String>,
        identity: Option<Identity>,
        remote: BTreeMap<String, Tree>,
        commits: usize,
        fail_push: bool,
        fail_restore: bool,
    }

    impl FakeRepo {
        /// Make the working tree exactly `files`.
        fn set_tree(&self, files: &Tree) {
            for rel in tree(&self.root).keys() {
                if !files.contains_key(rel) {
                    fs::remove_file(self.root.join(rel)).unwrap();
                }
            }
            write_tree(&self.root, files);
        }
    }

    impl SourceControl for FakeRepo {
        fn setup_identity(&mut self, identity: &Identity) -> GitResult<()> {
            self.calls.push("identity".into());
            self.identity = Some(identity.clone());
            Ok(())
        }

        fn checkout(&mut self, branch: &str) -> GitResult<()> {
            self.calls.push(format!("checkout {branch}"));
            match self.branches.get(branch) {
                Some(files) => self.set_tree(files),
                None => {
                    let head = self.branches[&self.current].clone();
                    self.branches.insert(branch.to_string(), head);
                }
            }
            self.current = branch.to_string();
            Ok(())
        }

        fn reset_to_base(&mut self, base: &str) -> GitResult<()> {
            self.calls.push(format!("reset {base}"));
            self.set_tree(&self.base);
            self.branches.insert(self.current.clone(), self.base.clone());
            Ok(())
        }

        fn commit_all(&mut self, message: &str) -> GitResult<String> {
            self.calls.push(format!("commit {message}"));
            let files = tree(&self.root);
            if files == self.branches[&self.current] {
                return Err(GitError::NothingToCommit);
            }
            self.branches.insert(self.current.clone(), files);
            self.commits += 1;
            Ok(format!("c0ffee{}", self.commits))
        }

        fn force_push(&mut self, branch: &str) -> GitResult<()> {
            self.calls.push(format!("push {branch}"));
            if self.fail_push {
                return Err(GitError::Command {
                    command: "push".into(),
                    stderr: "remote rejected".into(),
                });
            }
            self.remote.insert(branch.to_string(), self.branches[&self.current].clone());
            Ok(())
        }

        fn head(&mut self) -> GitResult<String> {
            Ok(self.current.clone())
        }

        fn restore(&mut self, target: &str) -> GitResult<()> {
            self.calls.push(format!("restore {target}"));
            if self.fail_restore {
                return Err(GitError::Command {
                    command: "checkout".into(),
                    stderr: "unable to unlink".into(),
                });
            }
            self.set_tree(&self.branches[target]);
            self.current = target.to_string();
            Ok(())
        }
    }

    /// Deterministic stand-in for the changesets version command.
    #[derive(Debug, Default)]
    struct FakeBumper {
        runs: usize,
        fail: bool,
        skip_changelog: bool,
        skip_manifest: bool,
        unversioned_manifest: bool,
    }

    impl VersionBumper for FakeBumper {
        fn bump(&mut self, root: &Utf8Path) -> BumpResult<()> {
            self.runs += 1;
            if self.fail {
                return Err(BumpError::ToolFailed {
                    tool: "pnpm version-packages".into(),
                    message: "exit code 1".into(),
                });
            }
            let changesets = root.join(".changeset");
            for entry in changesets.read_dir_utf8().unwrap() {
                let path = entry.unwrap().path().to_path_buf();
                if path.extension() == Some("md") && path.file_name() != Some("README.md") {
                    fs::remove_file(path).unwrap();
                }
            }
            let pkg = root.join(PACKAGE_DIR);
            if self.skip_manifest {
                fs::remove_file(pkg.join("package.json")).unwrap();
            } else if self.unversioned_manifest {
                fs::write(pkg.join("package.json"), "{\"name\": \"ch-test-infra\"}\n").unwrap();
            } else {
                fs::write(
                    pkg.join("package.json"),
                    "{\n  \"name\": \"ch-test-infra\",\n  \"version\": \"2.0.0\"\n}\n",
                )
                .unwrap();
            }
            if !self.skip_changelog {
                let old = fs::read_to_string(pkg.join("CHANGELOG.md")).unwrap();
                let new = old.replacen(
                    "## 1.9.0",
                    &format!("## 2.0.0\n\n{RELEASE_SECTION}\n## 1.9.0"),
                    1,
                );
                fs::write(pkg.join("CHANGELOG.md"), new).unwrap();
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeHost {
        prs: Vec<PullRequest>,
        next_number: u64,
        lists: usize,
        creates: Vec<NewPullRequest>,
        updates: Vec<(u64, PullRequestEdit)>,
        closes: Vec<u64>,
        fail_create: bool,
    }

    impl FakeHost {
        fn open(&self) -> Vec<&PullRequest> {
            self.prs
                .iter()
                .filter(|pr| pr.state == "open" && pr.head.name == "release" && pr.base.name == "next")
                .collect()
        }

        fn writes(&self) -> usize {
            self.creates.len() + self.updates.len() + self.closes.len()
        }
    }

    fn pr(number: u64, title: &str) -> PullRequest {
        PullRequest {
            number,
            title: title.into(),
            body: Some("stale".into()),
            state: "open".into(),
            html_url: Some(format!("https://github.com/acme/widgets/pull/{number}")),
            head: BranchRef {
                name: "release".into(),
            },
            base: BranchRef { name: "next".into() },
        }
    }

    impl PullRequestHost for FakeHost {
        fn list_open(&mut self, base: &str, head: &str) -> GitHubResult<Vec<PullRequest>> {
            self.lists += 1;
            Ok(self
                .prs
                .iter()
                .filter(|pr| pr.state == "open" && pr.base.name == base && pr.head.name == head)
                .cloned()
                .collect())
        }

        fn create(&mut self, new: &NewPullRequest) -> GitHubResult<PullRequest> {
            if self.fail_create {
                return Err(GitHubError::Command {
                    endpoint: "POST repos/acme/widgets/pulls".into(),
                    stderr: "HTTP 403".into(),
                });
            }
            self.creates.push(new.clone());
            self.next_number += 1;
            let mut created = pr(self.next_number, &new.title);
            created.body = Some(new.body.clone());
            self.prs.push(created.clone());
            Ok(created)
        }

        fn update(&mut self, number: u64, edit: &PullRequestEdit) -> GitHubResult<PullRequest> {
            self.updates.push((number, edit.clone()));
            let found = self
                .prs
                .iter_mut()
                .find(|pr| pr.number == number)
                .ok_or(GitHubError::UnknownRepository)?;
            if let Some(title) = &edit.title {
                found.title.clone_from(title);
            }
            found.body.clone_from(&edit.body);
            Ok(found.clone())
        }

        fn close(&mut self, number: u64) -> GitHubResult<()> {
            self.closes.push(number);
            for pr in &mut self.prs {
                if pr.number == number {
                    pr.state = "closed".into();
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: Utf8PathBuf,
        repo: FakeRepo,
        bumper: FakeBumper,
        host: FakeHost,
    }

    fn fixture(changesets: &[&str]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

        let mut base = Tree::new();
        base.insert(".changeset/README.md".into(), "# Changesets\n".into());
        for id in changesets {
            base.insert(
                format!(".changeset/{id}.md"),
                "---\n\"ch-test-infra\": major\n---\n\nDrop Node 16 support\n".into(),
            );
        }
        base.insert(
            format!("{PACKAGE_DIR}/package.json"),
            "{\n  \"name\": \"ch-test-infra\",\n  \"version\": \"1.9.0\"\n}\n".into(),
        );
        base.insert(format!("{PACKAGE_DIR}/CHANGELOG.md"), BASE_CHANGELOG.into());
        write_tree(&root, &base);

        Fixture {
            _tmp: tmp,
            repo: FakeRepo {
                root: root.clone(),
                branches: BTreeMap::from([("next".to_string(), base.clone())]),
                current: "next".into(),
                base,
                calls: Vec::new(),
                identity: None,
                remote: BTreeMap::new(),
                commits: 0,
                fail_push: false,
                fail_restore: false,
            },
            root,
            bumper: FakeBumper::default(),
            host: FakeHost {
                next_number: 100,
                ..FakeHost::default()
            },
        }
    }

    impl Fixture {
        fn run_with(&mut self, settings: &PrepareSettings) -> PrepareResult<PrepareOutcome> {
            let mut pipeline = Pipeline::new(&mut self.repo, &mut self.bumper, &mut self.host);
            pipeline.run(&self.root, settings, |_| {})
        }

        fn run(&mut self) -> PrepareResult<PrepareOutcome> {
            self.run_with(&PrepareSettings::default())
        }
    }

    fn prepared(outcome: PrepareOutcome) -> PreparedRelease {
        match outcome {
            PrepareOutcome::Prepared(release) => *release,
            other => panic!("expected a prepared release, got {other:?}"),
        }
    }

    #[test]
    fn no_changesets_touches_nothing() {
        let mut fx = fixture(&[]);
        let outcome = fx.run().unwrap();
        assert!(matches!(outcome, PrepareOutcome::NoChangesets));
        assert!(fx.repo.calls.is_empty());
        assert_eq!(fx.bumper.runs, 0);
        assert_eq!(fx.host.lists, 0);
        assert_eq!(fx.host.writes(), 0);
    }

    #[test]
    fn missing_changeset_dir_is_io_error() {
        let mut fx = fixture(&["brave-owls"]);
        fs::remove_dir_all(fx.root.join(".changeset")).unwrap();
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Inventory);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(fx.repo.calls.is_empty());
    }

    #[test]
    fn dry_run_changes_nothing() {
        let mut fx = fixture(&["brave-owls"]);
        let settings = PrepareSettings {
            dry_run: true,
            ..PrepareSettings::default()
        };
        match fx.run_with(&settings).unwrap() {
            PrepareOutcome::DryRun {
                pending_changesets,
                phases,
            } => {
                assert_eq!(pending_changesets, 1);
                assert_eq!(phases.len(), PreparePhase::ALL.len());
                assert!(matches!(phases[1].1, PhaseOutcome::Skipped { .. }));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(fx.repo.calls.is_empty());
        assert_eq!(fx.host.writes(), 0);
    }

    #[test]
    fn creates_release_pr_once() {
        let mut fx = fixture(&["brave-owls"]);
        let release = prepared(fx.run().unwrap());

        assert_eq!(release.package, "ch-test-infra");
        assert_eq!(release.version, "2.0.0");
        assert_eq!(release.highest_level, Some(BumpLevel::Major));
        assert_eq!(release.pull_request.action, UpsertAction::Created);

        assert_eq!(fx.host.creates.len(), 1);
        assert!(fx.host.updates.is_empty());
        let created = &fx.host.creates[0];
        assert_eq!(created.title, "Release ch-test-infra@2.0.0");
        assert_eq!(created.body, RELEASE_SECTION);
        assert_eq!(created.head, "release");
        assert_eq!(created.base, "next");
    }

    #[test]
    fn git_steps_run_in_order() {
        let mut fx = fixture(&["brave-owls"]);
        fx.run().unwrap();
        assert_eq!(
            fx.repo.calls,
            vec![
                "identity",
                "checkout release",
                "reset next",
                "commit Version 2.0.0",
                "push release",
                "restore next",
            ]
        );
        assert_eq!(
            fx.repo.identity.as_ref().map(|i| i.name.as_str()),
            Some("github-actions[bot]")
        );
    }

    #[test]
    fn updates_existing_pr() {
        let mut fx = fixture(&["brave-owls"]);
        fx.host.prs.push(pr(42, "Release ch-test-infra@1.9.0"));

        let release = prepared(fx.run().unwrap());
        assert_eq!(release.pull_request.action, UpsertAction::Updated);
        assert!(fx.host.creates.is_empty());
        assert_eq!(fx.host.updates.len(), 1);
        let (number, edit) = &fx.host.updates[0];
        assert_eq!(*number, 42);
        assert_eq!(edit.title.as_deref(), Some("Release ch-test-infra@2.0.0"));
        assert_eq!(edit.body.as_deref(), Some(RELEASE_SECTION));
    }

    #[test]
    fn repeated_runs_converge() {
        let mut fx = fixture(&["brave-owls", "quiet-lions"]);

        prepared(fx.run().unwrap());
        let first_branch = fx.repo.remote["release"].clone();
        let first_prs: Vec<_> = fx.host.open().into_iter().cloned().collect();

        // Changesets are still on the base branch, so the second run repeats the release.
        prepared(fx.run().unwrap());
        let second_branch = fx.repo.remote["release"].clone();
        let second_prs: Vec<_> = fx.host.open().into_iter().cloned().collect();

        assert_eq!(first_branch, second_branch);
        assert_eq!(first_prs, second_prs);
        assert_eq!(second_prs.len(), 1);
        assert_eq!(fx.host.creates.len(), 1);
        assert_eq!(fx.host.updates.len(), 1);
        assert!(!second_branch.contains_key(".changeset/brave-owls.md"));
        assert!(second_branch[&format!("{PACKAGE_DIR}/package.json")].contains("2.0.0"));
    }

    #[test]
    fn single_open_pr_after_every_run() {
        let mut fx = fixture(&["brave-owls"]);
        for _ in 0..3 {
            fx.run().unwrap();
            assert_eq!(fx.host.open().len(), 1);
        }

        // A merged/closed PR leads to a fresh one on the next run.
        fx.host.prs[0].state = "closed".into();
        fx.run().unwrap();
        assert_eq!(fx.host.open().len(), 1);
        assert_eq!(fx.host.creates.len(), 2);
    }

    #[test]
    fn duplicate_prs_update_first_by_default() {
        let mut fx = fixture(&["brave-owls"]);
        fx.host.prs.push(pr(42, "a"));
        fx.host.prs.push(pr(43, "b"));

        let release = prepared(fx.run().unwrap());
        assert_eq!(release.pull_request.pull_request.number, 42);
        assert_eq!(release.pull_request.duplicates, vec![43]);
        assert!(fx.host.closes.is_empty());
    }

    #[test]
    fn duplicate_prs_closed_when_configured() {
        let mut fx = fixture(&["brave-owls"]);
        fx.host.prs.push(pr(42, "a"));
        fx.host.prs.push(pr(43, "b"));
        let settings = PrepareSettings {
            on_multiple: DuplicatePolicy::CloseExtras,
            ..PrepareSettings::default()
        };

        let release = prepared(fx.run_with(&settings).unwrap());
        assert_eq!(release.pull_request.closed, vec![43]);
        assert_eq!(fx.host.open().len(), 1);
    }

    #[test]
    fn custom_templates_and_branches() {
        let mut fx = fixture(&["brave-owls"]);
        let settings = PrepareSettings {
            release_branch: "changeset-release".into(),
            base_branch: "main".into(),
            title_template: "chore: release {name} v{version}".into(),
            commit_template: "chore(release): {version}".into(),
            ..PrepareSettings::default()
        };
        fx.run_with(&settings).unwrap();

        assert!(fx.repo.calls.contains(&"checkout changeset-release".to_string()));
        assert!(fx.repo.calls.contains(&"reset main".to_string()));
        assert!(fx.repo.calls.contains(&"commit chore(release): 2.0.0".to_string()));
        assert_eq!(fx.host.creates[0].title, "chore: release ch-test-infra v2.0.0");
        assert_eq!(fx.host.creates[0].base, "main");
    }

    #[test]
    fn bump_failure_is_external_tool_error() {
        let mut fx = fixture(&["brave-owls"]);
        fx.bumper.fail = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Bump);
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(fx.repo.remote.is_empty());
        assert_eq!(fx.host.lists, 0);
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let mut fx = fixture(&["brave-owls"]);
        fx.bumper.skip_manifest = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Artifacts);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unreadable_manifest_blames_the_version_command() {
        let mut fx = fixture(&["brave-owls"]);
        fx.bumper.unversioned_manifest = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Artifacts);
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
    }

    #[test]
    fn missing_section_is_section_not_found() {
        let mut fx = fixture(&["brave-owls"]);
        fx.bumper.skip_changelog = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Extract);
        assert_eq!(err.kind(), ErrorKind::SectionNotFound);
        assert_eq!(fx.host.writes(), 0);
    }

    #[test]
    fn push_failure_is_transport_error() {
        let mut fx = fixture(&["brave-owls"]);
        fx.repo.fail_push = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::Publish);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.to_string(), "publish phase failed");
        assert_eq!(fx.host.writes(), 0);
    }

    #[test]
    fn api_failure_aborts_without_retry() {
        let mut fx = fixture(&["brave-owls"]);
        fx.host.fail_create = true;
        let err = fx.run().unwrap_err();
        assert_eq!(err.phase, PreparePhase::PullRequest);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(fx.host.lists, 1);
        assert!(fx.host.creates.is_empty());
    }

    #[test]
    fn failed_run_recovers_on_next_run() {
        let mut fx = fixture(&["brave-owls"]);
        fx.host.fail_create = true;
        fx.run().unwrap_err();

        fx.host.fail_create = false;
        prepared(fx.run().unwrap());
        assert_eq!(fx.host.open().len(), 1);
    }

    #[test]
    fn successful_run_returns_to_starting_branch() {
        let mut fx = fixture(&["brave-owls"]);
        prepared(fx.run().unwrap());

        assert_eq!(fx.repo.current, "next");
        assert_eq!(tree(&fx.root), fx.repo.base);
        assert!(fx.root.join(".changeset/brave-owls.md").exists());
    }

    #[test]
    fn failed_run_returns_to_starting_branch() {
        let mut fx = fixture(&["brave-owls"]);
        fx.repo.fail_push = true;
        fx.run().unwrap_err();

        assert_eq!(fx.repo.calls.last().map(String::as_str), Some("restore next"));
        assert_eq!(fx.repo.current, "next");
        assert_eq!(tree(&fx.root), fx.repo.base);
    }

    #[test]
    fn restore_failure_is_reported_after_publishing() {
        let mut fx = fixture(&["brave-owls"]);
        fx.repo.fail_restore = true;
        let err = fx.run().unwrap_err();

        assert_eq!(err.phase, PreparePhase::Restore);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(fx.host.open().len(), 1);
    }

    #[test]
    fn events_bracket_each_phase() {
        let mut fx = fixture(&["brave-owls"]);
        let mut events = Vec::new();
        {
            let mut pipeline = Pipeline::new(&mut fx.repo, &mut fx.bumper, &mut fx.host);
            pipeline
                .run(&fx.root, &PrepareSettings::default(), |e| events.push(e))
                .unwrap();
        }
        let started = events
            .iter()
            .filter(|e| matches!(e, PrepareEvent::PhaseStarted(_)))
            .count();
        let completed = events
            .iter()
            .filter(|e| matches!(e, PrepareEvent::PhaseCompleted(_, PhaseOutcome::Success { .. })))
            .count();
        assert_eq!(started, PreparePhase::ALL.len());
        assert_eq!(completed, PreparePhase::ALL.len());
    }

    #[test]
    fn settings_from_config() {
        let config: Config = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(<figment::providers::Toml as figment::providers::Format>::string(
                r#"
[release]
base_branch = "main"
on_multiple = "close-extras"

[git]
user_name = "Release Bot"

[github]
repository = "acme/widgets"
"#,
            ))
            .extract()
            .unwrap();

        let settings = PrepareSettings::from_config(&config);
        assert_eq!(settings.base_branch, "main");
        assert_eq!(settings.release_branch, DEFAULT_RELEASE_BRANCH);
        assert_eq!(settings.on_multiple, DuplicatePolicy::CloseExtras);
        assert_eq!(settings.identity.name, "Release Bot");
        assert_eq!(settings.identity.email, Identity::default().email);
        assert_eq!(settings.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(settings.version_command, "pnpm version-packages");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(PrepareOutcome::NoChangesets).unwrap();
        assert_eq!(json["status"], "no_changesets");

        let mut fx = fixture(&["brave-owls"]);
        let json = serde_json::to_value(fx.run().unwrap()).unwrap();
        assert_eq!(json["status"], "prepared");
        assert_eq!(json["version"], "2.0.0");
        assert_eq!(json["pull_request"]["action"], "created");
    }

    #[test]
    fn phase_display() {
        assert_eq!(PreparePhase::Inventory.to_string(), "inventory");
        assert_eq!(PreparePhase::PullRequest.to_string(), "pull request");
    }
}
