//! Environment checks run before preparing a release.
//!
//! Verifies the repository, the external binaries the pipeline shells out
//! to, and the directories it reads. Returns structured results that the
//! CLI formats.

use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::bump::CommandBumper;
use crate::git;
use crate::prepare::PrepareSettings;

/// A single check result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Human-readable name of the check.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Reason for failure, or confirmation.
    pub message: String,
}

impl CheckResult {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Full preflight report.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Individual check results.
    pub checks: Vec<CheckResult>,
    /// Whether all checks passed.
    pub all_passed: bool,
}

/// Run every check against the repository at `root`.
#[instrument(skip(settings), fields(%root))]
pub fn run_preflight(root: &Utf8Path, settings: &PrepareSettings) -> PreflightReport {
    let mut checks = vec![
        check_binary("git", "git"),
        check_git_repo(root),
        check_binary("GitHub CLI", "gh"),
        check_version_command(&settings.version_command),
        check_dir(
            "Changeset directory",
            root,
            Utf8Path::new(&settings.changeset_dir),
        ),
        check_dir("Package directory", root, &settings.package_dir),
    ];

    if let Ok(Some(url)) = git::remote_url(root, &settings.remote) {
        checks.push(CheckResult::pass(
            "Remote",
            format!("{} -> {url}", settings.remote),
        ));
    } else {
        checks.push(CheckResult::fail(
            "Remote",
            format!("remote '{}' is not configured", settings.remote),
        ));
    }

    let all_passed = checks.iter().all(|c| c.passed);
    debug!(all_passed, check_count = checks.len(), "preflight complete");
    PreflightReport { checks, all_passed }
}

fn check_binary(name: &str, binary: &str) -> CheckResult {
    match which::which(binary) {
        Ok(path) => CheckResult::pass(name, format!("found at {}", path.display())),
        Err(_) => CheckResult::fail(name, format!("`{binary}` not found on PATH")),
    }
}

fn check_git_repo(root: &Utf8Path) -> CheckResult {
    const NAME: &str = "Git repository";
    match git::is_inside_repo(root) {
        Ok(true) => CheckResult::pass(NAME, "inside a git work tree"),
        Ok(false) => CheckResult::fail(NAME, "not inside a git work tree"),
        Err(e) => CheckResult::fail(NAME, format!("failed to check: {e}")),
    }
}

fn check_version_command(command: &str) -> CheckResult {
    const NAME: &str = "Version command";
    match CommandBumper::new(command).program() {
        Some(program) => match which::which(program) {
            Ok(_) => CheckResult::pass(NAME, format!("`{command}`")),
            Err(_) => CheckResult::fail(NAME, format!("`{program}` not found on PATH")),
        },
        None => CheckResult::fail(NAME, "version command is empty"),
    }
}

fn check_dir(name: &str, root: &Utf8Path, rel: &Utf8Path) -> CheckResult {
    let path = root.join(rel);
    if path.is_dir() {
        CheckResult::pass(name, rel.to_string())
    } else {
        CheckResult::fail(name, format!("{rel} does not exist"))
    }
}
