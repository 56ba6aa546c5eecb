//! Pending changeset inventory.
//!
//! Changesets are Markdown files in the changeset directory (`.changeset/`
//! by default) with a front-matter block naming the packages they bump:
//!
//! ```text
//! ---
//! "ch-test-infra": minor
//! ---
//!
//! Add support for nested fixtures
//! ```
//!
//! The release pipeline only cares whether any exist. The parsed entries
//! are surfaced by `relbot status`.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// Default changeset directory, relative to the repository root.
pub const DEFAULT_CHANGESET_DIR: &str = ".changeset";

/// Errors from reading the changeset directory.
#[derive(Error, Debug)]
pub enum ChangesetError {
    /// The changeset directory could not be listed.
    #[error("failed to read changeset directory {path}: {source}")]
    ReadDir {
        /// The directory that was being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A changeset file could not be read.
    #[error("failed to read changeset {path}: {source}")]
    ReadFile {
        /// The file that was being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for changeset operations.
pub type ChangesetResult<T> = Result<T, ChangesetError>;

/// A package bump requested by a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetRelease {
    /// Package name as written in the front matter.
    pub package: String,
    /// Bump type (`major`, `minor`, `patch`, or whatever the tool accepts).
    pub bump: String,
}

/// One pending changeset file.
#[derive(Debug, Clone, Serialize)]
pub struct PendingChangeset {
    /// File stem, e.g. `brave-owls-sing`.
    pub id: String,
    /// Full path to the file.
    pub path: Utf8PathBuf,
    /// Packages and bump types from the front matter.
    pub releases: Vec<ChangesetRelease>,
    /// Body text after the front matter, trimmed.
    pub summary: String,
}

/// Reads pending changesets from a repository.
#[derive(Debug, Clone)]
pub struct ChangesetInventory {
    dir: Utf8PathBuf,
}

impl ChangesetInventory {
    /// Inventory for `<repo_root>/<changeset_dir>`.
    pub fn new(repo_root: &Utf8Path, changeset_dir: &str) -> Self {
        Self {
            dir: repo_root.join(changeset_dir),
        }
    }

    /// The directory being inventoried.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Number of pending changesets.
    ///
    /// Fails if the directory is missing or unreadable.
    #[instrument(skip(self), fields(dir = %self.dir))]
    pub fn count(&self) -> ChangesetResult<usize> {
        let count = self.changeset_paths()?.len();
        debug!(count, "counted pending changesets");
        Ok(count)
    }

    /// Read and parse every pending changeset, sorted by id.
    #[instrument(skip(self), fields(dir = %self.dir))]
    pub fn read(&self) -> ChangesetResult<Vec<PendingChangeset>> {
        let mut changesets = Vec::new();
        for path in self.changeset_paths()? {
            let text = std::fs::read_to_string(&path).map_err(|source| {
                ChangesetError::ReadFile {
                    path: path.clone(),
                    source,
                }
            })?;
            let id = path.file_stem().unwrap_or_default().to_string();
            let (releases, summary) = parse_changeset(&text);
            changesets.push(PendingChangeset {
                id,
                path,
                releases,
                summary,
            });
        }
        debug!(count = changesets.len(), "read pending changesets");
        Ok(changesets)
    }

    fn changeset_paths(&self) -> ChangesetResult<Vec<Utf8PathBuf>> {
        let read_dir_err = |source| ChangesetError::ReadDir {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        for entry in self.dir.read_dir_utf8().map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let path = entry.path();
            if is_changeset_file(path) {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn is_changeset_file(path: &Utf8Path) -> bool {
    path.is_file()
        && path.extension() == Some("md")
        && !path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("README.md"))
}

/// Split a changeset into its front-matter releases and summary.
///
/// Files without a front-matter block yield no releases and the whole text
/// as summary.
pub fn parse_changeset(text: &str) -> (Vec<ChangesetRelease>, String) {
    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some("---") {
        return (Vec::new(), text.trim().to_string());
    }

    let mut releases = Vec::new();
    let mut closed = false;
    for line in lines.by_ref() {
        let line = line.trim();
        if line == "---" {
            closed = true;
            break;
        }
        if let Some((package, bump)) = line.split_once(':') {
            let package = package.trim().trim_matches(|c| c == '"' || c == '\'');
            let bump = bump.trim().trim_matches(|c| c == '"' || c == '\'');
            if !package.is_empty() && !bump.is_empty() {
                releases.push(ChangesetRelease {
                    package: package.to_string(),
                    bump: bump.to_string(),
                });
            }
        }
    }

    if !closed {
        return (Vec::new(), text.trim().to_string());
    }

    let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    (releases, summary)
}
