//! Reading the files the version command produced.
//!
//! After a bump the package directory must contain a `package.json` with
//! non-empty `name` and `version` fields and a `CHANGELOG.md`. A missing
//! file means the version command did not do its job.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Manifest file name inside the package directory.
pub const MANIFEST_FILE: &str = "package.json";

/// Changelog file name inside the package directory.
pub const CHANGELOG_FILE: &str = "CHANGELOG.md";

/// Errors from reading release artifacts.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// The file does not exist.
    #[error("{path} not found after running the version command")]
    NotFound {
        /// Expected location.
        path: Utf8PathBuf,
    },

    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest is not valid JSON or lacks `name`/`version`.
    #[error("invalid manifest {path}: {source}")]
    InvalidManifest {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// A required manifest field is empty.
    #[error("{path}: `{field}` is empty")]
    EmptyField {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Name of the empty field.
        field: &'static str,
    },
}

/// Result alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// The fields of `package.json` the release cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name, e.g. `ch-test-infra`.
    pub name: String,
    /// Version written by the version command.
    pub version: String,
}

impl PackageManifest {
    /// The version parsed as semver, if it is one.
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

/// Full text of the package changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogDocument {
    /// Where the text was read from.
    pub path: Utf8PathBuf,
    /// File contents.
    pub text: String,
}

/// Manifest and changelog read together after a bump.
#[derive(Debug, Clone)]
pub struct ReleaseArtifacts {
    /// Parsed `package.json`.
    pub manifest: PackageManifest,
    /// Raw `CHANGELOG.md`.
    pub changelog: ChangelogDocument,
}

/// Read `<package_dir>/package.json`.
#[instrument]
pub fn read_manifest(package_dir: &Utf8Path) -> ArtifactResult<PackageManifest> {
    let path = package_dir.join(MANIFEST_FILE);
    let text = read_required(&path)?;
    let manifest: PackageManifest =
        serde_json::from_str(&text).map_err(|source| ArtifactError::InvalidManifest {
            path: path.clone(),
            source,
        })?;

    if manifest.name.trim().is_empty() {
        return Err(ArtifactError::EmptyField { path, field: "name" });
    }
    if manifest.version.trim().is_empty() {
        return Err(ArtifactError::EmptyField {
            path,
            field: "version",
        });
    }

    if manifest.semver().is_none() {
        warn!(version = %manifest.version, "package version is not semver; using it verbatim");
    }
    debug!(name = %manifest.name, version = %manifest.version, "read manifest");
    Ok(manifest)
}

/// Read `<package_dir>/CHANGELOG.md`.
#[instrument]
pub fn read_changelog(package_dir: &Utf8Path) -> ArtifactResult<ChangelogDocument> {
    let path = package_dir.join(CHANGELOG_FILE);
    let text = read_required(&path)?;
    debug!(bytes = text.len(), "read changelog");
    Ok(ChangelogDocument { path, text })
}

/// Read both artifacts from `package_dir`.
pub fn read_artifacts(package_dir: &Utf8Path) -> ArtifactResult<ReleaseArtifacts> {
    Ok(ReleaseArtifacts {
        manifest: read_manifest(package_dir)?,
        changelog: read_changelog(package_dir)?,
    })
}

fn read_required(path: &Utf8Path) -> ArtifactResult<String> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
