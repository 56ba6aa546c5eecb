//! Core library for relbot.
//!
//! relbot turns pending changesets into a single release pull request. Each
//! run rebuilds a release branch from the base branch, runs the version
//! command, force-pushes the result and creates or updates one pull request
//! whose body is the new version's changelog section.
//!
//! # Modules
//!
//! - [`prepare`] - The release pipeline and its settings
//! - [`changeset`] - Pending changeset inventory
//! - [`git`] - Release branch operations ([`git::SourceControl`])
//! - [`bump`] - Running the version command ([`bump::VersionBumper`])
//! - [`artifacts`] - Reading `package.json` and `CHANGELOG.md`
//! - [`changelog`] - Extracting one version's changelog section
//! - [`github`] - Pull request API ([`github::PullRequestHost`])
//! - [`release_pr`] - Create-or-update of the release pull request
//! - [`reconcile`] - Generic "exactly one resource" convergence
//! - [`preflight`] - Environment checks
//! - [`config`] - Configuration loading and management
//! - [`error`] - Config errors and the error taxonomy
//!
//! # Quick Start
//!
//! ```no_run
//! use relbot_core::bump::CommandBumper;
//! use relbot_core::git::GitCli;
//! use relbot_core::github::{self, GhCli};
//! use relbot_core::{ConfigLoader, Pipeline, PrepareSettings};
//!
//! let root = camino::Utf8PathBuf::from(".");
//! let config = ConfigLoader::new().with_project_search(&root).load()?;
//! let settings = PrepareSettings::from_config(&config);
//! let repo = github::resolve_repo_slug(&root, settings.repository.as_deref(), &settings.remote)?;
//!
//! let mut pipeline = Pipeline::new(
//!     GitCli::new(root.clone(), settings.remote.clone()),
//!     CommandBumper::new(settings.version_command.clone()),
//!     GhCli::new(root.clone(), repo),
//! );
//! let outcome = pipeline.run(&root, &settings, |_| {})?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![deny(unsafe_code)]

pub mod artifacts;

pub mod bump;

pub mod changelog;

pub mod changeset;

pub mod config;

pub mod error;

pub mod git;

pub mod github;

pub mod preflight;

pub mod prepare;

pub mod reconcile;

pub mod release_pr;

pub use config::{Config, ConfigLoader, LogLevel};

pub use error::{ConfigError, ConfigResult, ErrorKind};

pub use prepare::{
    Pipeline, PrepareError, PrepareEvent, PrepareOutcome, PreparePhase, PrepareSettings,
};
