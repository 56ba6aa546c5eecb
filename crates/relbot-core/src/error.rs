//! Error types for relbot-core

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when working with configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Coarse classification of a failed pipeline step.
///
/// Every module error maps onto exactly one of these, so callers can report
/// a failure without matching on module-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Filesystem read or write failed.
    Io,
    /// The version command exited non-zero or could not be started.
    ExternalTool,
    /// An artifact the version command should have produced is missing.
    NotFound,
    /// The changelog has no section for the bumped version.
    SectionNotFound,
    /// `git` or the code-hosting API failed.
    Transport,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "io"),
            Self::ExternalTool => write!(f, "external tool"),
            Self::NotFound => write!(f, "not found"),
            Self::SectionNotFound => write!(f, "section not found"),
            Self::Transport => write!(f, "transport"),
        }
    }
}
