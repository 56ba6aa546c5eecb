//! Ensuring an external resource exists exactly once in a desired state.
//!
//! [`ensure`] observes the matching resources, then creates one when none
//! exist or updates the existing one in place. When more than one already
//! matches, [`DuplicatePolicy`] decides whether the extras are left alone
//! or retired.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// How many matching resources were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed<T> {
    /// None match.
    Absent,
    /// Exactly one matches.
    Single(T),
    /// More than one matches, in the order the backend listed them.
    Multiple(Vec<T>),
}

impl<T> From<Vec<T>> for Observed<T> {
    fn from(mut found: Vec<T>) -> Self {
        match found.len() {
            0 => Self::Absent,
            1 => Self::Single(found.remove(0)),
            _ => Self::Multiple(found),
        }
    }
}

/// What to do with extra matches when more than one exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Update the first listed match; leave the rest untouched.
    #[default]
    UpdateFirst,
    /// Update the first listed match and retire the rest.
    CloseExtras,
}

impl std::fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateFirst => write!(f, "update-first"),
            Self::CloseExtras => write!(f, "close-extras"),
        }
    }
}

/// A backend that can observe and mutate one kind of resource.
pub trait Reconcile {
    /// The resource as the backend reports it.
    type Resource;
    /// Backend error.
    type Error;

    /// List the resources that should collapse into a single one.
    fn observe(&mut self) -> Result<Vec<Self::Resource>, Self::Error>;

    /// Create the resource in its desired state.
    fn create(&mut self) -> Result<Self::Resource, Self::Error>;

    /// Overwrite `existing` with the desired state.
    fn update(&mut self, existing: &Self::Resource) -> Result<Self::Resource, Self::Error>;

    /// Retire a surplus match.
    fn retire(&mut self, extra: &Self::Resource) -> Result<(), Self::Error>;
}

/// The write [`ensure`] performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled<T> {
    /// Nothing matched; a new resource was created.
    Created(T),
    /// An existing resource was brought to the desired state.
    Updated {
        /// The updated resource.
        resource: T,
        /// Extra matches that were left in place.
        duplicates: Vec<T>,
        /// Extra matches that were retired.
        retired: Vec<T>,
    },
}

impl<T> Reconciled<T> {
    /// The resource now in the desired state.
    pub fn resource(&self) -> &T {
        match self {
            Self::Created(resource) | Self::Updated { resource, .. } => resource,
        }
    }
}

/// Converge `backend` to exactly one resource in the desired state.
///
/// Performs one create or one update, plus one retire per extra match under
/// [`DuplicatePolicy::CloseExtras`]. Errors abort immediately.
#[instrument(skip(backend))]
pub fn ensure<R: Reconcile>(
    backend: &mut R,
    policy: DuplicatePolicy,
) -> Result<Reconciled<R::Resource>, R::Error> {
    match Observed::from(backend.observe()?) {
        Observed::Absent => {
            debug!("no existing resource");
            let created = backend.create()?;
            info!("created resource");
            Ok(Reconciled::Created(created))
        }
        Observed::Single(existing) => {
            let resource = backend.update(&existing)?;
            info!("updated existing resource");
            Ok(Reconciled::Updated {
                resource,
                duplicates: Vec::new(),
                retired: Vec::new(),
            })
        }
        Observed::Multiple(mut found) => {
            let extras = found.split_off(1);
            warn!(extra = extras.len(), %policy, "more than one matching resource");
            let resource = backend.update(&found[0])?;

            match policy {
                DuplicatePolicy::UpdateFirst => Ok(Reconciled::Updated {
                    resource,
                    duplicates: extras,
                    retired: Vec::new(),
                }),
                DuplicatePolicy::CloseExtras => {
                    for extra in &extras {
                        backend.retire(extra)?;
                    }
                    info!(retired = extras.len(), "retired extra resources");
                    Ok(Reconciled::Updated {
                        resource,
                        duplicates: Vec::new(),
                        retired: extras,
                    })
                }
            }
        }
    }
}
