//! Error types for pipeline construction and execution.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors fall into
//! a few broad groups:
//!
//! - **Configuration** - missing or invalid options, unknown factory types.
//!   These are raised while a stage is constructed and prevent startup.
//! - **Capacity** - an item is larger than a buffer can ever hold, or a
//!   buffer cannot accept an item even after it was drained.
//! - **Collaborator** - lock store, file, JSON and user-defined failures.
//! - **Flow** - cancellation and deadline expiry.
//!
//! Stage implementations wrap the errors they return with their configured
//! id via [`Error::transform`], so an error that surfaces from a deeply
//! nested sub-pipeline still names every stage it passed through.

use crate::kv::LockError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required configuration option was not provided
    #[error("{0}: missing required option")]
    MissingOption(String),

    /// A configuration option was provided but is not usable
    #[error("{option}: invalid option: {reason}")]
    InvalidOption { option: String, reason: String },

    /// The factory has no constructor registered for this type
    #[error("{kind} {name}: invalid factory input")]
    UnknownType { kind: &'static str, name: String },

    /// A single item is larger than the buffer's size bound
    #[error("item size {size} exceeds batch size limit {limit}")]
    SizeLimit { size: usize, limit: usize },

    /// An item could not be added to a freshly drained buffer
    #[error("batch is misconfigured: item rejected by an empty batch")]
    BatchMisconfigured,

    /// The retry ceiling was exceeded
    #[error("retry limit reached")]
    RetryLimitReached,

    /// A per-object stage received an array value
    #[error("{0}: input is an array")]
    ArrayInput(String),

    /// The payload could not be addressed as JSON
    #[error("message must be JSON object")]
    InvalidObject,

    /// A value path could not be applied to the payload
    #[error("{path}: invalid path: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A lock store call failed
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A condition could not be evaluated
    #[error("condition: {0}")]
    Condition(String),

    /// Error raised by a stage, prefixed with the stage id
    #[error("transform {id}: {source}")]
    Transform {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Anything raised by user-provided collaborators
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap `source` with the id of the stage that produced it.
    pub fn transform(id: impl Into<String>, source: Error) -> Self {
        Error::Transform {
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn missing(option: impl Into<String>) -> Self {
        Error::MissingOption(option.into())
    }

    pub fn invalid(option: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::InvalidOption {
            option: option.into(),
            reason: reason.to_string(),
        }
    }

    /// Strip every [`Error::Transform`] layer and return the innermost error.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Transform { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the root cause is a configuration problem.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self.root(),
            Error::MissingOption(_) | Error::InvalidOption { .. } | Error::UnknownType { .. }
        )
    }
}
