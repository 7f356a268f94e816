//! Error and warning types surfaced by the engine.
//!
//! Three kinds of failure: load-time failures, runtime semantic errors, and
//! recoverable warnings. [`Error::Load`] is fatal to
//! [`crate::Story::from_json`], [`Error::Story`] is a `StoryException`
//! captured into `current_errors` during `continue_()`, and
//! [`Error::Assertion`] marks an engine invariant violation (a bug, not a
//! story-authoring mistake).

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The compiled JSON could not be loaded (bad version, missing root,
    /// malformed token).
    #[error("load error: {0}")]
    Load(String),

    /// A runtime semantic error (`StoryException`): type mismatches, divert
    /// resolution failures, stack mismatches, undeclared global assignment,
    /// invalid external function binding.
    #[error("{0}")]
    Story(String),

    /// A value of the wrong type reached an operation that required another.
    #[error("type error: expected {expected}, got {got}")]
    Type { expected: String, got: String },

    /// An engine invariant was violated. These are bugs in `inkrs`, never in
    /// the authored story.
    #[error("internal assertion failed: {0}")]
    Assertion(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable condition collected into `current_warnings` rather than
/// aborting execution: use of a default value for a missing variable,
/// approximate path resolution, an ink-version mismatch within the
/// supported range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
