use thiserror::Error;

use crate::solver::Graph;

#[derive(Error, Debug)]
pub enum Error {
    // Version, compat and range parsing
    #[error(transparent)]
    Version(#[from] spk_version::Error),

    // Name, identifier and request parsing
    #[error("Failed to parse {kind} \"{given}\": {reason}")]
    Parse {
        kind: &'static str,
        given: String,
        reason: String,
    },

    // Spec invariant violations
    #[error("Invalid package spec: {0}")]
    Validation(String),

    // Request merging
    #[error("Conflicting requests for {name}: {reason}")]
    ConflictingRequests { name: String, reason: String },

    // No build or source candidate exists at any repository
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    // Search exhausted; the graph holds the full decision history
    #[error("Failed to resolve: {reason}")]
    SolverFailed { reason: String, graph: Box<Graph> },

    // Passthrough from repository implementations
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Failed to parse spec file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(kind: &'static str, given: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::Parse {
            kind,
            given: given.into(),
            reason: reason.into(),
        }
    }

    /// The process exit code for this error when surfaced by a CLI:
    /// 1 for a failed solve, 2 for invalid input.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::SolverFailed { .. } | Error::Repository(_) | Error::Io(_) => 1,
            Error::Version(_)
            | Error::Parse { .. }
            | Error::Validation(_)
            | Error::ConflictingRequests { .. }
            | Error::PackageNotFound(_)
            | Error::Yaml(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
