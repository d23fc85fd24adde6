//! Error taxonomy for the deployment engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing or executing a deployment.
///
/// Nothing here is fatal to the process: callers log the error and treat the
/// attempt as having done nothing.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Clone, fetch or push against the remote failed.
    #[error("git {operation} against {remote} failed: {source}")]
    Transport {
        operation: &'static str,
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// The working tree contains changes the overwrites never produce.
    #[error("refusing to commit unexpected changes: {}", .paths.join(", "))]
    Drift { paths: Vec<String> },

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("phase '{phase}' not found for project '{project}'")]
    PhaseNotFound { project: String, phase: String },

    /// The apply tool produced more than one pull request.
    #[error("unsupported multiple pull requests ({count}) produced by the apply tool")]
    AmbiguousResult { count: usize },

    #[error("no deploy executor registered for kind '{0}'")]
    UnknownKind(String),

    /// `clean()` was pointed at a directory without a repository marker.
    #[error("refusing to remove {}: no .git marker found", .path.display())]
    UnsafeClean { path: PathBuf },

    #[error("the working copy has not been cloned yet")]
    NotCloned,

    #[error("failed to rewrite {path}: {message}")]
    Manifest { path: String, message: String },

    #[error("apply tool failed: {0}")]
    Apply(String),

    /// Local libgit2 failure (index, refs, checkout).
    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure reported by an external collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    pub(crate) fn transport(
        operation: &'static str,
        remote: impl Into<String>,
        source: git2::Error,
    ) -> Self {
        Self::Transport {
            operation,
            remote: remote.into(),
            source,
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
