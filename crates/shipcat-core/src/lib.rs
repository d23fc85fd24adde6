//! Shipcat Core Library
//!
//! Chat- and timer-driven GitOps deployments: rewrite image tags in a
//! deployment repository (or hand a project to an apply tool), push a
//! branch, open the pull request and keep auto-deploy phases up to date.

pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod git;
pub mod gitops;
pub mod hosting;
pub mod notify;
pub mod overwrite;
pub mod project;
pub mod source;
pub mod watch;

mod process;

#[cfg(test)]
mod testing;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, ShipcatConfig};
    pub use crate::context::AppContext;

    // Projects
    pub use crate::project::{Phase, PhaseName, Project, ProjectCatalog};

    // Deployment
    pub use crate::deploy::{DeployExecutor, DeployModelDispatcher, DeployOptions};
    pub use crate::error::{DeployError, Result};
    pub use crate::gitops::{DeployStatus, GitOpsStrategy, PullRequestOutcome, Requester};

    // Watcher
    pub use crate::watch::{DeployWatcher, TickOutcome};
}
