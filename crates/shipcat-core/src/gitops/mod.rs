//! GitOps strategies: turn "deploy tag X of project P to phase Y" into a
//! pushed branch or an opened pull request.
//!
//! - [`DirectMutation`] rewrites manifests in the deployment repository
//! - [`DelegatedApply`] hands the project's own repository to an apply tool
//!   that opens the pull request itself

mod delegated;
mod direct;

pub use delegated::{
    AppliedPullRequest, ApplyInvocation, ApplyTool, CommandApplyTool, DelegatedApply,
    interpret_pull_requests,
};
pub use direct::DirectMutation;

use std::sync::Arc;

use crate::error::{DeployError, Result};
use crate::project::{Phase, Project};
use crate::source::{TagQuery, VersionSource};

/// Result category of a prepared deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    Success,
    /// The requested tag is already live; nothing was pushed.
    AlreadyDeployed,
    Failed,
}

/// Pull request opened on behalf of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    /// Hosting-service node id.
    pub id: String,
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestOutcome {
    pub status: DeployStatus,
    pub pull_request: Option<PullRequestRef>,
    /// Pushed branch, when the strategy produced one.
    pub branch: Option<String>,
}

impl PullRequestOutcome {
    pub fn already_deployed() -> Self {
        Self {
            status: DeployStatus::AlreadyDeployed,
            pull_request: None,
            branch: None,
        }
    }

    /// A pushed branch that still needs a pull request.
    pub fn pushed(branch: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Success,
            pull_request: None,
            branch: Some(branch.into()),
        }
    }

    pub fn opened(pull_request: PullRequestRef, branch: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Success,
            pull_request: Some(pull_request),
            branch: Some(branch.into()),
        }
    }

    /// Status reported to users for a finished attempt; errors are failures.
    pub fn status_of(result: &Result<Self>) -> DeployStatus {
        match result {
            Ok(outcome) => outcome.status,
            Err(_) => DeployStatus::Failed,
        }
    }
}

/// Person a deployment is prepared for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub github_login: Option<String>,
    /// Hosting-service node id; the apply tool assigns by id.
    pub github_node_id: Option<String>,
}

impl Requester {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            github_login: None,
            github_node_id: None,
        }
    }
}

/// Arguments of [`GitOpsStrategy::prepare`].
#[derive(Debug, Clone)]
pub struct PrepareRequest<'a> {
    pub project: &'a Project,
    /// Phase name or alias.
    pub phase: &'a str,
    /// Source branch the tag is looked up for.
    pub branch: &'a str,
    pub requester: &'a Requester,
    /// Explicit tag; looked up through the version source when `None`.
    pub tag: Option<&'a str>,
}

/// The closed set of ways a deployment can be prepared.
pub enum GitOpsStrategy {
    Direct(DirectMutation),
    Delegated(DelegatedApply),
}

impl GitOpsStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            GitOpsStrategy::Direct(_) => "direct",
            GitOpsStrategy::Delegated(_) => "delegated",
        }
    }

    fn version_source(&self) -> &Arc<dyn VersionSource> {
        match self {
            GitOpsStrategy::Direct(direct) => direct.version_source(),
            GitOpsStrategy::Delegated(delegated) => delegated.version_source(),
        }
    }

    /// Prepare a deployment of `request.project` to `request.phase`.
    pub async fn prepare(&self, request: &PrepareRequest<'_>) -> Result<PullRequestOutcome> {
        let project = request.project;
        let phase = find_phase(project, request.phase)?;
        let tag = match request.tag {
            Some(tag) => tag.to_string(),
            None => {
                let query = TagQuery::for_project(project, request.branch, phase.name);
                self.version_source().find_tag(&query).await?
            }
        };

        tracing::info!(
            project = %project.id,
            phase = %phase.name,
            tag = %tag,
            strategy = self.label(),
            requester = %request.requester.name,
            "Preparing deployment"
        );

        match self {
            GitOpsStrategy::Direct(direct) => direct.prepare(project, phase, &tag).await,
            GitOpsStrategy::Delegated(delegated) => {
                delegated
                    .prepare(project, phase, &tag, request.requester)
                    .await
            }
        }
    }
}

fn find_phase<'a>(project: &'a Project, name: &str) -> Result<&'a Phase> {
    project
        .find_phase(name)
        .ok_or_else(|| DeployError::PhaseNotFound {
            project: project.id.clone(),
            phase: name.to_string(),
        })
}
