use std::sync::Arc;

use async_trait::async_trait;

use super::{DeployExecutor, DeployOptions};
use crate::error::Result;
use crate::gitops::{DeployStatus, GitOpsStrategy, PrepareRequest, PullRequestOutcome};
use crate::hosting::{PullRequestDraft, PullRequestHost};
use crate::project::Project;

/// Executor backed by a GitOps strategy.
///
/// Branches pushed without a pull request get one opened against
/// `base_branch`; with `wait` the pull request is merged.
pub struct GitOpsDeployModel {
    strategy: GitOpsStrategy,
    host: Arc<dyn PullRequestHost>,
    base_branch: String,
}

impl GitOpsDeployModel {
    pub fn new(
        strategy: GitOpsStrategy,
        host: Arc<dyn PullRequestHost>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            host,
            base_branch: base_branch.into(),
        }
    }
}

#[async_trait]
impl DeployExecutor for GitOpsDeployModel {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        options: &DeployOptions,
    ) -> Result<PullRequestOutcome> {
        let request = PrepareRequest {
            project,
            phase,
            branch: &options.branch,
            requester: &options.requester,
            tag: options.tag.as_deref(),
        };
        let mut outcome = self.strategy.prepare(&request).await?;
        if outcome.status != DeployStatus::Success {
            return Ok(outcome);
        }

        if outcome.pull_request.is_none()
            && let Some(branch) = &outcome.branch
        {
            let draft = PullRequestDraft {
                head: branch.clone(),
                base: self.base_branch.clone(),
                title: format!("Deploy {} to {}", project.id, phase),
                body: format!(
                    "Requested by {} from `{}`.",
                    display_requester(&options.requester.name),
                    options.branch
                ),
                assignee: options.requester.github_login.clone(),
            };
            outcome.pull_request = Some(self.host.open_pull_request(&draft).await?);
        }

        if options.wait
            && let Some(pull_request) = &outcome.pull_request
        {
            self.host.merge_pull_request(pull_request).await?;
        }

        Ok(outcome)
    }
}

fn display_requester(name: &str) -> &str {
    if name.is_empty() { "shipcat" } else { name }
}
