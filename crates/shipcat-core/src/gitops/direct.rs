//! Direct mutation of the deployment repository.

use std::sync::Arc;

use chrono::Local;

use super::PullRequestOutcome;
use crate::error::Result;
use crate::git::{ImageTagChange, PushOutcome, SharedOperator};
use crate::overwrite::Overwrite;
use crate::project::{Phase, Project};
use crate::source::VersionSource;

/// Rewrites the phase manifests and pushes a deploy branch.
///
/// The pushed branch still needs a pull request; see
/// `deploy::GitOpsDeployModel`.
pub struct DirectMutation {
    operator: SharedOperator,
    versions: Arc<dyn VersionSource>,
}

impl DirectMutation {
    pub fn new(operator: SharedOperator, versions: Arc<dyn VersionSource>) -> Self {
        Self { operator, versions }
    }

    pub(super) fn version_source(&self) -> &Arc<dyn VersionSource> {
        &self.versions
    }

    pub(super) async fn prepare(
        &self,
        project: &Project,
        phase: &Phase,
        tag: &str,
    ) -> Result<PullRequestOutcome> {
        let project_id = project.id.clone();
        let phase_name = phase.name;
        let path = phase.path.clone();
        let image = project.image_name().to_string();
        let tag = tag.to_string();
        let cache_stamp = Overwrite::cache_prefix(Local::now());

        let outcome = self
            .operator
            .run(move |operator| {
                let change = ImageTagChange {
                    project_id: &project_id,
                    phase: phase_name,
                    path: &path,
                    image: &image,
                    tag: &tag,
                };
                operator.push_image_tag(&change, cache_stamp)
            })
            .await?;

        Ok(match outcome {
            PushOutcome::Pushed { branch, commit } => {
                tracing::info!(
                    project = %project.id,
                    phase = %phase.name,
                    branch = %branch,
                    commit = %commit,
                    "Pushed deploy branch"
                );
                PullRequestOutcome::pushed(branch)
            }
            PushOutcome::NothingToCommit => {
                tracing::info!(
                    project = %project.id,
                    phase = %phase.name,
                    "Manifests already at requested tag"
                );
                PullRequestOutcome::already_deployed()
            }
        })
    }
}
