//! Revision tracker reading the deployed tag out of the deployment repository.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::RevisionTracker;
use crate::git::SharedOperator;
use crate::overwrite::Kustomization;
use crate::project::{Phase, Project};

/// Reads `newTag` of the project's image from the phase manifest on the
/// default branch.
///
/// Only phases of `kind` keep a manifest in the deployment repository.
#[derive(Debug, Clone)]
pub struct ManifestRevisionTracker {
    operator: SharedOperator,
    kind: String,
}

impl ManifestRevisionTracker {
    pub fn new(operator: SharedOperator, kind: impl Into<String>) -> Self {
        Self {
            operator,
            kind: kind.into(),
        }
    }
}

#[async_trait]
impl RevisionTracker for ManifestRevisionTracker {
    fn tracks(&self, phase: &Phase) -> bool {
        phase.kind == self.kind
    }

    async fn current_revision(&self, project: &Project, phase: &Phase) -> Result<String> {
        let path = phase.path.clone();
        let content = self
            .operator
            .run(move |operator| {
                operator.checkout_default_branch()?;
                operator.read_file(&path)
            })
            .await?
            .with_context(|| format!("Manifest {} does not exist", phase.path))?;

        let manifest: Kustomization = serde_yaml_ng::from_slice(&content)
            .with_context(|| format!("Failed to parse manifest {}", phase.path))?;
        manifest
            .image_tag(project.image_name())
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "Image '{}' has no tag in {}",
                    project.image_name(),
                    phase.path
                )
            })
    }
}
