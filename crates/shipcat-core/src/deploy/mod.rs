//! Deploy executors and the kind-based dispatcher.

mod gitops_model;

pub use gitops_model::GitOpsDeployModel;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeployError, Result};
use crate::gitops::{PullRequestOutcome, Requester};
use crate::project::Project;

/// How a deployment is carried out.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Source branch the image tag is looked up for.
    pub branch: String,
    /// Finish the deployment (merge) instead of leaving a pull request open.
    pub wait: bool,
    /// Explicit tag, skipping the version lookup.
    pub tag: Option<String>,
    pub requester: Requester,
}

impl DeployOptions {
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }
}

/// Deploys a project to one of its phases.
#[async_trait]
pub trait DeployExecutor: Send + Sync {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        options: &DeployOptions,
    ) -> Result<PullRequestOutcome>;
}

/// Resolves a phase `kind` to its executor.
#[derive(Clone, Default)]
pub struct DeployModelDispatcher {
    executors: BTreeMap<String, Arc<dyn DeployExecutor>>,
}

impl DeployModelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn DeployExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn DeployExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn find(&self, kind: &str) -> Result<Arc<dyn DeployExecutor>> {
        self.executors
            .get(kind)
            .cloned()
            .ok_or_else(|| DeployError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    /// Deploy through the executor registered for the phase's kind.
    pub async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        options: &DeployOptions,
    ) -> Result<PullRequestOutcome> {
        let kind = &project
            .find_phase(phase)
            .ok_or_else(|| DeployError::PhaseNotFound {
                project: project.id.clone(),
                phase: phase.to_string(),
            })?
            .kind;
        self.find(kind)?.deploy(project, phase, options).await
    }
}

impl std::fmt::Debug for DeployModelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployModelDispatcher")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
