//! Delegated apply: the project's own repository carries an apply-tool config
//! and the tool opens the deployment pull request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{PullRequestOutcome, PullRequestRef, Requester};
use crate::error::{DeployError, Result};
use crate::git::{GitCredentials, RemoteRepository, SourceControlOperator, Storage, lock_workdir};
use crate::process;
use crate::project::{Phase, Project, deploy_branch_name};
use crate::source::VersionSource;

/// Scratch directory handed to the apply tool, inside the clone.
const TOOL_TMPDIR: &str = ".applytmp";

/// Unit whose outputs are supplied instead of built.
const IMAGE_UNIT: &str = "image";

/// Unit skipped when triggered from here.
const PREREQ_UNIT: &str = "prereq";

/// Everything the apply tool needs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyInvocation {
    /// Root of the cloned project repository.
    pub workdir: PathBuf,
    /// Absolute path of the tool config.
    pub config_path: PathBuf,
    /// Tool environment; the phase name.
    pub environment: String,
    /// Pre-satisfied outputs per unit. A unit with no outputs is skipped.
    pub skipped_outputs: BTreeMap<String, BTreeMap<String, String>>,
    pub head_branch: String,
    pub tmpdir: PathBuf,
    pub git_username: String,
    pub token: String,
    pub assignee_ids: Vec<String>,
}

/// Pull request reported by the apply tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppliedPullRequest {
    /// Decimal pull request number, as printed by the tool.
    pub number: String,
    #[serde(rename = "nodeID", alias = "node_id")]
    pub node_id: String,
    #[serde(rename = "htmlURL", alias = "html_url")]
    pub html_url: String,
}

/// An external tool that turns a config plus an environment into pull
/// requests.
#[async_trait]
pub trait ApplyTool: Send + Sync {
    async fn apply(&self, invocation: &ApplyInvocation) -> anyhow::Result<Vec<AppliedPullRequest>>;
}

/// Runs the apply tool as a subprocess and reads its JSON report from stdout.
#[derive(Debug, Clone)]
pub struct CommandApplyTool {
    program: String,
}

#[derive(Debug, Deserialize)]
struct ApplyReport {
    #[serde(default, rename = "pullRequests", alias = "pull_requests")]
    pull_requests: Vec<AppliedPullRequest>,
}

impl CommandApplyTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ApplyTool for CommandApplyTool {
    async fn apply(&self, invocation: &ApplyInvocation) -> anyhow::Result<Vec<AppliedPullRequest>> {
        let skipped = serde_json::to_string(&invocation.skipped_outputs)
            .context("Failed to encode skipped outputs")?;

        let mut command = Command::new(&self.program);
        command
            .arg("apply")
            .arg("--env")
            .arg(&invocation.environment)
            .arg("--config")
            .arg(&invocation.config_path)
            .arg("--skipped-jobs-outputs")
            .arg(skipped)
            .current_dir(&invocation.workdir)
            .env("TMPDIR", &invocation.tmpdir)
            .env("GITHUB_TOKEN", &invocation.token)
            .env("KANVAS_PULLREQUEST_HEAD", &invocation.head_branch)
            .env("KANVAS_GIT_USERNAME", &invocation.git_username);
        if !invocation.assignee_ids.is_empty() {
            command.env(
                "KANVAS_PULLREQUEST_ASSIGNEE_IDS",
                invocation.assignee_ids.join(","),
            );
        }

        let output = process::run(command, process::APPLY_TIMEOUT, &self.program).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let report: ApplyReport =
            serde_json::from_str(stdout.trim()).context("Failed to parse apply tool report")?;
        Ok(report.pull_requests)
    }
}

/// Prepares deployments by cloning the project repository and running the
/// apply tool against its config.
pub struct DelegatedApply {
    versions: Arc<dyn VersionSource>,
    tool: Arc<dyn ApplyTool>,
    credentials: GitCredentials,
    storage: Storage,
    host: String,
    org: String,
    config_file: String,
}

impl DelegatedApply {
    pub fn new(
        versions: Arc<dyn VersionSource>,
        tool: Arc<dyn ApplyTool>,
        credentials: GitCredentials,
        storage: Storage,
    ) -> Self {
        Self {
            versions,
            tool,
            credentials,
            storage,
            host: "github.com".to_string(),
            org: String::new(),
            config_file: "kanvas.yaml".to_string(),
        }
    }

    /// Hosting service and organization the project repositories live under.
    pub fn with_hosting(mut self, host: impl Into<String>, org: impl Into<String>) -> Self {
        self.host = host.into();
        self.org = org.into();
        self
    }

    pub fn with_config_file(mut self, config_file: impl Into<String>) -> Self {
        self.config_file = config_file.into();
        self
    }

    pub(super) fn version_source(&self) -> &Arc<dyn VersionSource> {
        &self.versions
    }

    fn remote_for(&self, project: &Project) -> RemoteRepository {
        let url = if self.org.is_empty() {
            project.repository.clone()
        } else {
            project.repository_url(&self.host, &self.org)
        };
        RemoteRepository::new(url, project.default_branch.clone())
    }

    pub(super) async fn prepare(
        &self,
        project: &Project,
        phase: &Phase,
        tag: &str,
        requester: &Requester,
    ) -> Result<PullRequestOutcome> {
        let head = deploy_branch_name(&project.id, phase.name, tag);
        let operator =
            SourceControlOperator::new(self.remote_for(project), self.credentials.clone(), &self.storage)?;
        let _workdir = lock_workdir(operator.workdir()).await;

        let (mut operator, checkout) = blocking(move || {
            let mut operator = operator;
            let result = operator
                .clone_remote()
                .and_then(|()| operator.checkout_default_branch());
            (operator, result)
        })
        .await?;

        let applied = match checkout {
            Ok(()) => {
                let invocation = self.invocation(operator.workdir(), phase, tag, &head, requester);
                self.run_tool(invocation).await
            }
            Err(err) => Err(err),
        };

        match blocking(move || operator.clean()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) | Err(err) => {
                tracing::warn!(project = %project.id, error = %err, "Failed to clean project clone");
            }
        }

        let pull_requests = applied?;
        interpret_pull_requests(&pull_requests, &head)
    }

    fn invocation(
        &self,
        workdir: &Path,
        phase: &Phase,
        tag: &str,
        head: &str,
        requester: &Requester,
    ) -> ApplyInvocation {
        let mut skipped_outputs = BTreeMap::new();
        skipped_outputs.insert(
            IMAGE_UNIT.to_string(),
            BTreeMap::from([
                ("id".to_string(), tag.to_string()),
                ("tag".to_string(), tag.to_string()),
            ]),
        );
        skipped_outputs.insert(PREREQ_UNIT.to_string(), BTreeMap::new());

        ApplyInvocation {
            workdir: workdir.to_path_buf(),
            config_path: workdir.join(config_relative_path(&phase.path, &self.config_file)),
            environment: phase.name.to_string(),
            skipped_outputs,
            head_branch: head.to_string(),
            tmpdir: workdir.join(TOOL_TMPDIR),
            git_username: self.credentials.username.clone(),
            token: self.credentials.token.clone(),
            assignee_ids: requester.github_node_id.iter().cloned().collect(),
        }
    }

    async fn run_tool(&self, invocation: ApplyInvocation) -> Result<Vec<AppliedPullRequest>> {
        tokio::fs::create_dir_all(&invocation.tmpdir).await?;
        tracing::debug!(
            config = %invocation.config_path.display(),
            environment = %invocation.environment,
            head = %invocation.head_branch,
            "Running apply tool"
        );
        self.tool
            .apply(&invocation)
            .await
            .map_err(|e| DeployError::Apply(format!("{:#}", e)))
    }
}

/// Config path relative to the repository root.
///
/// An empty phase path means the default file at the root; a directory gets
/// the default file name appended.
pub(crate) fn config_relative_path(phase_path: &str, config_file: &str) -> PathBuf {
    if phase_path.is_empty() {
        return PathBuf::from(config_file);
    }
    let path = Path::new(phase_path);
    if path.file_name().is_some_and(|name| name == config_file) {
        path.to_path_buf()
    } else {
        path.join(config_file)
    }
}

/// Map the pull requests reported by the apply tool onto an outcome.
///
/// None means the tag is already deployed; more than one is unsupported.
pub fn interpret_pull_requests(
    pull_requests: &[AppliedPullRequest],
    head: &str,
) -> Result<PullRequestOutcome> {
    match pull_requests {
        [] => Ok(PullRequestOutcome::already_deployed()),
        [pr] => {
            let number = pr.number.trim().parse::<u64>().map_err(|e| {
                DeployError::Apply(format!("invalid pull request number '{}': {}", pr.number, e))
            })?;
            Ok(PullRequestOutcome::opened(
                PullRequestRef {
                    id: pr.node_id.clone(),
                    number,
                    url: pr.html_url.clone(),
                },
                head,
            ))
        }
        many => {
            tracing::error!(count = many.len(), head = %head, "Apply tool opened several pull requests");
            Err(DeployError::AmbiguousResult { count: many.len() })
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DeployError::Other(anyhow::anyhow!("git task panicked: {}", e)))
}
