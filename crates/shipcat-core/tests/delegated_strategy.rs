#[path = "support/git.rs"]
mod git_support;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use shipcat_core::error::DeployError;
use shipcat_core::git::{GitCredentials, Storage};
use shipcat_core::gitops::{
    AppliedPullRequest, ApplyInvocation, ApplyTool, DelegatedApply, DeployStatus, GitOpsStrategy,
    PrepareRequest, PullRequestOutcome, Requester,
};
use shipcat_core::project::{Phase, PhaseName, Project, RegistryCoordinates};
use shipcat_core::source::{TagQuery, VersionSource};

use git_support::BareRemote;

struct NoLookup;

#[async_trait]
impl VersionSource for NoLookup {
    async fn find_tag(&self, _query: &TagQuery) -> anyhow::Result<String> {
        anyhow::bail!("tag lookups are not expected")
    }
}

/// Apply tool that records what it saw and reports `count` pull requests.
struct ScriptedTool {
    count: usize,
    seen: Mutex<Vec<(ApplyInvocation, bool, bool)>>,
}

impl ScriptedTool {
    fn reporting(count: usize) -> Arc<Self> {
        Arc::new(Self {
            count,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ApplyTool for ScriptedTool {
    async fn apply(&self, invocation: &ApplyInvocation) -> anyhow::Result<Vec<AppliedPullRequest>> {
        let config_exists = invocation.config_path.is_file();
        let tmpdir_exists = invocation.tmpdir.is_dir();
        self.seen
            .lock()
            .push((invocation.clone(), config_exists, tmpdir_exists));
        Ok((1..=self.count)
            .map(|n| AppliedPullRequest {
                number: (100 + n).to_string(),
                node_id: format!("PR_{}", n),
                html_url: format!("https://github.com/acme/config/pull/{}", 100 + n),
            })
            .collect())
    }
}

fn project(remote: &BareRemote) -> Project {
    Project {
        id: "web".to_string(),
        alias: Vec::new(),
        repository: remote.url(),
        default_branch: "main".to_string(),
        image: None,
        registry: RegistryCoordinates {
            registry_id: String::new(),
            repository: "org/web".to_string(),
            tag_pattern: ".*".to_string(),
            target_pattern: None,
        },
        disable_branch_deploy: false,
        phases: vec![Phase {
            name: PhaseName::Production,
            kind: "apply".to_string(),
            path: "deploy".to_string(),
            auto_deploy: false,
            notify_channel: None,
            disable_branch_deploy: false,
        }],
    }
}

fn remote() -> BareRemote {
    BareRemote::seeded(&[("deploy/kanvas.yaml", "components: {}\n")])
}

async fn prepare(
    remote: &BareRemote,
    tool: Arc<ScriptedTool>,
    storage: Storage,
) -> shipcat_core::error::Result<PullRequestOutcome> {
    let strategy = GitOpsStrategy::Delegated(DelegatedApply::new(
        Arc::new(NoLookup),
        tool,
        GitCredentials::new("shipcat", "secret-token"),
        storage,
    ));
    let project = project(remote);
    let mut requester = Requester::new("bob");
    requester.github_node_id = Some("MDQ6VXNlcjE=".to_string());

    strategy
        .prepare(&PrepareRequest {
            project: &project,
            phase: "prd",
            branch: "main",
            requester: &requester,
            tag: Some("main-abc123"),
        })
        .await
}

#[tokio::test]
async fn single_pull_request_is_success() {
    let remote = remote();
    let tool = ScriptedTool::reporting(1);

    let outcome = prepare(&remote, tool.clone(), Storage::Scratch)
        .await
        .unwrap();

    assert_eq!(outcome.status, DeployStatus::Success);
    assert_eq!(
        outcome.branch.as_deref(),
        Some("bot/docker-image-tag-web-production-main-abc123")
    );
    let pull_request = outcome.pull_request.unwrap();
    assert_eq!(pull_request.number, 101);
    assert_eq!(pull_request.id, "PR_1");
    assert_eq!(pull_request.url, "https://github.com/acme/config/pull/101");
}

#[tokio::test]
async fn invocation_carries_conventions() {
    let remote = remote();
    let tool = ScriptedTool::reporting(1);

    prepare(&remote, tool.clone(), Storage::Scratch)
        .await
        .unwrap();

    let seen = tool.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    let (invocation, config_exists, tmpdir_exists) = &seen[0];
    assert!(config_exists);
    assert!(tmpdir_exists);
    assert!(invocation.config_path.ends_with("deploy/kanvas.yaml"));
    assert!(invocation.tmpdir.starts_with(&invocation.workdir));
    assert_eq!(invocation.environment, "production");
    assert_eq!(
        invocation.head_branch,
        "bot/docker-image-tag-web-production-main-abc123"
    );
    assert_eq!(invocation.token, "secret-token");
    assert_eq!(invocation.assignee_ids, vec!["MDQ6VXNlcjE=".to_string()]);

    let image = &invocation.skipped_outputs["image"];
    assert_eq!(image["tag"], "main-abc123");
    assert_eq!(image["id"], "main-abc123");
    assert!(invocation.skipped_outputs["prereq"].is_empty());
}

#[tokio::test]
async fn no_pull_requests_means_already_deployed() {
    let remote = remote();
    let outcome = prepare(&remote, ScriptedTool::reporting(0), Storage::Scratch)
        .await
        .unwrap();

    assert_eq!(outcome.status, DeployStatus::AlreadyDeployed);
    assert!(outcome.pull_request.is_none());
}

#[tokio::test]
async fn several_pull_requests_fail_as_ambiguous() {
    let remote = remote();
    let result = prepare(&remote, ScriptedTool::reporting(2), Storage::Scratch).await;

    assert!(matches!(result, Err(DeployError::AmbiguousResult { count: 2 })));
    assert_eq!(PullRequestOutcome::status_of(&result), DeployStatus::Failed);
}

#[tokio::test]
async fn persistent_clone_is_removed_afterwards() {
    let remote = remote();
    let root = remote.workdirs();
    let tool = ScriptedTool::reporting(1);

    prepare(&remote, tool.clone(), Storage::Persistent(root.clone()))
        .await
        .unwrap();

    let workdir: PathBuf = tool.seen.lock()[0].0.workdir.clone();
    assert!(workdir.starts_with(&root));
    assert!(!workdir.exists());
}
