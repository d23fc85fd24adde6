//! Fakes and fixtures shared by unit tests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::deploy::{DeployExecutor, DeployOptions};
use crate::error::DeployError;
use crate::gitops::PullRequestOutcome;
use crate::notify::{DeployNotice, Notifier};
use crate::project::{Phase, PhaseName, Project, RegistryCoordinates};
use crate::source::{RevisionTracker, TagQuery, VersionSource};

/// Project with an auto-deployed, notified staging phase and a manual
/// production phase, both of kind `kustomize`.
pub fn sample_project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        alias: vec![format!("{}-alias", id)],
        repository: id.to_string(),
        default_branch: "main".to_string(),
        image: None,
        registry: RegistryCoordinates {
            registry_id: "123456789012".to_string(),
            repository: format!("org/{}", id),
            tag_pattern: "^{branch}-.*$".to_string(),
            target_pattern: None,
        },
        disable_branch_deploy: false,
        phases: vec![
            Phase {
                name: PhaseName::Staging,
                kind: "kustomize".to_string(),
                path: format!("{}/overlays/staging/kustomization.yaml", id),
                auto_deploy: true,
                notify_channel: Some("C-deploys".to_string()),
                disable_branch_deploy: false,
            },
            Phase {
                name: PhaseName::Production,
                kind: "kustomize".to_string(),
                path: format!("{}/overlays/production/kustomization.yaml", id),
                auto_deploy: false,
                notify_channel: None,
                disable_branch_deploy: false,
            },
        ],
    }
}

/// Version source answering every query with the same tag, or failing.
#[derive(Clone, Default)]
pub struct FakeVersionSource {
    tag: Arc<Mutex<Option<String>>>,
    queries: Arc<Mutex<Vec<TagQuery>>>,
}

impl FakeVersionSource {
    pub fn with_tag(tag: &str) -> Self {
        let source = Self::default();
        source.set_tag(Some(tag));
        source
    }

    pub fn set_tag(&self, tag: Option<&str>) {
        *self.tag.lock() = tag.map(str::to_string);
    }

    pub fn queries(&self) -> Vec<TagQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl VersionSource for FakeVersionSource {
    async fn find_tag(&self, query: &TagQuery) -> Result<String> {
        self.queries.lock().push(query.clone());
        self.tag
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("registry unavailable"))
    }
}

/// Revision tracker reporting a fixed current tag, or failing.
#[derive(Clone, Default)]
pub struct FakeRevisionTracker {
    tag: Arc<Mutex<Option<String>>>,
    kind: Option<String>,
}

impl FakeRevisionTracker {
    pub fn with_tag(tag: &str) -> Self {
        let tracker = Self::default();
        *tracker.tag.lock() = Some(tag.to_string());
        tracker
    }

    /// Only phases of `kind` are tracked.
    pub fn tracking(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }
}

#[async_trait]
impl RevisionTracker for FakeRevisionTracker {
    async fn current_revision(&self, _project: &Project, _phase: &Phase) -> Result<String> {
        self.tag
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("manifest unreadable"))
    }

    fn tracks(&self, phase: &Phase) -> bool {
        self.kind.as_deref().is_none_or(|kind| kind == phase.kind)
    }
}

#[derive(Debug, Clone)]
pub struct DeployCall {
    pub project: String,
    pub phase: String,
    pub options: DeployOptions,
}

/// Executor recording its calls and answering with a preset outcome.
#[derive(Clone)]
pub struct FakeExecutor {
    calls: Arc<Mutex<Vec<DeployCall>>>,
    fail: Arc<Mutex<bool>>,
    answer: PullRequestOutcome,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::answering(PullRequestOutcome::pushed("bot/fake"))
    }

    pub fn answering(answer: PullRequestOutcome) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
            answer,
        }
    }

    pub fn failing() -> Self {
        let executor = Self::new();
        *executor.fail.lock() = true;
        executor
    }

    pub fn calls(&self) -> Vec<DeployCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeployExecutor for FakeExecutor {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        options: &DeployOptions,
    ) -> crate::error::Result<PullRequestOutcome> {
        self.calls.lock().push(DeployCall {
            project: project.id.clone(),
            phase: phase.to_string(),
            options: options.clone(),
        });
        if *self.fail.lock() {
            return Err(DeployError::Apply("executor failed".to_string()));
        }
        Ok(self.answer.clone())
    }
}

/// Notifier recording `(channel, notice)` pairs.
#[derive(Clone, Default)]
pub struct FakeNotifier {
    sent: Arc<Mutex<Vec<(String, DeployNotice)>>>,
    fail: bool,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, DeployNotice)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, channel: &str, notice: &DeployNotice) -> Result<()> {
        self.sent.lock().push((channel.to_string(), notice.clone()));
        if self.fail {
            anyhow::bail!("channel_not_found");
        }
        Ok(())
    }
}
