//! Application context: builds every service from one configuration.

use std::sync::Arc;

use anyhow::Context;

use crate::config::{ConfigStore, ShipcatConfig};
use crate::deploy::{DeployModelDispatcher, DeployOptions, GitOpsDeployModel};
use crate::error::{DeployError, Result};
use crate::git::{GitCredentials, RemoteRepository, SharedOperator, SourceControlOperator, Storage};
use crate::gitops::{CommandApplyTool, DelegatedApply, DirectMutation, GitOpsStrategy, PullRequestOutcome};
use crate::hosting::{GitHubHost, PullRequestHost, RepositorySlug};
use crate::notify::{Notifier, SlackNotifier};
use crate::project::{CatalogSnapshot, Phase, Project, ProjectCatalog};
use crate::source::{
    CommandVersionSource, ManifestRevisionTracker, RevisionTracker, TagQuery, VersionSource,
};
use crate::watch::DeployWatcher;

/// Phase kind handled by [`DirectMutation`].
pub const KIND_KUSTOMIZE: &str = "kustomize";

/// Phase kind handled by [`DelegatedApply`].
pub const KIND_APPLY: &str = "apply";

/// Current and desired tag of one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub current: std::result::Result<String, String>,
    pub desired: std::result::Result<String, String>,
}

/// Services wired from a [`ShipcatConfig`].
///
/// Frontends create this once and share it.
pub struct AppContext {
    config: ShipcatConfig,
    catalog: ProjectCatalog,
    versions: Arc<dyn VersionSource>,
    revisions: Arc<dyn RevisionTracker>,
    dispatcher: DeployModelDispatcher,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AppContext {
    /// Load the configuration from `store` and build every service.
    pub fn from_store(store: ConfigStore) -> anyhow::Result<Self> {
        let config = store.load()?;
        let catalog = ProjectCatalog::from_store(store);
        catalog.replace(config.projects.clone());
        Self::build(config, catalog)
    }

    /// Build the services with default adapters.
    pub fn build(config: ShipcatConfig, catalog: ProjectCatalog) -> anyhow::Result<Self> {
        let token = read_secret(&config.git.token_env);
        let credentials = GitCredentials::new(&config.git.username, &token)
            .with_email(&config.git.email);
        let storage = Storage::from_root(config.git.root.clone());

        let remote = RemoteRepository::new(&config.git.remote, &config.git.default_branch);
        let operator = SharedOperator::new(
            SourceControlOperator::connect(remote, credentials.clone(), &storage)
                .context("Failed to prepare deployment repository")?,
        );

        let versions: Arc<dyn VersionSource> =
            Arc::new(CommandVersionSource::new(config.registry.command.clone()));
        let revisions: Arc<dyn RevisionTracker> =
            Arc::new(ManifestRevisionTracker::new(operator.clone(), KIND_KUSTOMIZE));

        let host: Arc<dyn PullRequestHost> = Arc::new(GitHubHost::new(
            &config.github.api_url,
            &token,
            RepositorySlug::from_url(&config.git.remote)?,
        )?);

        let direct = GitOpsStrategy::Direct(DirectMutation::new(operator, Arc::clone(&versions)));
        let delegated = GitOpsStrategy::Delegated(
            DelegatedApply::new(
                Arc::clone(&versions),
                Arc::new(CommandApplyTool::new(&config.apply.command)),
                credentials,
                storage,
            )
            .with_hosting(&config.github.host, &config.github.org)
            .with_config_file(&config.apply.config_file),
        );

        let base = config.git.default_branch.clone();
        let dispatcher = DeployModelDispatcher::new()
            .with(
                KIND_KUSTOMIZE,
                Arc::new(GitOpsDeployModel::new(direct, Arc::clone(&host), &base)),
            )
            .with(
                KIND_APPLY,
                Arc::new(GitOpsDeployModel::new(delegated, host, &base)),
            );

        let notifier = match std::env::var(&config.notify.slack_token_env) {
            Ok(token) if !token.is_empty() => Some(Arc::new(SlackNotifier::new(
                &config.notify.api_url,
                token,
            )?) as Arc<dyn Notifier>),
            _ => {
                tracing::warn!(
                    env = %config.notify.slack_token_env,
                    "Notification token not set; deploy notifications disabled"
                );
                None
            }
        };

        Ok(Self::from_parts(
            config, catalog, versions, revisions, dispatcher, notifier,
        ))
    }

    /// Assemble a context from already built services.
    pub fn from_parts(
        config: ShipcatConfig,
        catalog: ProjectCatalog,
        versions: Arc<dyn VersionSource>,
        revisions: Arc<dyn RevisionTracker>,
        dispatcher: DeployModelDispatcher,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            config,
            catalog,
            versions,
            revisions,
            dispatcher,
            notifier,
        }
    }

    pub fn config(&self) -> &ShipcatConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ProjectCatalog {
        &self.catalog
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.catalog.snapshot()
    }

    pub fn dispatcher(&self) -> &DeployModelDispatcher {
        &self.dispatcher
    }

    /// A watcher over this context's catalog and collaborators.
    pub fn watcher(&self) -> DeployWatcher {
        DeployWatcher::new(
            self.catalog.clone(),
            Arc::clone(&self.versions),
            Arc::clone(&self.revisions),
            self.dispatcher.clone(),
            self.notifier.clone(),
            self.config.watch.interval(),
        )
    }

    /// Deploy `project` (id or alias) to `phase` (name or alias).
    pub async fn deploy(
        &self,
        project: &str,
        phase: &str,
        mut options: DeployOptions,
    ) -> Result<PullRequestOutcome> {
        let snapshot = self.catalog.snapshot();
        let project = snapshot.find_by_alias(project)?;
        let target = find_phase(project, phase)?;
        if options.branch.is_empty() {
            options.branch = project.default_branch.clone();
        } else if !project.accepts_branch(target, &options.branch) {
            return Err(anyhow::anyhow!(
                "Branch deploy is disabled for {} {}; only '{}' can be deployed",
                project.id,
                target.name,
                project.default_branch
            )
            .into());
        }
        self.dispatcher.deploy(project, phase, &options).await
    }

    /// Current and desired tag of a phase, without deploying.
    pub async fn inspect(&self, project: &str, phase: &str) -> Result<PhaseReport> {
        let snapshot = self.catalog.snapshot();
        let project = snapshot.find_by_alias(project)?;
        let phase = find_phase(project, phase)?;

        let current = if self.revisions.tracks(phase) {
            self.revisions
                .current_revision(project, phase)
                .await
                .map_err(|e| format!("{:#}", e))
        } else {
            Err(format!("not tracked for kind '{}'", phase.kind))
        };
        let query = TagQuery::for_project(project, &project.default_branch, phase.name);
        let desired = self
            .versions
            .find_tag(&query)
            .await
            .map_err(|e| format!("{:#}", e));
        Ok(PhaseReport { current, desired })
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

fn read_secret(env: &str) -> String {
    match std::env::var(env) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(env = %env, "Access token not set; pushes will be rejected");
            String::new()
        }
    }
}
