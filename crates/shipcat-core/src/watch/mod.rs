//! Auto-deploy watcher.
//!
//! Every `(project, phase)` with auto-deploy enabled gets its own periodic
//! task. A tick compares the tag running now with the tag that should run
//! and deploys the difference. Phases whose running tag is not tracked are
//! handed to their executor on every tick. Ticks never fail the process:
//! every error is logged and the tick ends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::deploy::{DeployModelDispatcher, DeployOptions};
use crate::gitops::{DeployStatus, Requester};
use crate::notify::{DeployNotice, Notifier};
use crate::project::{Phase, PhaseName, Project, ProjectCatalog};
use crate::source::{RevisionTracker, TagQuery, VersionSource};

/// Requester name recorded on automatic deployments.
const WATCHER_REQUESTER: &str = "shipcat-autodeploy";

/// Identity of one watch task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub project: String,
    pub phase: PhaseName,
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.phase)
    }
}

/// Why a tick did not deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The desired tag is already running.
    UpToDate,
    CurrentUnknown(String),
    DesiredUnknown(String),
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Deployed {
        tag: String,
        status: DeployStatus,
        notified: bool,
    },
    Failed(String),
}

/// Changes applied by [`DeployWatcher::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<WatchKey>,
    pub replaced: Vec<WatchKey>,
    pub stopped: Vec<WatchKey>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.replaced.is_empty() && self.stopped.is_empty()
    }
}

struct WatchTask {
    project: Project,
    phase: Phase,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Collaborators a tick needs; shared by every task.
struct TickContext {
    versions: Arc<dyn VersionSource>,
    revisions: Arc<dyn RevisionTracker>,
    dispatcher: DeployModelDispatcher,
    notifier: Option<Arc<dyn Notifier>>,
}

/// Runs and supervises the auto-deploy tasks.
pub struct DeployWatcher {
    context: Arc<TickContext>,
    catalog: ProjectCatalog,
    interval: Duration,
    tasks: Mutex<HashMap<WatchKey, WatchTask>>,
    shutdown: CancellationToken,
}

impl DeployWatcher {
    /// Successful deployments are posted through `notifier` when the phase
    /// names a channel.
    pub fn new(
        catalog: ProjectCatalog,
        versions: Arc<dyn VersionSource>,
        revisions: Arc<dyn RevisionTracker>,
        dispatcher: DeployModelDispatcher,
        notifier: Option<Arc<dyn Notifier>>,
        interval: Duration,
    ) -> Self {
        Self {
            context: Arc::new(TickContext {
                versions,
                revisions,
                dispatcher,
                notifier,
            }),
            catalog,
            interval,
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Keys of the running watch tasks, sorted.
    pub fn active(&self) -> Vec<WatchKey> {
        let mut keys: Vec<_> = self.tasks.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run one check for `(project, phase)` right now.
    pub async fn check_and_deploy(&self, project: &Project, phase: &Phase) -> TickOutcome {
        self.context.check_and_deploy(project, phase).await
    }

    /// Bring the task registry in line with the current catalog snapshot.
    ///
    /// New pairs start a task, changed definitions replace theirs and pairs
    /// no longer in the snapshot are cancelled. In-flight ticks finish.
    pub fn reconcile(&self) -> ReconcileReport {
        let snapshot = self.catalog.snapshot();
        let mut desired: HashMap<WatchKey, (&Project, &Phase)> = snapshot
            .auto_deploy_targets()
            .map(|(project, phase)| {
                let key = WatchKey {
                    project: project.id.clone(),
                    phase: phase.name,
                };
                (key, (project, phase))
            })
            .collect();

        let mut report = ReconcileReport::default();
        let mut tasks = self.tasks.lock();

        tasks.retain(|key, task| {
            let keep = desired.contains_key(key);
            if !keep {
                task.cancel.cancel();
                report.stopped.push(key.clone());
            }
            keep
        });

        for (key, (project, phase)) in desired.drain() {
            match tasks.get(&key) {
                Some(task) if task.project == *project && task.phase == *phase => {}
                Some(task) => {
                    task.cancel.cancel();
                    report.replaced.push(key.clone());
                    let task = self.spawn(project.clone(), phase.clone());
                    tasks.insert(key, task);
                }
                None => {
                    report.started.push(key.clone());
                    let task = self.spawn(project.clone(), phase.clone());
                    tasks.insert(key, task);
                }
            }
        }

        report.started.sort();
        report.replaced.sort();
        report.stopped.sort();
        if !report.is_empty() {
            tracing::info!(
                generation = snapshot.generation,
                started = report.started.len(),
                replaced = report.replaced.len(),
                stopped = report.stopped.len(),
                interval_secs = self.interval.as_secs(),
                "Auto-deploy watch tasks reconciled"
            );
        }
        report
    }

    fn spawn(&self, project: Project, phase: Phase) -> WatchTask {
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(watch_loop(
            Arc::clone(&self.context),
            project.clone(),
            phase.clone(),
            self.interval,
            cancel.clone(),
        ));
        WatchTask {
            project,
            phase,
            cancel,
            handle,
        }
    }

    /// Reconcile now, then reload the catalog and reconcile every
    /// `reload_interval` until [`DeployWatcher::shutdown`] is called.
    pub async fn run(&self, reload_interval: Duration) {
        self.reconcile();
        let watching: Vec<String> = self.active().iter().map(ToString::to_string).collect();
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            watching = ?watching,
            "Auto-deploy watcher started"
        );

        let mut reload = tokio::time::interval_at(Instant::now() + reload_interval, reload_interval);
        reload.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = reload.tick() => {
                    if let Err(err) = self.catalog.reload() {
                        tracing::warn!(error = %format!("{:#}", err), "Failed to reload deploy projects");
                    }
                    self.reconcile();
                }
            }
        }

        self.stop_all().await;
        tracing::info!("Auto-deploy watcher stopped");
    }

    /// Cancel every watch task. Running ticks finish first.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn stop_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        for task in tasks {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                tracing::warn!(error = %err, "Watch task ended abnormally");
            }
        }
    }
}

impl Drop for DeployWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn watch_loop(
    context: Arc<TickContext>,
    project: Project,
    phase: Phase,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                context.check_and_deploy(&project, &phase).await;
            }
        }
    }
    tracing::debug!(project = %project.id, phase = %phase.name, "Watch task stopped");
}

impl TickContext {
    async fn check_and_deploy(&self, project: &Project, phase: &Phase) -> TickOutcome {
        let current = if self.revisions.tracks(phase) {
            match self.revisions.current_revision(project, phase).await {
                Ok(tag) => Some(tag),
                Err(err) => {
                    tracing::info!(
                        project = %project.id,
                        phase = %phase.name,
                        error = %format!("{:#}", err),
                        "Auto deploy skipped: current tag unknown"
                    );
                    return TickOutcome::Skipped(SkipReason::CurrentUnknown(err.to_string()));
                }
            }
        } else {
            None
        };

        let query = TagQuery::for_project(project, &project.default_branch, phase.name);
        let desired = match self.versions.find_tag(&query).await {
            Ok(tag) => tag,
            Err(err) => {
                tracing::info!(
                    project = %project.id,
                    phase = %phase.name,
                    error = %format!("{:#}", err),
                    "Auto deploy skipped: desired tag unknown"
                );
                return TickOutcome::Skipped(SkipReason::DesiredUnknown(err.to_string()));
            }
        };

        // Untracked phases always reach the executor; it reports
        // AlreadyDeployed when nothing changed.
        if current.as_deref() == Some(desired.as_str()) {
            tracing::info!(project = %project.id, phase = %phase.name, tag = %desired, "Auto deploy skipped: up to date");
            return TickOutcome::Skipped(SkipReason::UpToDate);
        }

        tracing::info!(
            project = %project.id,
            phase = %phase.name,
            current = ?current,
            tag = %desired,
            "Auto deploy started"
        );

        let executor = match self.dispatcher.find(&phase.kind) {
            Ok(executor) => executor,
            Err(err) => {
                tracing::error!(project = %project.id, phase = %phase.name, error = %err, "Auto deploy failed");
                return TickOutcome::Failed(err.to_string());
            }
        };

        let options = DeployOptions {
            branch: project.default_branch.clone(),
            wait: true,
            tag: Some(desired.clone()),
            requester: Requester::new(WATCHER_REQUESTER),
        };
        let outcome = match executor.deploy(project, phase.name.as_str(), &options).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(project = %project.id, phase = %phase.name, tag = %desired, error = %err, "Auto deploy failed");
                return TickOutcome::Failed(err.to_string());
            }
        };

        let notified = if outcome.status == DeployStatus::Success {
            self.announce(project, phase, &desired).await
        } else {
            false
        };

        TickOutcome::Deployed {
            tag: desired,
            status: outcome.status,
            notified,
        }
    }

    async fn announce(&self, project: &Project, phase: &Phase, tag: &str) -> bool {
        let (Some(notifier), Some(channel)) = (&self.notifier, &phase.notify_channel) else {
            return false;
        };
        let notice = DeployNotice {
            project: project.id.clone(),
            phase: phase.name,
            tag: tag.to_string(),
        };
        match notifier.notify(channel, &notice).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    project = %project.id,
                    phase = %phase.name,
                    channel = %channel,
                    error = %format!("{:#}", err),
                    "Failed to post deploy notification"
                );
                false
            }
        }
    }
}
