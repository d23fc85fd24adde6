//! Reloadable, atomically swapped list of deploy projects.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{Phase, Project};
use crate::config::ConfigStore;
use crate::error::DeployError;

/// Immutable view of the project list for one reload generation.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    pub generation: u64,
    pub projects: Vec<Project>,
}

impl CatalogSnapshot {
    pub fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    /// Look a project up by id or alias.
    pub fn find_by_alias(&self, alias: &str) -> Result<&Project, DeployError> {
        self.projects
            .iter()
            .find(|project| project.answers_to(alias))
            .ok_or_else(|| DeployError::ProjectNotFound(alias.to_string()))
    }

    /// Every `(project, phase)` pair with auto-deploy enabled.
    pub fn auto_deploy_targets(&self) -> impl Iterator<Item = (&Project, &Phase)> {
        self.projects.iter().flat_map(|project| {
            project
                .auto_deploy_phases()
                .map(move |phase| (project, phase))
        })
    }
}

/// Shared handle to the current project snapshot.
///
/// Readers clone the inner `Arc` and keep using it for as long as they like;
/// a reload builds a complete new snapshot and swaps it in one step.
#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    store: Option<ConfigStore>,
    current: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl ProjectCatalog {
    /// Catalog backed by a config file. Call [`ProjectCatalog::reload`] to
    /// populate it.
    pub fn from_store(store: ConfigStore) -> Self {
        Self {
            store: Some(store),
            current: Arc::new(RwLock::new(Arc::new(CatalogSnapshot::default()))),
        }
    }

    /// Catalog with a fixed project list (no backing file).
    pub fn fixed(projects: Vec<Project>) -> Self {
        Self {
            store: None,
            current: Arc::new(RwLock::new(Arc::new(CatalogSnapshot {
                generation: 1,
                projects,
            }))),
        }
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Replace the project list wholesale.
    pub fn replace(&self, projects: Vec<Project>) -> Arc<CatalogSnapshot> {
        let mut current = self.current.write();
        let next = Arc::new(CatalogSnapshot {
            generation: current.generation + 1,
            projects,
        });
        *current = Arc::clone(&next);
        next
    }

    /// Re-read the backing config file and swap in the new project list.
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self) -> anyhow::Result<Arc<CatalogSnapshot>> {
        let Some(store) = &self.store else {
            return Ok(self.snapshot());
        };
        let config = store.load()?;
        let snapshot = self.replace(config.projects);
        tracing::info!(
            generation = snapshot.generation,
            projects = snapshot.projects.len(),
            "Deploy projects reloaded"
        );
        Ok(snapshot)
    }
}
