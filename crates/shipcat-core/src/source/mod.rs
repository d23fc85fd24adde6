//! Where tags come from and where they are currently deployed.
//!
//! - [`VersionSource`] answers "which image tag should run?"
//! - [`RevisionTracker`] answers "which image tag runs now?"

mod registry;
mod revision;

pub use registry::CommandVersionSource;
pub use revision::ManifestRevisionTracker;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::project::{Phase, PhaseName, Project};

/// Values substituted into a project's tag patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVars {
    pub branch: String,
    pub phase: PhaseName,
}

/// One image-tag lookup against a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagQuery {
    pub registry_id: String,
    pub repository: String,
    pub tag_pattern: String,
    pub target_pattern: Option<String>,
    pub vars: TagVars,
}

impl TagQuery {
    pub fn for_project(project: &Project, branch: &str, phase: PhaseName) -> Self {
        Self {
            registry_id: project.registry.registry_id.clone(),
            repository: project.registry.repository.clone(),
            tag_pattern: project.registry.tag_pattern.clone(),
            target_pattern: project.registry.target_pattern.clone(),
            vars: TagVars {
                branch: branch.to_string(),
                phase,
            },
        }
    }

    /// Substitute `{branch}` and `{phase}`. Values are regex-escaped.
    pub fn render(&self, pattern: &str) -> String {
        pattern
            .replace("{branch}", &regex::escape(&self.vars.branch))
            .replace("{phase}", self.vars.phase.as_str())
    }

    pub fn tag_regex(&self) -> Result<Regex> {
        let rendered = self.render(&self.tag_pattern);
        Regex::new(&rendered).with_context(|| format!("Invalid tag pattern '{}'", rendered))
    }

    pub fn target_regex(&self) -> Result<Option<Regex>> {
        self.target_pattern
            .as_deref()
            .map(|pattern| {
                let rendered = self.render(pattern);
                Regex::new(&rendered)
                    .with_context(|| format!("Invalid target pattern '{}'", rendered))
            })
            .transpose()
    }
}

/// Looks up the image tag that should be deployed.
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn find_tag(&self, query: &TagQuery) -> Result<String>;
}

/// Reads the image tag currently deployed to a phase.
#[async_trait]
pub trait RevisionTracker: Send + Sync {
    async fn current_revision(&self, project: &Project, phase: &Phase) -> Result<String>;

    /// Whether the running tag of `phase` can be read at all.
    fn tracks(&self, _phase: &Phase) -> bool {
        true
    }
}
