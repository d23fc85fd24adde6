//! Deploy projects and their phases.
//!
//! A [`Project`] is one deployable application: where its deployment
//! configuration lives, which registry repository its images come from and
//! the ordered list of [`Phase`]s it can be deployed to.

mod catalog;

pub use catalog::{CatalogSnapshot, ProjectCatalog};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment name.
///
/// Parsing accepts the short aliases used in chat commands (`stg`, `pro`,
/// `prd`); [`PhaseName::as_str`] always yields the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PhaseName {
    Staging,
    Production,
    Sandbox,
}

impl PhaseName {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Staging => "staging",
            PhaseName::Production => "production",
            PhaseName::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "staging" | "stg" => Ok(PhaseName::Staging),
            "production" | "pro" | "prd" => Ok(PhaseName::Production),
            "sandbox" => Ok(PhaseName::Sandbox),
            other => anyhow::bail!(
                "Unknown phase '{}': expected staging, production or sandbox",
                other
            ),
        }
    }
}

impl TryFrom<String> for PhaseName {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<PhaseName> for String {
    fn from(value: PhaseName) -> Self {
        value.as_str().to_string()
    }
}

/// Container registry coordinates used to find the desired image tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCoordinates {
    #[serde(default)]
    pub registry_id: String,
    pub repository: String,
    /// Regex a candidate tag must match. `{branch}` and `{phase}` are
    /// substituted before compiling.
    pub tag_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pattern: Option<String>,
}

/// One deployment target of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    /// Selects the deploy executor (see `deploy::DeployModelDispatcher`).
    pub kind: String,
    /// Config path inside the deployment repository.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,
    /// Only the project's default branch may be deployed to this phase.
    #[serde(default)]
    pub disable_branch_deploy: bool,
}

/// A deployable application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alias: Vec<String>,
    /// Repository name on the hosting service, relative to the configured
    /// organization.
    pub repository: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Image name in the kustomization `images` list. Defaults to the
    /// registry repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub registry: RegistryCoordinates,
    /// Only the default branch may be deployed, to any phase.
    #[serde(default)]
    pub disable_branch_deploy: bool,
    #[serde(default, rename = "phase")]
    pub phases: Vec<Phase>,
}

fn default_branch() -> String {
    "master".to_string()
}

impl Project {
    /// Find a phase by canonical name or alias.
    pub fn find_phase(&self, name: &str) -> Option<&Phase> {
        let wanted: PhaseName = name.parse().ok()?;
        self.phases.iter().find(|phase| phase.name == wanted)
    }

    /// Image name that the image-tag overwrite targets.
    pub fn image_name(&self) -> &str {
        self.image.as_deref().unwrap_or(&self.registry.repository)
    }

    /// Whether `alias` names this project (its id counts as an alias).
    pub fn answers_to(&self, alias: &str) -> bool {
        self.id == alias || self.alias.iter().any(|a| a == alias)
    }

    /// HTTPS clone URL of the project's own repository.
    pub fn repository_url(&self, host: &str, org: &str) -> String {
        format!("https://{}/{}/{}.git", host, org, self.repository)
    }

    /// Whether `branch` may be deployed to `phase`.
    pub fn accepts_branch(&self, phase: &Phase, branch: &str) -> bool {
        branch == self.default_branch
            || !(self.disable_branch_deploy || phase.disable_branch_deploy)
    }

    /// Phases that the watcher should poll.
    pub fn auto_deploy_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().filter(|phase| phase.auto_deploy)
    }
}

/// Name of the ephemeral branch carrying a deploy for `(project, phase, tag)`.
///
/// Downstream tooling parses this name, so the format must not change.
pub fn deploy_branch_name(project_id: &str, phase: PhaseName, tag: &str) -> String {
    format!("bot/docker-image-tag-{}-{}-{}", project_id, phase, tag)
}
