//! Schema of `shipcat.toml`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::project::Project;

/// Complete shipcat configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipcatConfig {
    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub github: GitHubSettings,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub apply: ApplySettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    /// Deploy projects, keyed by unique id.
    #[serde(default, rename = "project")]
    pub projects: Vec<Project>,
}

/// Main deployment-configuration repository and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// HTTPS URL of the repository holding the kustomize manifests,
    /// e.g. `https://github.com/org/deploy-config.git`.
    #[serde(default)]
    pub remote: String,

    #[serde(default = "default_git_branch")]
    pub default_branch: String,

    /// Basic-auth username. Any non-empty value works with a token.
    #[serde(default = "default_git_username")]
    pub username: String,

    #[serde(default)]
    pub email: String,

    /// Environment variable holding the access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Persistent storage root for working copies. Unset means every
    /// operator uses a private scratch directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_git_branch() -> String {
    "master".to_string()
}

fn default_git_username() -> String {
    "shipcat".to_string()
}

fn default_token_env() -> String {
    "SHIPCAT_GIT_TOKEN".to_string()
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote: String::new(),
            default_branch: default_git_branch(),
            username: default_git_username(),
            email: String::new(),
            token_env: default_token_env(),
            root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default = "default_github_host")]
    pub host: String,

    #[serde(default)]
    pub org: String,

    #[serde(default = "default_github_api")]
    pub api_url: String,
}

fn default_github_host() -> String {
    "github.com".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            host: default_github_host(),
            org: String::new(),
            api_url: default_github_api(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Seconds between two checks of the same phase.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds between two reloads of the project list.
    #[serde(default = "default_reload_secs")]
    pub reload_secs: u64,
}

fn default_interval_secs() -> u64 {
    600
}

fn default_reload_secs() -> u64 {
    300
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            reload_secs: default_reload_secs(),
        }
    }
}

impl WatchSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default = "default_slack_token_env")]
    pub slack_token_env: String,

    #[serde(default = "default_slack_api")]
    pub api_url: String,
}

fn default_slack_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}

fn default_slack_api() -> String {
    "https://slack.com/api".to_string()
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            slack_token_env: default_slack_token_env(),
            api_url: default_slack_api(),
        }
    }
}

/// External declarative-apply tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplySettings {
    #[serde(default = "default_apply_command")]
    pub command: String,

    /// File name of the tool's config inside a project repository.
    #[serde(default = "default_apply_config_file")]
    pub config_file: String,
}

fn default_apply_command() -> String {
    "kanvas".to_string()
}

fn default_apply_config_file() -> String {
    "kanvas.yaml".to_string()
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            command: default_apply_command(),
            config_file: default_apply_config_file(),
        }
    }
}

/// Command that lists candidate image tags, newest first, one per line.
///
/// `{registry_id}` and `{repository}` are substituted in every argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub command: Vec<String>,
}

impl ShipcatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.git.username.is_empty() {
            anyhow::bail!("git.username must not be empty");
        }
        if self.watch.interval_secs == 0 || self.watch.reload_secs == 0 {
            anyhow::bail!("watch.interval_secs and watch.reload_secs must be positive");
        }

        let mut names = HashSet::new();
        for project in &self.projects {
            if project.id.is_empty() {
                anyhow::bail!("Project id must not be empty");
            }
            if !names.insert(project.id.as_str()) {
                anyhow::bail!("Duplicate project id or alias '{}'", project.id);
            }
            for alias in &project.alias {
                if alias != &project.id && !names.insert(alias.as_str()) {
                    anyhow::bail!("Duplicate project id or alias '{}'", alias);
                }
            }

            let mut phases = HashSet::new();
            for phase in &project.phases {
                if !phases.insert(phase.name) {
                    anyhow::bail!(
                        "Project '{}' declares phase '{}' more than once",
                        project.id,
                        phase.name
                    );
                }
                if phase.kind.is_empty() {
                    anyhow::bail!(
                        "Phase '{}' of project '{}' has no kind",
                        phase.name,
                        project.id
                    );
                }
            }
        }
        Ok(())
    }
}
