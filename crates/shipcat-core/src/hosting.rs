//! Pull requests on the hosting service.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gitops::PullRequestRef;

/// Pull request to open from an already pushed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    /// Login of the user to assign.
    pub assignee: Option<String>,
}

/// Opens pull requests against the deployment repository.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> anyhow::Result<PullRequestRef>;

    /// Merge a pull request, possibly in another repository.
    async fn merge_pull_request(&self, pull_request: &PullRequestRef) -> anyhow::Result<()>;
}

/// Owner and name of a repository, parsed from its clone URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySlug {
    pub owner: String,
    pub name: String,
}

impl RepositorySlug {
    /// Parse `https://host/owner/name(.git)`.
    pub fn from_url(remote: &str) -> anyhow::Result<Self> {
        let url = Url::parse(remote).with_context(|| format!("Invalid remote URL '{}'", remote))?;
        let mut segments = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();
        if segments.len() != 2 {
            anyhow::bail!("Remote URL '{}' is not of the form https://host/owner/repo", remote);
        }
        let name = segments.pop().unwrap_or_default();
        let owner = segments.pop().unwrap_or_default();
        Ok(Self {
            owner: owner.to_string(),
            name: name.strip_suffix(".git").unwrap_or(name).to_string(),
        })
    }

    /// Repository of a pull request's web URL, `https://host/owner/name/pull/N`.
    pub fn from_pull_request_url(pull_url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(pull_url)
            .with_context(|| format!("Invalid pull request URL '{}'", pull_url))?;
        let segments: Vec<_> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [owner, name, "pull", _] => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => anyhow::bail!("'{}' is not a pull request URL", pull_url),
        }
    }
}

/// GitHub REST API client for one repository.
#[derive(Debug, Clone)]
pub struct GitHubHost {
    client: reqwest::Client,
    api_url: String,
    token: String,
    repository: RepositorySlug,
}

#[derive(Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    node_id: String,
    html_url: String,
}

#[derive(Serialize)]
struct AddAssignees<'a> {
    assignees: [&'a str; 1],
}

impl GitHubHost {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        repository: RepositorySlug,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("shipcat")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            repository,
        })
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_url, self.repository.owner, self.repository.name
        )
    }

    async fn assign(&self, number: u64, login: &str) -> anyhow::Result<()> {
        let url = format!("{}/issues/{}/assignees", self.repo_url(), number);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&AddAssignees { assignees: [login] })
            .send()
            .await
            .with_context(|| format!("Failed to assign pull request #{}", number))?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to assign pull request: HTTP {} from {}", response.status(), url);
        }
        Ok(())
    }
}

#[async_trait]
impl PullRequestHost for GitHubHost {
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> anyhow::Result<PullRequestRef> {
        let url = format!("{}/pulls", self.repo_url());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&CreatePull {
                title: &draft.title,
                head: &draft.head,
                base: &draft.base,
                body: &draft.body,
            })
            .send()
            .await
            .with_context(|| format!("Failed to open pull request for {}", draft.head))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to open pull request: HTTP {} from {}",
                response.status(),
                url
            );
        }

        let pull: PullResponse = response
            .json()
            .await
            .context("Failed to parse pull request response")?;

        if let Some(login) = &draft.assignee
            && let Err(err) = self.assign(pull.number, login).await
        {
            tracing::warn!(number = pull.number, assignee = %login, error = %err, "Failed to assign pull request");
        }

        tracing::info!(number = pull.number, url = %pull.html_url, "Opened pull request");
        Ok(PullRequestRef {
            id: pull.node_id,
            number: pull.number,
            url: pull.html_url,
        })
    }

    async fn merge_pull_request(&self, pull_request: &PullRequestRef) -> anyhow::Result<()> {
        let repository = RepositorySlug::from_pull_request_url(&pull_request.url)
            .unwrap_or_else(|_| self.repository.clone());
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_url, repository.owner, repository.name, pull_request.number
        );
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("Failed to merge pull request #{}", pull_request.number))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to merge pull request: HTTP {} from {}",
                response.status(),
                url
            );
        }
        tracing::info!(number = pull_request.number, url = %pull_request.url, "Merged pull request");
        Ok(())
    }
}
