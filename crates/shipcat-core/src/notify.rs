//! Deployment notifications.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::project::PhaseName;

/// Attachment color for successful deployments.
const SUCCESS_COLOR: &str = "#36a64f";

const SUCCESS_TITLE: &str = ":white_check_mark: Succeed to auto deploy";

/// A finished deployment worth telling people about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployNotice {
    pub project: String,
    pub phase: PhaseName,
    pub tag: String,
}

/// Posts deployment notices to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, notice: &DeployNotice) -> anyhow::Result<()>;
}

/// Posts notices through the Slack Web API.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("shipcat")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, channel: &str, notice: &DeployNotice) -> anyhow::Result<()> {
        let url = format!("{}/chat.postMessage", self.api_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&message_payload(channel, notice))
            .send()
            .await
            .with_context(|| format!("Failed to post message to {}", channel))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to post message: HTTP {} from {}",
                response.status(),
                url
            );
        }

        let body: SlackResponse = response
            .json()
            .await
            .context("Failed to parse chat.postMessage response")?;
        if !body.ok {
            anyhow::bail!(
                "chat.postMessage rejected: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}

/// `chat.postMessage` body for a successful deployment.
pub(crate) fn message_payload(channel: &str, notice: &DeployNotice) -> Value {
    json!({
        "channel": channel,
        "attachments": [{
            "color": SUCCESS_COLOR,
            "title": SUCCESS_TITLE,
            "fields": [
                { "title": "Project", "value": notice.project, "short": true },
                { "title": "Phase", "value": notice.phase.as_str(), "short": true },
                { "title": "Tag", "value": notice.tag, "short": true },
            ],
        }],
    })
}
