//! Version source backed by a registry listing command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{TagQuery, VersionSource};
use crate::process;

/// Finds tags by running an external listing command.
///
/// The command prints one image per line, newest first, as
/// whitespace-separated tags. `{registry_id}` and `{repository}` in the
/// configured argv are substituted per query.
#[derive(Debug, Clone)]
pub struct CommandVersionSource {
    argv: Vec<String>,
}

impl CommandVersionSource {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn command(&self, query: &TagQuery) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .context("Registry command is not configured")?;
        let mut command = Command::new(program);
        for arg in args {
            command.arg(
                arg.replace("{registry_id}", &query.registry_id)
                    .replace("{repository}", &query.repository),
            );
        }
        Ok(command)
    }
}

#[async_trait]
impl VersionSource for CommandVersionSource {
    async fn find_tag(&self, query: &TagQuery) -> Result<String> {
        let output = process::run(
            self.command(query)?,
            process::LOOKUP_TIMEOUT,
            "registry command",
        )
        .await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        select_tag(&listing, query)
    }
}

/// Pick the desired tag out of a newest-first image listing.
///
/// With a target pattern, the newest image carrying a matching tag is chosen
/// first and the tag pattern picks among that image's tags.
pub(crate) fn select_tag(listing: &str, query: &TagQuery) -> Result<String> {
    let tag_re = query.tag_regex()?;
    let target_re = query.target_regex()?;

    let images = listing
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tags| !tags.is_empty());

    for tags in images {
        if let Some(target) = &target_re
            && !tags.iter().any(|tag| target.is_match(tag))
        {
            continue;
        }
        if let Some(tag) = tags.iter().find(|tag| tag_re.is_match(tag)) {
            return Ok((*tag).to_string());
        }
        if target_re.is_some() {
            break;
        }
    }

    anyhow::bail!(
        "No image tag in {} matches '{}'",
        query.repository,
        query.render(&query.tag_pattern)
    )
}
