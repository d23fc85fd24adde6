//! Running external commands with a deadline.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::time::timeout;

/// Upper bound for registry lookups.
pub(crate) const LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for the apply tool, which opens pull requests.
pub(crate) const APPLY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Run `command` to completion, failing on timeout or a non-zero exit.
pub(crate) async fn run(mut command: Command, limit: Duration, description: &str) -> Result<Output> {
    command.kill_on_drop(true);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = timeout(limit, command.output())
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {}s", description, limit.as_secs()))?
        .with_context(|| format!("Failed to start {}", description))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{} exited with {}: {}",
            description,
            output.status,
            stderr.trim()
        );
    }
    Ok(output)
}
