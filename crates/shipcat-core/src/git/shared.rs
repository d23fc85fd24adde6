//! Async access to an operator shared between tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{SourceControlOperator, lock_workdir};
use crate::error::{DeployError, Result};

/// A [`SourceControlOperator`] that many tasks may drive, one at a time.
///
/// Every call holds the working-copy lock for the operator's directory and
/// runs on the blocking pool, so libgit2 never stalls the runtime.
#[derive(Debug, Clone)]
pub struct SharedOperator {
    inner: Arc<Mutex<SourceControlOperator>>,
    workdir: PathBuf,
}

impl SharedOperator {
    pub fn new(operator: SourceControlOperator) -> Self {
        let workdir = operator.workdir().to_path_buf();
        Self {
            inner: Arc::new(Mutex::new(operator)),
            workdir,
        }
    }

    /// Directory the operator was created for.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `f` with exclusive access to the operator and its directory.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SourceControlOperator) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _workdir = lock_workdir(&self.workdir).await;
        let mut operator = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut operator))
            .await
            .map_err(|e| DeployError::Other(anyhow::anyhow!("git task panicked: {}", e)))?
    }
}
