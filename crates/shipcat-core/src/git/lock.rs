//! Per-path locks for on-disk working copies.
//!
//! Two operators pointing at the same directory must never clone, check out
//! or push at the same time. Every sequence of working-copy operations holds
//! the lock for its directory from start to finish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

static WORKDIR_LOCKS: LazyLock<parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| parking_lot::Mutex::new(HashMap::new()));

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = WORKDIR_LOCKS.lock();
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// Wait for exclusive access to the working copy at `path`.
pub async fn lock_workdir(path: &Path) -> OwnedMutexGuard<()> {
    lock_for(path).lock_owned().await
}
