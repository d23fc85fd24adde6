//! Source-control operator: one working copy of one remote repository.
//!
//! A deploy attempt walks `clone → default branch checked out → work branch
//! created → files committed → verified → pushed`. Any failure abandons the
//! attempt; leftovers are discarded by the next checkout or re-clone.

use std::path::{Component, Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository, ResetType,
    Status, StatusOptions,
};
use tempfile::TempDir;

use super::{GitCredentials, RemoteRepository, Storage};
use crate::error::{DeployError, Result};
use crate::overwrite::Overwrite;

/// Directory inside the working tree that marks a repository we created.
const REPOSITORY_MARKER: &str = ".git";

/// Staged states other than "modified" that fail verification.
const STRUCTURAL_CHANGES: Status = Status::INDEX_NEW
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE)
    .union(Status::CONFLICTED);

enum Workdir {
    Persistent(PathBuf),
    Scratch(TempDir),
}

impl Workdir {
    fn path(&self) -> &Path {
        match self {
            Workdir::Persistent(path) => path,
            Workdir::Scratch(dir) => dir.path(),
        }
    }
}

/// A change moving one phase to a new image tag.
#[derive(Debug, Clone)]
pub struct ImageTagChange<'a> {
    pub project_id: &'a str,
    pub phase: crate::project::PhaseName,
    /// Kustomization path of the phase inside the repository.
    pub path: &'a str,
    pub image: &'a str,
    pub tag: &'a str,
}

impl ImageTagChange<'_> {
    pub fn branch(&self) -> String {
        crate::project::deploy_branch_name(self.project_id, self.phase, self.tag)
    }

    pub fn commit_message(&self) -> String {
        format!(
            "Change docker image tag. target: {}, phase: {}, tag: {}.",
            self.path, self.phase, self.tag
        )
    }

    /// ConfigMap next to the kustomization.
    pub fn sibling_config_path(&self) -> String {
        self.path.replace("kustomization.yaml", "configmap.yaml")
    }
}

/// Result of pushing an image-tag change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed { branch: String, commit: String },
    /// Nothing was staged; the default branch already carries the change.
    NothingToCommit,
}

/// Owns a working copy of a single remote repository.
pub struct SourceControlOperator {
    remote: RemoteRepository,
    credentials: GitCredentials,
    workdir: Workdir,
    repository: Option<Repository>,
}

impl std::fmt::Debug for SourceControlOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceControlOperator")
            .field("remote", &self.remote)
            .field("credentials", &self.credentials)
            .field("workdir", &self.workdir.path())
            .field("cloned", &self.repository.is_some())
            .finish()
    }
}

impl SourceControlOperator {
    /// Create an operator without touching the network. Call
    /// [`SourceControlOperator::clone_remote`] before anything else.
    pub fn new(
        remote: RemoteRepository,
        credentials: GitCredentials,
        storage: &Storage,
    ) -> Result<Self> {
        let workdir = match storage {
            Storage::Persistent(root) => Workdir::Persistent(remote.local_path(root)),
            Storage::Scratch => Workdir::Scratch(scratch_dir()?),
        };
        Ok(Self {
            remote,
            credentials,
            workdir,
            repository: None,
        })
    }

    /// Create an operator and clone immediately.
    ///
    /// A failed clone is logged, not returned: the operator retries on its
    /// next checkout.
    pub fn connect(
        remote: RemoteRepository,
        credentials: GitCredentials,
        storage: &Storage,
    ) -> Result<Self> {
        let mut operator = Self::new(remote, credentials, storage)?;
        if let Err(err) = operator.clone_remote() {
            tracing::error!(remote = %operator.remote.url, error = %err, "Failed to clone");
        }
        Ok(operator)
    }

    pub fn remote(&self) -> &RemoteRepository {
        &self.remote
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn is_cloned(&self) -> bool {
        self.repository.is_some()
    }

    fn repo(&self) -> Result<&Repository> {
        self.repository.as_ref().ok_or(DeployError::NotCloned)
    }

    /// Establish a fresh local mirror of the remote, replacing any previous
    /// working copy.
    pub fn clone_remote(&mut self) -> Result<()> {
        self.repository = None;
        match &self.workdir {
            Workdir::Persistent(path) => {
                let path = path.clone();
                if path.join(REPOSITORY_MARKER).exists() {
                    self.clean()?;
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Workdir::Scratch(_) => {
                self.workdir = Workdir::Scratch(scratch_dir()?);
            }
        }

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks());
        let repository = RepoBuilder::new()
            .fetch_options(fetch)
            .clone(&self.remote.url, self.workdir.path())
            .map_err(|e| DeployError::transport("clone", &self.remote.url, e))?;

        tracing::info!(
            remote = %self.remote.url,
            path = %self.workdir.path().display(),
            "Cloned repository"
        );
        self.repository = Some(repository);
        Ok(())
    }

    /// Delete the working copy.
    ///
    /// Refuses, without deleting anything, unless the directory carries a
    /// `.git` marker.
    pub fn clean(&mut self) -> Result<()> {
        match &self.workdir {
            Workdir::Persistent(path) => {
                let marker = path.join(REPOSITORY_MARKER);
                if !marker.exists() {
                    return Err(DeployError::UnsafeClean { path: path.clone() });
                }
                self.repository = None;
                std::fs::remove_dir_all(path)?;
                tracing::debug!(path = %path.display(), "Removed working copy");
            }
            Workdir::Scratch(_) => {
                self.repository = None;
                self.workdir = Workdir::Scratch(scratch_dir()?);
            }
        }
        Ok(())
    }

    /// Delete a local branch. Fails when the branch is missing or checked out.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut branch = repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    }

    /// Check out the default branch and bring it up to date with the remote.
    ///
    /// When the pull fails the working copy is re-cloned from scratch.
    pub fn checkout_default_branch(&mut self) -> Result<()> {
        if self.repository.is_none() {
            self.clone_remote()?;
        }
        self.switch_to_default_branch()?;

        if let Err(err) = self.pull_default_branch() {
            tracing::error!(
                remote = %self.remote.url,
                branch = %self.remote.default_branch,
                error = %err,
                "Failed to pull default branch"
            );
            tracing::info!(remote = %self.remote.url, "Re-cloning to recover");
            self.clone_remote()?;
            self.switch_to_default_branch()?;
        }
        Ok(())
    }

    fn switch_to_default_branch(&self) -> Result<()> {
        let repo = self.repo()?;
        let default = &self.remote.default_branch;
        let local_ref = format!("refs/heads/{}", default);

        if repo.find_reference(&local_ref).is_err() {
            let tracking = repo
                .find_reference(&format!("refs/remotes/origin/{}", default))?
                .peel_to_commit()?;
            repo.branch(default, &tracking, false)?;
        }

        repo.set_head(&local_ref)?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn pull_default_branch(&self) -> Result<()> {
        let repo = self.repo()?;
        let default = &self.remote.default_branch;

        let mut remote = repo.find_remote("origin")?;
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks());
        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", default);
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch), None)
            .map_err(|e| DeployError::transport("fetch", &self.remote.url, e))?;

        let upstream = repo
            .find_reference(&format!("refs/remotes/origin/{}", default))?
            .peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.reset(upstream.as_object(), ResetType::Hard, Some(&mut checkout))?;
        Ok(())
    }

    /// Cut `name` fresh from the up-to-date default branch and check it out.
    ///
    /// A local branch with the same name is replaced.
    pub fn create_and_checkout_branch(&mut self, name: &str) -> Result<()> {
        if self.repository.is_some()
            && let Err(err) = self.delete_branch(name)
            && !matches!(&err, DeployError::Git(e) if e.code() == git2::ErrorCode::NotFound)
        {
            tracing::warn!(branch = %name, error = %err, "Failed to delete branch");
        }

        self.checkout_default_branch()?;

        let repo = self.repo()?;
        let base = repo.head()?.peel_to_commit()?;
        repo.branch(name, &base, true)?;
        repo.set_head(&format!("refs/heads/{}", name))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        tracing::debug!(branch = %name, base = %base.id(), "Created work branch");
        Ok(())
    }

    /// Read a file from the working tree. `None` when it does not exist.
    pub fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(&full)?))
    }

    /// Rewrite `path` with `overwrite` and stage it.
    ///
    /// A missing file is not an error: returns `false` and stages nothing.
    pub fn commit_overwrite(&self, path: &str, overwrite: &Overwrite) -> Result<bool> {
        let repo = self.repo()?;
        let full = self.resolve(path)?;
        if !full.is_file() {
            tracing::info!(path = %path, overwrite = overwrite.label(), "File does not exist, skipping");
            return Ok(false);
        }

        let current = std::fs::read(&full)?;
        let document = overwrite.apply(&current).map_err(|e| DeployError::Manifest {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let rendered = serde_yaml_ng::to_string(&document).map_err(|e| DeployError::Manifest {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&full, rendered)?;

        let mut index = repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        Ok(true)
    }

    /// Fail closed unless every changed path is a staged modification.
    ///
    /// Returns the number of staged modifications.
    pub fn verify(&self) -> Result<usize> {
        let repo = self.repo()?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut options))?;

        let mut modified = 0;
        let mut unexpected = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            let path = entry.path().unwrap_or("<non-utf8 path>").to_string();
            if status.contains(Status::INDEX_MODIFIED) && !status.intersects(STRUCTURAL_CHANGES) {
                modified += 1;
            } else {
                tracing::error!(path = %path, status = ?status, "Unexpected file update");
                unexpected.push(path);
            }
        }

        if unexpected.is_empty() {
            Ok(modified)
        } else {
            Err(DeployError::Drift { paths: unexpected })
        }
    }

    /// Commit the index onto the checked-out branch.
    pub fn commit(&self, message: &str) -> Result<Oid> {
        let repo = self.repo()?;
        let signature = self.credentials.signature()?;
        let mut index = repo.index()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let parent = repo.head()?.peel_to_commit()?;
        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        Ok(oid)
    }

    /// Push the local branch `name` to the same name on the remote.
    pub fn push(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", name);

        let mut rejection: Option<String> = None;
        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    rejection = Some(format!("{}: {}", reference, message));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| DeployError::transport("push", &self.remote.url, e))?;
        }

        if let Some(message) = rejection {
            return Err(DeployError::transport(
                "push",
                &self.remote.url,
                git2::Error::from_str(&message),
            ));
        }
        tracing::info!(branch = %name, remote = %self.remote.url, "Pushed branch");
        Ok(())
    }

    /// Run the whole image-tag deploy sequence: branch, rewrite the
    /// kustomization and its sibling ConfigMap, verify, commit and push.
    pub fn push_image_tag(
        &mut self,
        change: &ImageTagChange<'_>,
        cache_stamp: Overwrite,
    ) -> Result<PushOutcome> {
        let branch = change.branch();
        self.create_and_checkout_branch(&branch)?;

        self.commit_overwrite(change.path, &Overwrite::image_tag(change.image, change.tag))?;
        self.commit_overwrite(&change.sibling_config_path(), &cache_stamp)?;

        self.publish(&branch, &change.commit_message())
    }

    /// Verify the staged overwrites, then commit and push them to `branch`.
    ///
    /// Drift fails before anything is committed.
    pub fn publish(&self, branch: &str, message: &str) -> Result<PushOutcome> {
        if self.verify()? == 0 {
            tracing::info!(branch = %branch, "Nothing to commit");
            return Ok(PushOutcome::NothingToCommit);
        }

        let commit = self.commit(message)?;
        if let Err(err) = self.push(branch) {
            tracing::error!(branch = %branch, error = %err, "Failed to push");
            return Err(err);
        }

        Ok(PushOutcome::Pushed {
            branch: branch.to_string(),
            commit: commit.to_string(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        ensure_relative_path(Path::new(path))?;
        Ok(self.workdir.path().join(path))
    }

    fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let username = self.credentials.username.clone();
        let token = self.credentials.token.clone();
        let mut attempts = 0;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            attempts += 1;
            if attempts > 1 {
                return Err(git2::Error::from_str("authentication rejected by remote"));
            }
            Cred::userpass_plaintext(&username, &token)
        });
        callbacks
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("shipcat-").tempdir()?)
}

fn ensure_relative_path(path: &Path) -> Result<()> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir));
    if escapes {
        return Err(DeployError::Manifest {
            path: path.display().to_string(),
            message: "path must stay inside the repository".to_string(),
        });
    }
    Ok(())
}
