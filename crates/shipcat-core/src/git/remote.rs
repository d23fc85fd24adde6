//! Remote repository coordinates, credentials and local storage layout.

use std::fmt;
use std::path::{Path, PathBuf};

use git2::Signature;

/// Committer name used when no username is configured.
const DEFAULT_COMMITTER: &str = "shipcat";

/// Remote repository an operator mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    /// Clone URL, e.g. `https://github.com/org/repo.git`.
    pub url: String,
    /// Branch every deploy branch is cut from.
    pub default_branch: String,
}

impl RemoteRepository {
    pub fn new(url: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            default_branch: default_branch.into(),
        }
    }

    /// Local directory for this remote under `root`.
    ///
    /// The URL scheme and a trailing `.git` are dropped so
    /// `https://github.com/org/repo.git` lands at `<root>/github.com/org/repo`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let without_scheme = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => self.url.as_str(),
        };
        let trimmed = without_scheme.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

        let mut path = root.to_path_buf();
        for part in trimmed.split(['/', '\\']) {
            if part.is_empty() || part == "." || part == ".." {
                continue;
            }
            path.push(part);
        }
        path
    }
}

/// HTTP basic-auth credentials shared by clone, fetch and push.
#[derive(Clone, Default)]
pub struct GitCredentials {
    /// Any non-empty string works when `token` is a personal access token.
    pub username: String,
    pub token: String,
    /// Committer email. Empty means a no-reply address for `username`.
    pub email: String,
}

impl GitCredentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            email: String::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Author and committer of deploy commits, stamped now.
    pub fn signature(&self) -> Result<Signature<'static>, git2::Error> {
        let name = if self.username.is_empty() {
            DEFAULT_COMMITTER
        } else {
            self.username.as_str()
        };
        let email = if self.email.is_empty() {
            format!("{}@users.noreply.github.com", name)
        } else {
            self.email.clone()
        };
        Signature::now(name, &email)
    }
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Where an operator keeps its working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Deterministic directory under a configured root.
    Persistent(PathBuf),
    /// Private temporary directory removed when the operator is dropped.
    Scratch,
}

impl Storage {
    pub fn from_root(root: Option<PathBuf>) -> Self {
        match root {
            Some(root) => Storage::Persistent(root),
            None => Storage::Scratch,
        }
    }
}
