//! Local git fixtures: a seeded bare "remote" plus helpers to inspect it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::{BranchType, Commit, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub struct BareRemote {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl BareRemote {
    /// Bare repository whose `main` branch holds `files`.
    pub fn seeded(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let repo = Repository::init_opts(&seed, &options).unwrap();
        for (path, content) in files {
            write(&seed, path, content);
        }
        commit_all(&repo, "initial");

        let path = dir.path().join("remote.git");
        RepoBuilder::new()
            .bare(true)
            .clone(&seed.to_string_lossy(), &path)
            .unwrap();
        Self { dir, path }
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Scratch directory next to the remote for working copies.
    pub fn workdirs(&self) -> PathBuf {
        self.dir.path().join("workdirs")
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        let repo = Repository::open_bare(&self.path).unwrap();
        repo.find_branch(branch, BranchType::Local).is_ok()
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        let repo = Repository::open_bare(&self.path).unwrap();
        let commit = repo
            .find_branch(branch, BranchType::Local)
            .ok()?
            .get()
            .peel_to_commit()
            .unwrap();
        let entry = commit.tree().unwrap().get_path(Path::new(path)).ok()?;
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        Some(String::from_utf8(blob.content().to_vec()).unwrap())
    }
}

pub fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

pub fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Fixture", "fixture@example.com").unwrap();
    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}
