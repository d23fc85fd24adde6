//! Tests for the git module against local bare remotes.

use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::{BranchType, Commit, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use super::*;
use crate::error::DeployError;
use crate::overwrite::Overwrite;
use crate::project::PhaseName;

const STAGING_KUSTOMIZATION: &str = "api/overlays/staging/kustomization.yaml";
const STAGING_CONFIGMAP: &str = "api/overlays/staging/configmap.yaml";
const PRODUCTION_KUSTOMIZATION: &str = "api/overlays/production/kustomization.yaml";

const RAW_KUSTOMIZATION: &str = "\
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
- ../../base
images:
- name: app
  newTag: v1
";

const RAW_CONFIGMAP: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: api
data:
  MEMCACHED_PREFIX: 2020-01-01T00:00:00
";

struct Fixture {
    dir: TempDir,
    remote: PathBuf,
}

impl Fixture {
    fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("workdirs")
    }

    fn operator(&self) -> SourceControlOperator {
        SourceControlOperator::new(
            RemoteRepository::new(self.remote_url(), "main"),
            GitCredentials::new("shipcat", "token").with_email("bot@example.com"),
            &Storage::Persistent(self.root()),
        )
        .unwrap()
    }

    /// Commit `content` to `path` on the remote's default branch from a
    /// separate clone.
    fn push_upstream(&self, path: &str, content: &str) {
        let upstream = self.dir.path().join("upstream");
        let _ = std::fs::remove_dir_all(&upstream);
        let repo = Repository::clone(&self.remote_url(), &upstream).unwrap();
        write(&upstream, path, content);
        commit_all(&repo, "upstream change");
        repo.find_remote("origin")
            .unwrap()
            .push(&["refs/heads/main:refs/heads/main"], None)
            .unwrap();
    }

    fn remote_file(&self, branch: &str, path: &str) -> Option<String> {
        let repo = Repository::open_bare(&self.remote).unwrap();
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

    fn remote_message(&self, branch: &str) -> String {
        let repo = Repository::open_bare(&self.remote).unwrap();
        let commit = repo
            .find_branch(branch, BranchType::Local)
            .unwrap()
            .get()
            .peel_to_commit()
            .unwrap();
        commit.message().unwrap().to_string()
    }
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Fixture", "fixture@example.com").unwrap();
    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parent_refs,
    )
    .unwrap()
}

/// Kustomization bytes exactly as the image-tag rewrite renders them.
fn normalized_kustomization() -> String {
    let value = Overwrite::image_tag("app", "v1")
        .apply(RAW_KUSTOMIZATION.as_bytes())
        .unwrap();
    serde_yaml_ng::to_string(&value).unwrap()
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let seed = dir.path().join("seed");
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main");
    let repo = Repository::init_opts(&seed, &options).unwrap();

    write(&seed, STAGING_KUSTOMIZATION, &normalized_kustomization());
    write(&seed, STAGING_CONFIGMAP, RAW_CONFIGMAP);
    write(&seed, PRODUCTION_KUSTOMIZATION, &normalized_kustomization());
    commit_all(&repo, "initial");

    let remote = dir.path().join("remote.git");
    RepoBuilder::new()
        .bare(true)
        .clone(&seed.to_string_lossy(), &remote)
        .unwrap();

    Fixture { dir, remote }
}

fn staging_change(tag: &str) -> ImageTagChange<'_> {
    ImageTagChange {
        project_id: "api",
        phase: PhaseName::Staging,
        path: STAGING_KUSTOMIZATION,
        image: "app",
        tag,
    }
}

fn fixed_stamp() -> Overwrite {
    Overwrite::CachePrefix {
        stamp: "2024-05-01T12:34:56".to_string(),
    }
}

mod operator_tests {
    use super::*;

    #[test]
    fn clone_checks_out_default_branch() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        assert!(!operator.is_cloned());

        operator.checkout_default_branch().unwrap();

        assert!(operator.is_cloned());
        assert!(operator.workdir().starts_with(fixture.root()));
        assert!(operator.workdir().join(".git").is_dir());
        let content = operator.read_file(STAGING_CONFIGMAP).unwrap().unwrap();
        assert_eq!(String::from_utf8(content).unwrap(), RAW_CONFIGMAP);
    }

    #[test]
    fn checkout_pulls_upstream_changes() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.clone_remote().unwrap();

        fixture.push_upstream("README.md", "fresh\n");
        operator.checkout_default_branch().unwrap();

        let content = operator.read_file("README.md").unwrap().unwrap();
        assert_eq!(content, b"fresh\n");
    }

    #[test]
    fn push_image_tag_publishes_branch() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.clone_remote().unwrap();

        let change = staging_change("v2");
        let outcome = operator.push_image_tag(&change, fixed_stamp()).unwrap();

        let branch = "bot/docker-image-tag-api-staging-v2";
        assert!(matches!(&outcome, PushOutcome::Pushed { branch: b, .. } if b == branch));

        let kustomization = fixture.remote_file(branch, STAGING_KUSTOMIZATION).unwrap();
        assert!(kustomization.contains("newTag: v2"));
        assert!(kustomization.contains("- ../../base"));
        let configmap = fixture.remote_file(branch, STAGING_CONFIGMAP).unwrap();
        assert!(configmap.contains("2024-05-01T12:34:56"));
        assert_eq!(
            fixture.remote_message(branch),
            "Change docker image tag. target: api/overlays/staging/kustomization.yaml, phase: staging, tag: v2."
        );

        let default = fixture.remote_file("main", STAGING_KUSTOMIZATION).unwrap();
        assert!(default.contains("newTag: v1"));
    }

    #[test]
    fn push_image_tag_without_configured_email() {
        let fixture = fixture();
        let mut operator = SourceControlOperator::new(
            RemoteRepository::new(fixture.remote_url(), "main"),
            GitCredentials::new("shipcat", "token"),
            &Storage::Persistent(fixture.root()),
        )
        .unwrap();
        operator.clone_remote().unwrap();

        let outcome = operator
            .push_image_tag(&staging_change("v5"), fixed_stamp())
            .unwrap();

        assert!(matches!(outcome, PushOutcome::Pushed { .. }));
        let repo = Repository::open_bare(&fixture.remote).unwrap();
        let commit = repo
            .find_branch("bot/docker-image-tag-api-staging-v5", BranchType::Local)
            .unwrap()
            .get()
            .peel_to_commit()
            .unwrap();
        assert_eq!(
            commit.author().email(),
            Some("shipcat@users.noreply.github.com")
        );
    }

    #[test]
    fn push_image_tag_without_changes_commits_nothing() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.clone_remote().unwrap();

        let change = ImageTagChange {
            project_id: "api",
            phase: PhaseName::Production,
            path: PRODUCTION_KUSTOMIZATION,
            image: "app",
            tag: "v1",
        };
        let outcome = operator.push_image_tag(&change, fixed_stamp()).unwrap();

        assert_eq!(outcome, PushOutcome::NothingToCommit);
        assert!(
            fixture
                .remote_file(&change.branch(), PRODUCTION_KUSTOMIZATION)
                .is_none()
        );
    }

    #[test]
    fn commit_overwrite_skips_missing_file() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.checkout_default_branch().unwrap();

        let staged = operator
            .commit_overwrite("api/overlays/sandbox/configmap.yaml", &fixed_stamp())
            .unwrap();

        assert!(!staged);
        assert_eq!(operator.verify().unwrap(), 0);
    }

    #[test]
    fn commit_overwrite_rejects_escaping_path() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.checkout_default_branch().unwrap();

        let err = operator
            .commit_overwrite("../outside.yaml", &fixed_stamp())
            .unwrap_err();
        assert!(matches!(err, DeployError::Manifest { .. }));
    }

    #[test]
    fn verify_rejects_untracked_file() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.create_and_checkout_branch("bot/test").unwrap();

        operator
            .commit_overwrite(STAGING_KUSTOMIZATION, &Overwrite::image_tag("app", "v3"))
            .unwrap();
        write(operator.workdir(), "stray.txt", "not ours\n");

        match operator.verify() {
            Err(DeployError::Drift { paths }) => assert_eq!(paths, vec!["stray.txt".to_string()]),
            other => panic!("expected drift, got {:?}", other),
        }
    }

    #[test]
    fn staged_new_file_is_never_pushed() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        let branch = "bot/docker-image-tag-api-staging-v4";
        operator.create_and_checkout_branch(branch).unwrap();
        operator
            .commit_overwrite(STAGING_KUSTOMIZATION, &Overwrite::image_tag("app", "v4"))
            .unwrap();

        write(operator.workdir(), "api/overlays/staging/secret.env", "TOKEN=x\n");
        let repo = Repository::open(operator.workdir()).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_path(Path::new("api/overlays/staging/secret.env"))
            .unwrap();
        index.write().unwrap();

        match operator.publish(branch, "should not land") {
            Err(DeployError::Drift { paths }) => {
                assert_eq!(paths, vec!["api/overlays/staging/secret.env".to_string()])
            }
            other => panic!("expected drift, got {:?}", other),
        }
        assert!(
            fixture
                .remote_file(branch, STAGING_KUSTOMIZATION)
                .is_none()
        );
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("initial"));
    }

    #[test]
    fn verify_rejects_unstaged_modification() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.checkout_default_branch().unwrap();

        write(operator.workdir(), STAGING_CONFIGMAP, "data: {}\n");

        assert!(matches!(
            operator.verify(),
            Err(DeployError::Drift { .. })
        ));
    }

    #[test]
    fn verify_counts_staged_modifications() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.create_and_checkout_branch("bot/test").unwrap();

        operator
            .commit_overwrite(STAGING_KUSTOMIZATION, &Overwrite::image_tag("app", "v3"))
            .unwrap();
        operator
            .commit_overwrite(STAGING_CONFIGMAP, &fixed_stamp())
            .unwrap();

        assert_eq!(operator.verify().unwrap(), 2);
    }

    #[test]
    fn existing_branch_is_recreated_from_default() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.create_and_checkout_branch("bot/retry").unwrap();
        operator
            .commit_overwrite(STAGING_KUSTOMIZATION, &Overwrite::image_tag("app", "v9"))
            .unwrap();
        operator.commit("abandoned attempt").unwrap();

        operator.create_and_checkout_branch("bot/retry").unwrap();

        let content = operator.read_file(STAGING_KUSTOMIZATION).unwrap().unwrap();
        let content = String::from_utf8(content).unwrap();
        assert!(content.contains("newTag: v1"));
        assert!(!content.contains("v9"));
    }

    #[test]
    fn clean_refuses_directory_without_marker() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        write(operator.workdir(), "precious.txt", "keep me\n");

        let err = operator.clean().unwrap_err();

        assert!(matches!(err, DeployError::UnsafeClean { .. }));
        assert!(operator.workdir().join("precious.txt").exists());
    }

    #[test]
    fn clean_removes_cloned_copy() {
        let fixture = fixture();
        let mut operator = fixture.operator();
        operator.clone_remote().unwrap();

        operator.clean().unwrap();

        assert!(!operator.workdir().exists());
        assert!(!operator.is_cloned());
        assert!(matches!(operator.verify(), Err(DeployError::NotCloned)));
    }

    #[test]
    fn scratch_copy_is_removed_on_drop() {
        let fixture = fixture();
        let mut operator = SourceControlOperator::new(
            RemoteRepository::new(fixture.remote_url(), "main"),
            GitCredentials::new("shipcat", "token"),
            &Storage::Scratch,
        )
        .unwrap();
        operator.checkout_default_branch().unwrap();
        let workdir = operator.workdir().to_path_buf();
        assert!(workdir.join(".git").is_dir());

        drop(operator);

        assert!(!workdir.exists());
    }

    #[test]
    fn clone_of_missing_remote_is_transport_error() {
        let dir = TempDir::new().unwrap();
        let mut operator = SourceControlOperator::new(
            RemoteRepository::new(dir.path().join("missing.git").to_string_lossy(), "main"),
            GitCredentials::new("shipcat", "token"),
            &Storage::Scratch,
        )
        .unwrap();

        let err = operator.clone_remote().unwrap_err();
        assert!(matches!(err, DeployError::Transport { operation: "clone", .. }));
    }
}

mod shared_tests {
    use super::*;

    #[tokio::test]
    async fn run_serializes_access() {
        let fixture = fixture();
        let shared = SharedOperator::new(fixture.operator());

        let first = shared.clone();
        let a = tokio::spawn(async move {
            first
                .run(|operator| {
                    operator.checkout_default_branch()?;
                    Ok(operator.is_cloned())
                })
                .await
        });
        let second = shared.clone();
        let b = tokio::spawn(async move {
            second
                .run(|operator| {
                    operator.checkout_default_branch()?;
                    operator.verify()
                })
                .await
        });

        assert!(a.await.unwrap().unwrap());
        assert_eq!(b.await.unwrap().unwrap(), 0);
    }
}
