//! Kernel source synchronization using the `git2` crate.
//!
//! Missing checkout: shallow clone of the pinned branch. Existing checkout:
//! fetch and fast-forward only. A checkout that cannot be fast-forwarded
//! (local commits, rewritten remote history) fails the pipeline; no merge or
//! conflict resolution is ever attempted.

use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::Repository;

use crate::error::SyncError;

/// Clone-or-update driver for the kernel fork.
pub struct SourceSync {
    url: String,
    branch: String,
    path: PathBuf,
}

impl SourceSync {
    pub fn new(url: impl Into<String>, branch: impl Into<String>, path: impl AsRef<Path>) -> Self {
        SourceSync {
            url: url.into(),
            branch: branch.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Ensure the checkout exists and tracks the pinned branch.
    pub fn sync(&self) -> Result<(), SyncError> {
        if self.path.exists() {
            log::info!(
                "Kernel source present at {}, pulling {}",
                self.path.display(),
                self.branch
            );
            self.update()
        } else {
            log::info!(
                "Cloning {} (branch {}) into {}",
                self.url,
                self.branch,
                self.path.display()
            );
            self.clone_fresh()
        }
    }

    /// Shallow clone (depth 1) at the pinned branch, with a full-clone
    /// fallback for remotes that reject shallow fetches.
    fn clone_fresh(&self) -> Result<(), SyncError> {
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.depth(1);

        let mut builder = RepoBuilder::new();
        builder.branch(&self.branch);
        builder.fetch_options(fetch_options);

        if builder.clone(&self.url, &self.path).is_ok() {
            return Ok(());
        }

        log::warn!("Shallow clone failed for {}, falling back to full clone", self.url);
        let _ = std::fs::remove_dir_all(&self.path);

        let mut builder = RepoBuilder::new();
        builder.branch(&self.branch);
        builder.clone(&self.url, &self.path).map(|_| ()).map_err(|e| {
            let _ = std::fs::remove_dir_all(&self.path);
            SyncError::CloneFailed(format!("{} (branch {}): {}", self.url, self.branch, e))
        })
    }

    /// Fetch the pinned branch from origin and fast-forward the local ref.
    fn update(&self) -> Result<(), SyncError> {
        let repo = Repository::open(&self.path)?;

        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| SyncError::FetchFailed(format!("no origin remote: {}", e)))?;

        remote
            .fetch(&[self.branch.as_str()], None, None)
            .map_err(|e| SyncError::FetchFailed(format!("{}: {}", self.url, e)))?;

        let fetch_head = repo
            .find_reference("FETCH_HEAD")
            .map_err(|_| SyncError::BranchNotFound(self.branch.clone()))?;
        let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;

        let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

        if analysis.is_up_to_date() {
            log::info!("Kernel source already up to date");
            return Ok(());
        }

        if analysis.is_fast_forward() {
            // Safe checkout first: uncommitted modifications that conflict
            // with the incoming tree make the pull fail instead of being
            // overwritten, and the branch ref only moves after the working
            // tree has been updated.
            let target = repo.find_object(fetch_commit.id(), None)?;
            repo.checkout_tree(&target, Some(&mut CheckoutBuilder::default()))
                .map_err(|e| {
                    if e.code() == git2::ErrorCode::Conflict {
                        SyncError::Diverged {
                            branch: self.branch.clone(),
                            detail: "uncommitted local modifications conflict with the \
                                     fast-forward"
                                .to_string(),
                        }
                    } else {
                        SyncError::Git(e)
                    }
                })?;

            let refname = format!("refs/heads/{}", self.branch);
            let mut reference = repo
                .find_reference(&refname)
                .map_err(|_| SyncError::BranchNotFound(self.branch.clone()))?;
            reference.set_target(
                fetch_commit.id(),
                &format!("kforge: fast-forward {}", self.branch),
            )?;
            repo.set_head(&refname)?;
            log::info!("Fast-forwarded {} to {}", self.branch, fetch_commit.id());
            return Ok(());
        }

        // Anything that would need a real merge is refused outright.
        Err(SyncError::Diverged {
            branch: self.branch.clone(),
            detail: format!("merge analysis reports {:?}", analysis),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Build a local bare "remote" with one commit on the given branch and
    /// return its path. file:// remotes keep these tests offline.
    fn make_remote(dir: &Path, branch: &str) -> PathBuf {
        let remote_path = dir.join("remote.git");
        let repo = Repository::init_bare(&remote_path).expect("init bare failed");

        let mut index = repo.index().expect("index failed");
        let tree_id = index.write_tree().expect("write_tree failed");
        let tree = repo.find_tree(tree_id).expect("find_tree failed");
        let sig = git2::Signature::now("tester", "tester@example.com").expect("sig failed");
        let commit = repo
            .commit(None, &sig, &sig, "initial", &tree, &[])
            .expect("commit failed");
        repo.reference(
            &format!("refs/heads/{}", branch),
            commit,
            true,
            "create branch",
        )
        .expect("branch ref failed");
        repo.set_head(&format!("refs/heads/{}", branch)).expect("set_head failed");

        remote_path
    }

    /// Stage and commit a single file in a non-bare repo, advancing HEAD.
    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) {
        let workdir = repo.workdir().expect("workdir missing");
        std::fs::write(workdir.join(name), content).expect("write failed");

        let mut index = repo.index().expect("index failed");
        index.add_path(Path::new(name)).expect("add_path failed");
        index.write().expect("index write failed");
        let tree_id = index.write_tree().expect("write_tree failed");
        let tree = repo.find_tree(tree_id).expect("find_tree failed");
        let sig = git2::Signature::now("upstream", "upstream@example.com").expect("sig failed");

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("commit failed");
    }

    /// Like make_remote but non-bare with a tracked file.txt, so tests can
    /// advance it with new content and exercise the fast-forward path.
    fn make_file_remote(dir: &Path, branch: &str) -> PathBuf {
        let remote_path = dir.join("file-remote");
        let repo = Repository::init(&remote_path).expect("init failed");
        repo.set_head(&format!("refs/heads/{}", branch)).expect("set_head failed");
        commit_file(&repo, "file.txt", "v1\n", "initial");
        remote_path
    }

    #[test]
    fn test_clone_then_sync_is_up_to_date() {
        let temp = tempdir().expect("Failed to create temp dir");
        let remote = make_remote(temp.path(), "thirteen");
        let checkout = temp.path().join("kernel");

        let sync = SourceSync::new(
            format!("file://{}", remote.display()),
            "thirteen",
            &checkout,
        );

        sync.sync().expect("initial clone failed");
        assert!(checkout.join(".git").exists());

        // Second run goes through the pull path and finds nothing new.
        sync.sync().expect("second sync failed");
    }

    #[test]
    fn test_clone_unreachable_remote_fails() {
        let temp = tempdir().expect("Failed to create temp dir");
        let checkout = temp.path().join("kernel");

        let sync = SourceSync::new("file:///nonexistent/remote.git", "thirteen", &checkout);
        let result = sync.sync();
        assert!(result.is_err());
        assert!(!checkout.exists());
    }

    #[test]
    fn test_diverged_checkout_is_refused() {
        let temp = tempdir().expect("Failed to create temp dir");
        let remote = make_remote(temp.path(), "thirteen");
        let checkout = temp.path().join("kernel");

        let sync = SourceSync::new(
            format!("file://{}", remote.display()),
            "thirteen",
            &checkout,
        );
        sync.sync().expect("initial clone failed");

        // Add a local commit so the branch is ahead of origin.
        let repo = Repository::open(&checkout).expect("open failed");
        let sig = git2::Signature::now("tester", "tester@example.com").expect("sig failed");
        let head = repo.head().expect("head failed");
        let parent = head.peel_to_commit().expect("peel failed");
        let mut index = repo.index().expect("index failed");
        let tree_id = index.write_tree().expect("write_tree failed");
        let tree = repo.find_tree(tree_id).expect("find_tree failed");
        repo.commit(Some("HEAD"), &sig, &sig, "local work", &tree, &[&parent])
            .expect("local commit failed");

        // Rewrite the remote branch so fast-forward is impossible both ways.
        let remote_repo = Repository::open_bare(&remote).expect("open bare failed");
        let remote_sig =
            git2::Signature::now("upstream", "upstream@example.com").expect("sig failed");
        let mut remote_index = remote_repo.index().expect("index failed");
        let remote_tree_id = remote_index.write_tree().expect("write_tree failed");
        let remote_tree = remote_repo.find_tree(remote_tree_id).expect("find_tree failed");
        let new_root = remote_repo
            .commit(None, &remote_sig, &remote_sig, "rewritten", &remote_tree, &[])
            .expect("commit failed");
        remote_repo
            .reference("refs/heads/thirteen", new_root, true, "rewrite")
            .expect("ref update failed");

        let result = sync.sync();
        assert!(matches!(result, Err(SyncError::Diverged { .. })));
    }

    #[test]
    fn test_fast_forward_updates_clean_checkout() {
        let temp = tempdir().expect("Failed to create temp dir");
        let remote = make_file_remote(temp.path(), "thirteen");
        let checkout = temp.path().join("kernel");

        let sync = SourceSync::new(
            format!("file://{}", remote.display()),
            "thirteen",
            &checkout,
        );
        sync.sync().expect("initial clone failed");

        let remote_repo = Repository::open(&remote).expect("open failed");
        commit_file(&remote_repo, "file.txt", "v2\n", "update");

        sync.sync().expect("fast-forward failed");
        let content = std::fs::read_to_string(checkout.join("file.txt")).expect("read failed");
        assert_eq!(content, "v2\n");
    }

    #[test]
    fn test_fast_forward_refuses_to_clobber_local_modifications() {
        let temp = tempdir().expect("Failed to create temp dir");
        let remote = make_file_remote(temp.path(), "thirteen");
        let checkout = temp.path().join("kernel");

        let sync = SourceSync::new(
            format!("file://{}", remote.display()),
            "thirteen",
            &checkout,
        );
        sync.sync().expect("initial clone failed");

        // Uncommitted edit to a tracked file that the incoming commit also
        // touches.
        std::fs::write(checkout.join("file.txt"), "LOCAL WORK").expect("write failed");
        let remote_repo = Repository::open(&remote).expect("open failed");
        commit_file(&remote_repo, "file.txt", "v2\n", "update");

        let result = sync.sync();
        assert!(matches!(result, Err(SyncError::Diverged { .. })));

        let content = std::fs::read_to_string(checkout.join("file.txt")).expect("read failed");
        assert_eq!(content, "LOCAL WORK");
    }
}
