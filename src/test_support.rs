//! Local stand-ins for GitHub repositories.

use std::{
    fs,
    path::{Path, PathBuf},
};

use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use crate::{git::RepoSync, paths::PathTemplate};

/// A repository at `<tmp>/remotes/<owner>/<repo>.git` plus a scratch area for
/// working copies at `<tmp>/work/<owner>/<repo>/<branch>`.
pub struct Remote {
    root: TempDir,
    repo: Repository,
    path: PathBuf,
}

impl Remote {
    pub fn new(owner: &str, repo: &str, branch: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let path = root
            .path()
            .join("remotes")
            .join(owner)
            .join(format!("{}.git", repo));
        fs::create_dir_all(&path).unwrap();

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch);
        let repo = Repository::init_opts(&path, &opts).unwrap();

        Self { root, repo, path }
    }

    pub fn sync(&self) -> RepoSync {
        RepoSync::new(self.template(), self.root.path().join("remotes").to_string_lossy())
    }

    pub fn template(&self) -> PathTemplate {
        PathTemplate::new(format!(
            "{}/work/$REPO_OWNER/$REPO_NAME/$BRANCH",
            self.root.path().display()
        ))
    }

    /// Commits `contents` as `file` on the current branch.
    pub fn commit(&self, file: &str, contents: &str) -> Oid {
        fs::write(self.path.join(file), contents).unwrap();

        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::now("Deploy Bot", "deploy@example.com").unwrap();
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &sig, &sig, &format!("Update {}", file), &tree, &parents)
            .unwrap()
    }

    /// Makes the remote unreachable.
    pub fn delete(&self) {
        fs::remove_dir_all(&self.path).unwrap();
    }
}
