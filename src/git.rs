use std::{fmt, io, path::PathBuf};

use git2::{build::CheckoutBuilder, build::RepoBuilder, Repository};

use crate::paths::PathTemplate;

/// One working copy: a single branch of a single repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl BranchSpec {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for BranchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    UpToDate,
    FastForwarded,
    Recloned,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to create {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to remove {path:?}: {source}")]
    Remove { path: PathBuf, source: io::Error },
    #[error("failed to clone {url}: {source}")]
    Clone { url: String, source: git2::Error },
    #[error("failed to fetch `{branch}`: {source}")]
    Fetch { branch: String, source: git2::Error },
    #[error("failed to merge `{branch}`: {source}")]
    Merge { branch: String, source: git2::Error },
    #[error("local branch `{0}` has diverged from the remote, refusing to merge")]
    NonFastForward(String),
}

impl SyncError {
    /// Whether the working copy is still the one that existed before the
    /// failed sync, i.e. stale but intact.
    pub fn left_stale_copy(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::Merge { .. } | SyncError::NonFastForward(_)
        )
    }
}

/// Keeps working copies in sync with GitHub. Every operation is blocking.
#[derive(Debug, Clone)]
pub struct RepoSync {
    template: PathTemplate,
    remote_base: String,
}

impl RepoSync {
    pub fn new(template: PathTemplate, remote_base: impl Into<String>) -> Self {
        Self {
            template,
            remote_base: remote_base.into(),
        }
    }

    pub fn path(&self, spec: &BranchSpec) -> PathBuf {
        self.template.resolve(&spec.owner, &spec.repo, &spec.branch)
    }

    pub fn remote_url(&self, spec: &BranchSpec) -> String {
        format!(
            "{}/{}/{}.git",
            self.remote_base.trim_end_matches('/'),
            spec.owner,
            spec.repo
        )
    }

    /// Fresh clone of the branch into its working directory. Whatever a
    /// failed clone leaves behind stays there.
    pub fn clone_branch(&self, spec: &BranchSpec) -> Result<Repository, SyncError> {
        let url = self.remote_url(spec);
        let path = self.path(spec);
        tracing::debug!(url = url.as_str(), "Cloning {} into {:?}", spec, path);

        match RepoBuilder::new().branch(&spec.branch).clone(&url, &path) {
            Ok(repo) => {
                tracing::info!(
                    url = url.as_str(),
                    path = path.to_string_lossy().as_ref(),
                    "Cloned {} to {:?}",
                    spec,
                    path
                );
                Ok(repo)
            }
            Err(err) => {
                tracing::error!(
                    url = url.as_str(),
                    path = path.to_string_lossy().as_ref(),
                    "Failed to clone {}: {}",
                    spec,
                    err
                );
                Err(SyncError::Clone { url, source: err })
            }
        }
    }

    /// Brings the working copy up to date with the remote branch.
    ///
    /// A directory that can't be opened as a repository is wiped and cloned
    /// again. Fetch and merge failures on an opened repository are only
    /// reported, the next push retries them.
    pub fn pull(&self, spec: &BranchSpec) -> Result<SyncOutcome, SyncError> {
        let path = self.path(spec);
        tracing::debug!("Pulling {} in {:?}", spec, path);

        if !path.exists() {
            std::fs::create_dir_all(&path).map_err(|source| {
                tracing::error!("Failed to create {:?}: {}", path, source);
                SyncError::CreateDir {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        let repo = match Repository::open(&path) {
            Ok(repo) => repo,
            Err(err) => {
                tracing::debug!("Failed to open repo at {:?}: {}", path, err);
                self.remove(spec)?;
                self.clone_branch(spec)?;
                return Ok(SyncOutcome::Recloned);
            }
        };

        let outcome = fast_forward(&repo, &spec.branch);
        match &outcome {
            Ok(SyncOutcome::UpToDate) => tracing::info!("{} is already up to date", spec),
            Ok(_) => tracing::info!("Fast-forwarded {} in {:?}", spec, path),
            Err(err) => tracing::error!("Failed to pull repo at {:?}: {}", path, err),
        }
        outcome
    }

    /// Deletes the working copy. A directory that isn't there counts as removed.
    pub fn remove(&self, spec: &BranchSpec) -> Result<(), SyncError> {
        let path = self.path(spec);
        tracing::debug!("Removing {:?}", path);

        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => {
                tracing::error!("Failed to remove repo at {:?}: {}", path, source);
                Err(SyncError::Remove { path, source })
            }
        }
    }
}

fn fast_forward(repo: &Repository, branch: &str) -> Result<SyncOutcome, SyncError> {
    let fetch_err = |source| SyncError::Fetch {
        branch: branch.to_owned(),
        source,
    };
    let merge_err = |source| SyncError::Merge {
        branch: branch.to_owned(),
        source,
    };

    let local_ref = format!("refs/heads/{}", branch);
    let tracking_ref = format!("refs/remotes/origin/{}", branch);

    let mut origin = repo.find_remote("origin").map_err(fetch_err)?;
    origin
        .fetch(&[format!("+{}:{}", local_ref, tracking_ref)], None, None)
        .map_err(fetch_err)?;

    let fetched = repo.find_reference(&tracking_ref).map_err(merge_err)?;
    let fetched = repo
        .reference_to_annotated_commit(&fetched)
        .map_err(merge_err)?;

    let (analysis, _) = repo.merge_analysis(&[&fetched]).map_err(merge_err)?;
    if analysis.is_up_to_date() {
        return Ok(SyncOutcome::UpToDate);
    }
    if !analysis.is_fast_forward() {
        return Err(SyncError::NonFastForward(branch.to_owned()));
    }

    let mut local = repo.find_reference(&local_ref).map_err(merge_err)?;
    local
        .set_target(fetched.id(), &format!("fast-forward {} to {}", branch, fetched.id()))
        .map_err(merge_err)?;
    repo.set_head(&local_ref).map_err(merge_err)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .map_err(merge_err)?;

    Ok(SyncOutcome::FastForwarded)
}
