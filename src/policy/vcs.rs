//! Read-only version-control state, backed by libgit2.

use git2::{Repository, Status, StatusOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("cannot read repository {}: {source}", path.display())]
    Git {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
}

impl VcsError {
    fn git(path: &Path, source: git2::Error) -> Self {
        Self::Git {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Questions the safety layer asks about working trees.
pub trait VcsStatus: Send + Sync {
    /// Nearest enclosing working-tree root, the path itself included.
    fn discover(&self, path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .find(|dir| self.is_repo_root(dir))
            .map(Path::to_path_buf)
    }

    fn is_repo_root(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    /// Modified, staged or untracked-but-not-ignored content anywhere in the
    /// working tree, submodules included.
    fn has_uncommitted_changes(&self, root: &Path) -> Result<bool, VcsError>;

    fn has_remote(&self, root: &Path) -> Result<bool, VcsError>;
}

/// `git2`-backed reader. Answers are cached per repository for the life of
/// the reader, so one reader should not outlive a single run.
#[derive(Debug, Default)]
pub struct GitStatusReader {
    dirty: Mutex<HashMap<PathBuf, bool>>,
    remote: Mutex<HashMap<PathBuf, bool>>,
}

impl GitStatusReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(
        cache: &Mutex<HashMap<PathBuf, bool>>,
        root: &Path,
        compute: impl FnOnce() -> Result<bool, VcsError>,
    ) -> Result<bool, VcsError> {
        if let Some(hit) = cache.lock().ok().and_then(|c| c.get(root).copied()) {
            return Ok(hit);
        }
        let value = compute()?;
        if let Ok(mut c) = cache.lock() {
            c.insert(root.to_path_buf(), value);
        }
        Ok(value)
    }
}

impl VcsStatus for GitStatusReader {
    fn has_uncommitted_changes(&self, root: &Path) -> Result<bool, VcsError> {
        Self::cached(&self.dirty, root, || {
            let repo = Repository::open(root).map_err(|e| VcsError::git(root, e))?;
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .include_ignored(false)
                .recurse_untracked_dirs(false)
                .exclude_submodules(false);
            let statuses = repo
                .statuses(Some(&mut opts))
                .map_err(|e| VcsError::git(root, e))?;
            let dirty = statuses.iter().any(|entry| {
                let status = entry.status();
                status != Status::CURRENT && !status.contains(Status::IGNORED)
            });
            tracing::debug!(repo = %root.display(), dirty, "working tree status");
            Ok(dirty)
        })
    }

    fn has_remote(&self, root: &Path) -> Result<bool, VcsError> {
        Self::cached(&self.remote, root, || {
            let repo = Repository::open(root).map_err(|e| VcsError::git(root, e))?;
            let remotes = repo.remotes().map_err(|e| VcsError::git(root, e))?;
            Ok(!remotes.is_empty())
        })
    }
}
