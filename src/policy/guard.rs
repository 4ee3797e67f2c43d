use super::keep::KeepPolicy;
use super::vcs::{GitStatusReader, VcsError, VcsStatus};
use crate::scanner::Candidate;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Why a candidate may not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ProtectionReason {
    /// The path is, or lies inside, VCS metadata
    GitMetadata,
    DirtyWorkingTree { repo: PathBuf },
    /// The candidate is a repository root without any remote
    NoRemote { repo: PathBuf },
    /// Repository state could not be read
    VcsUnreadable { repo: PathBuf, detail: String },
    DenyListed { path: PathBuf },
    KeepMarker,
    KeepRule { rule: String },
}

impl ProtectionReason {
    /// Whether an explicit override may lift this protection.
    pub fn overridable(&self) -> bool {
        matches!(
            self,
            Self::DirtyWorkingTree { .. } | Self::NoRemote { .. } | Self::VcsUnreadable { .. }
        )
    }

    fn unreadable(repo: &Path, err: VcsError) -> Self {
        Self::VcsUnreadable {
            repo: repo.to_path_buf(),
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitMetadata => f.write_str("inside version-control metadata"),
            Self::DirtyWorkingTree { repo } => {
                write!(f, "uncommitted changes in {}", repo.display())
            }
            Self::NoRemote { repo } => write!(f, "repository {} has no remote", repo.display()),
            Self::VcsUnreadable { repo, detail } => {
                write!(f, "cannot read repository {}: {}", repo.display(), detail)
            }
            Self::DenyListed { path } => write!(f, "deny-listed path {}", path.display()),
            Self::KeepMarker => write!(f, "{} marker present", super::keep::KEEP_MARKER),
            Self::KeepRule { rule } => write!(f, "keep rule `{}`", rule),
        }
    }
}

/// Verdict of the safety check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    Approved,
    Protected(ProtectionReason),
}

impl Protection {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    pub fn reason(&self) -> Option<&ProtectionReason> {
        match self {
            Self::Approved => None,
            Self::Protected(reason) => Some(reason),
        }
    }

    /// Whether the candidate may be planned, given the override flag.
    pub fn allows(&self, override_protections: bool) -> bool {
        match self {
            Self::Approved => true,
            Self::Protected(reason) => override_protections && reason.overridable(),
        }
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Protected(reason) => write!(f, "protected: {}", reason),
        }
    }
}

/// Decides whether a candidate path may be removed.
///
/// Checks run in a fixed order and the first hit wins:
/// 1. VCS metadata in the path (never overridable)
/// 2. deny list, keep markers and keep rules (never overridable)
/// 3. enclosing working tree has uncommitted changes
/// 4. candidate is itself a repository root without a remote
///
/// The deny list is consulted before repository state, not after it. A
/// deny-listed path inside a dirty tree therefore reports `DenyListed`, and
/// an override can never lift it through the weaker dirty-tree reason.
///
/// Any failure to read repository state is reported as protected.
#[derive(Clone)]
pub struct SafetyGuard {
    vcs: Arc<dyn VcsStatus>,
    keep: KeepPolicy,
}

impl SafetyGuard {
    pub fn new(vcs: Arc<dyn VcsStatus>, keep: KeepPolicy) -> Self {
        Self { vcs, keep }
    }

    /// Guard backed by libgit2.
    pub fn with_git(keep: KeepPolicy) -> Self {
        Self::new(Arc::new(GitStatusReader::new()), keep)
    }

    pub fn check(&self, path: &Path) -> Protection {
        if path.components().any(|c| c.as_os_str() == ".git") {
            return Protection::Protected(ProtectionReason::GitMetadata);
        }

        if let Some(reason) = self.keep.evaluate(path) {
            return Protection::Protected(reason);
        }

        let Some(repo) = self.vcs.discover(path) else {
            return Protection::Approved;
        };

        match self.vcs.has_uncommitted_changes(&repo) {
            Ok(true) => return Protection::Protected(ProtectionReason::DirtyWorkingTree { repo }),
            Ok(false) => {}
            Err(err) => return Protection::Protected(ProtectionReason::unreadable(&repo, err)),
        }

        if repo == path {
            match self.vcs.has_remote(&repo) {
                Ok(true) => {}
                Ok(false) => return Protection::Protected(ProtectionReason::NoRemote { repo }),
                Err(err) => return Protection::Protected(ProtectionReason::unreadable(&repo, err)),
            }
        }

        Protection::Approved
    }

    pub fn check_candidate(&self, candidate: &mut Candidate) {
        let verdict = self.check(&candidate.path);
        if let Protection::Protected(reason) = &verdict {
            tracing::debug!(path = %candidate.path.display(), %reason, "protected");
        }
        candidate.record_protection(verdict);
    }

    /// Re-check an approved candidate against the repositories found inside
    /// it while sizing. A dirty or remote-less nested repository protects
    /// the whole candidate.
    pub fn check_contents(&self, candidate: &mut Candidate) {
        if !candidate.protection().map_or(true, Protection::is_approved) {
            return;
        }
        for repo in candidate.nested_repos().to_vec() {
            let reason = match self.vcs.has_uncommitted_changes(&repo) {
                Ok(true) => Some(ProtectionReason::DirtyWorkingTree { repo: repo.clone() }),
                Ok(false) => match self.vcs.has_remote(&repo) {
                    Ok(true) => None,
                    Ok(false) => Some(ProtectionReason::NoRemote { repo: repo.clone() }),
                    Err(err) => Some(ProtectionReason::unreadable(&repo, err)),
                },
                Err(err) => Some(ProtectionReason::unreadable(&repo, err)),
            };
            if let Some(reason) = reason {
                tracing::debug!(path = %candidate.path.display(), %reason, "protected by nested repository");
                candidate.record_protection(Protection::Protected(reason));
                return;
            }
        }
    }
}

impl fmt::Debug for SafetyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyGuard")
            .field("keep", &self.keep)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::KEEP_MARKER;
    use crate::scanner::SizeReport;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Scripted answers keyed by repository root.
    #[derive(Default)]
    struct FakeVcs {
        dirty: HashMap<PathBuf, bool>,
        remote: HashMap<PathBuf, bool>,
        broken: Vec<PathBuf>,
    }

    impl VcsStatus for FakeVcs {
        fn has_uncommitted_changes(&self, root: &Path) -> Result<bool, VcsError> {
            if self.broken.iter().any(|b| b == root) {
                return Err(VcsError::Git {
                    path: root.to_path_buf(),
                    source: git2::Error::from_str("corrupt index"),
                });
            }
            Ok(self.dirty.get(root).copied().unwrap_or(false))
        }

        fn has_remote(&self, root: &Path) -> Result<bool, VcsError> {
            Ok(self.remote.get(root).copied().unwrap_or(true))
        }
    }

    fn repo_with_target(temp: &TempDir) -> (PathBuf, PathBuf) {
        let repo = temp.path().join("app");
        let target = repo.join("target");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::create_dir_all(&target).unwrap();
        (repo, target)
    }

    fn guard(vcs: FakeVcs) -> SafetyGuard {
        SafetyGuard::new(Arc::new(vcs), KeepPolicy::new())
    }

    #[test]
    fn clean_repository_approves_artifacts() {
        let temp = TempDir::new().unwrap();
        let (_repo, target) = repo_with_target(&temp);
        assert_eq!(guard(FakeVcs::default()).check(&target), Protection::Approved);
    }

    #[test]
    fn dirty_working_tree_protects_and_can_be_overridden() {
        let temp = TempDir::new().unwrap();
        let (repo, target) = repo_with_target(&temp);
        let mut vcs = FakeVcs::default();
        vcs.dirty.insert(repo.clone(), true);

        let verdict = guard(vcs).check(&target);
        assert_eq!(
            verdict,
            Protection::Protected(ProtectionReason::DirtyWorkingTree { repo })
        );
        assert!(!verdict.allows(false));
        assert!(verdict.allows(true));
    }

    #[test]
    fn repository_root_without_remote_is_protected() {
        let temp = TempDir::new().unwrap();
        let (repo, target) = repo_with_target(&temp);
        let mut vcs = FakeVcs::default();
        vcs.remote.insert(repo.clone(), false);
        let guard = guard(vcs);

        assert_eq!(
            guard.check(&repo),
            Protection::Protected(ProtectionReason::NoRemote { repo: repo.clone() })
        );
        assert_eq!(guard.check(&target), Protection::Approved);
    }

    #[test]
    fn unreadable_repository_fails_closed() {
        let temp = TempDir::new().unwrap();
        let (repo, target) = repo_with_target(&temp);
        let vcs = FakeVcs {
            broken: vec![repo],
            ..Default::default()
        };

        let verdict = guard(vcs).check(&target);
        assert!(matches!(
            verdict,
            Protection::Protected(ProtectionReason::VcsUnreadable { .. })
        ));
        assert!(!verdict.allows(false));
    }

    #[test]
    fn git_metadata_and_keep_rules_are_never_overridable() {
        let temp = TempDir::new().unwrap();
        let (repo, target) = repo_with_target(&temp);
        let guard = guard(FakeVcs::default());

        let metadata = guard.check(&repo.join(".git").join("objects"));
        assert_eq!(metadata, Protection::Protected(ProtectionReason::GitMetadata));
        assert!(!metadata.allows(true));

        fs::write(repo.join(KEEP_MARKER), "").unwrap();
        let kept = guard.check(&target);
        assert_eq!(kept, Protection::Protected(ProtectionReason::KeepMarker));
        assert!(!kept.allows(true));
    }

    #[test]
    fn keep_rules_take_precedence_over_dirty_state() {
        let temp = TempDir::new().unwrap();
        let (repo, target) = repo_with_target(&temp);
        let mut vcs = FakeVcs::default();
        vcs.dirty.insert(repo, true);
        let guard = SafetyGuard::new(Arc::new(vcs), KeepPolicy::new().with_system_path(&target));

        let verdict = guard.check(&target);
        assert!(matches!(
            verdict,
            Protection::Protected(ProtectionReason::DenyListed { .. })
        ));
        assert!(!verdict.allows(true));
    }

    #[test]
    fn dirty_nested_repository_protects_its_container() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("deps");
        let nested = cache.join("forked-lib");
        fs::create_dir_all(nested.join(".git")).unwrap();

        let mut vcs = FakeVcs::default();
        vcs.dirty.insert(nested.clone(), true);
        let guard = guard(vcs);

        let rule = Arc::clone(&crate::rules::RuleRegistry::builtin().unwrap().rules()[0]);
        let mut candidate = Candidate::new(cache, rule);
        guard.check_candidate(&mut candidate);
        assert_eq!(candidate.protection(), Some(&Protection::Approved));

        candidate.record_size(&SizeReport {
            nested_repos: vec![nested.clone()],
            complete: true,
            ..SizeReport::default()
        });
        guard.check_contents(&mut candidate);
        assert_eq!(
            candidate.protection(),
            Some(&Protection::Protected(ProtectionReason::DirtyWorkingTree {
                repo: nested
            }))
        );
    }
}
