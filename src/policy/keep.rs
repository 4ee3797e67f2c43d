use super::ProtectionReason;
use crate::config::Config;
use crate::error::Result;
use crate::scanner::build_glob_set;
use crate::utils::{expand_tilde, is_same_or_child};
use globset::GlobSet;
use std::path::{Path, PathBuf};

/// Marker file that protects a project's artifacts.
pub const KEEP_MARKER: &str = ".devsweep-keep";

/// Paths that must never be removed: built-in system locations plus the
/// user's keep rules.
#[derive(Debug, Clone)]
pub struct KeepPolicy {
    /// Protected themselves, along with every ancestor
    system_paths: Vec<PathBuf>,
    /// Protected along with everything below and above them
    keep_paths: Vec<PathBuf>,
    keep_globs: Vec<String>,
    keep_glob_set: GlobSet,
}

impl KeepPolicy {
    /// System deny list only: filesystem root, home directory, and the
    /// directory holding the running executable.
    pub fn new() -> Self {
        let mut system_paths = vec![PathBuf::from("/")];
        if let Some(home) = dirs::home_dir() {
            system_paths.push(home);
        }
        if let Some(install_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            system_paths.push(install_dir);
        }

        Self {
            system_paths: system_paths.into_iter().map(resolve).collect(),
            keep_paths: Vec::new(),
            keep_globs: Vec::new(),
            keep_glob_set: GlobSet::empty(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new()
            .with_keep_paths(&config.keep_paths)
            .with_keep_globs(&config.keep_globs)
    }

    pub fn with_keep_paths(mut self, paths: &[String]) -> Self {
        self.keep_paths
            .extend(paths.iter().map(|p| resolve(expand_tilde(p))));
        self
    }

    pub fn with_keep_globs(mut self, globs: &[String]) -> Result<Self> {
        self.keep_globs.extend(
            globs
                .iter()
                .map(|g| expand_tilde(g).to_string_lossy().to_string()),
        );
        self.keep_glob_set = build_glob_set(&self.keep_globs)?;
        Ok(self)
    }

    /// Add an always-protected path (tests and embedders).
    pub fn with_system_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_paths.push(resolve(path.into()));
        self
    }

    pub fn system_paths(&self) -> &[PathBuf] {
        &self.system_paths
    }

    /// First keep reason that applies to `path`, if any.
    pub fn evaluate(&self, path: &Path) -> Option<ProtectionReason> {
        if let Some(hit) = self
            .system_paths
            .iter()
            .find(|p| is_same_or_child(p, path))
        {
            return Some(ProtectionReason::DenyListed { path: hit.clone() });
        }

        if path.join(KEEP_MARKER).exists()
            || path.parent().map_or(false, |p| p.join(KEEP_MARKER).exists())
        {
            return Some(ProtectionReason::KeepMarker);
        }

        if let Some(hit) = self
            .keep_paths
            .iter()
            .find(|p| is_same_or_child(path, p) || is_same_or_child(p, path))
        {
            return Some(ProtectionReason::KeepRule {
                rule: hit.display().to_string(),
            });
        }

        if let Some(idx) = self.keep_glob_set.matches(path).into_iter().min() {
            return Some(ProtectionReason::KeepRule {
                rule: self.keep_globs[idx].clone(),
            });
        }

        None
    }
}

impl Default for KeepPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}
