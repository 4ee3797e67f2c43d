mod size_calculator;
mod walker;

pub use size_calculator::{SizeAggregator, SizeReport};
pub use walker::{ScanOptions, ScanOutcome, ScanReport, ScanStream, Traverser};
pub(crate) use walker::build_glob_set;

use crate::policy::Protection;
use crate::rules::Rule;
use crate::utils::format_size;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Lifecycle of a candidate. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Discovered,
    Classified,
    SafetyChecked,
    Sized,
    Planned,
    Executed,
}

/// One matched artifact directory.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    /// Absolute path of the matched directory
    pub path: PathBuf,

    /// Rule that classified the directory
    pub rule: Arc<Rule>,

    /// Enclosing candidate, when found below a non-pruning match
    pub parent: Option<PathBuf>,

    /// Last modified time of the directory itself
    pub last_modified: Option<DateTime<Utc>>,

    state: CandidateState,
    size: Option<u64>,
    protection: Option<Protection>,
    nested_repos: Vec<PathBuf>,
}

impl Candidate {
    /// A freshly discovered candidate.
    pub fn new(path: PathBuf, rule: Arc<Rule>) -> Self {
        Self {
            path,
            rule,
            parent: None,
            last_modified: None,
            state: CandidateState::Discovered,
            size: None,
            protection: None,
            nested_repos: Vec::new(),
        }
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    /// Bytes measured below the candidate; `None` until sized.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Safety verdict; `None` until checked.
    pub fn protection(&self) -> Option<&Protection> {
        self.protection.as_ref()
    }

    /// Repository roots found inside the candidate while sizing.
    pub fn nested_repos(&self) -> &[PathBuf] {
        &self.nested_repos
    }

    pub fn category(&self) -> &str {
        &self.rule.category
    }

    pub fn size_human(&self) -> String {
        match self.size {
            Some(size) => format_size(size),
            None => "unknown".to_string(),
        }
    }

    /// Moves the lifecycle forward. Backward or repeated transitions are
    /// ignored and reported as `false`.
    pub(crate) fn advance(&mut self, next: CandidateState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_classified(&mut self, parent: Option<PathBuf>, metadata: Option<&Metadata>) {
        self.parent = parent;
        self.last_modified = metadata
            .and_then(|md| md.modified().ok())
            .map(system_time_to_datetime);
        self.advance(CandidateState::Classified);
    }

    pub(crate) fn record_protection(&mut self, protection: Protection) {
        self.protection = Some(protection);
        self.advance(CandidateState::SafetyChecked);
    }

    pub(crate) fn record_size(&mut self, report: &SizeReport) {
        self.nested_repos = report.nested_repos.clone();
        if report.complete {
            self.size = Some(report.bytes);
            self.advance(CandidateState::Sized);
        }
    }
}

/// Category of a recoverable traversal problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    PermissionDenied,
    Vanished,
    SymlinkCycle,
    ExternalSymlink,
    Io,
}

/// A problem confined to one subtree; never aborts a walk.
#[derive(Debug, Clone, Serialize)]
pub struct ScanWarning {
    pub path: Option<PathBuf>,
    pub kind: WarningKind,
    pub message: String,
}

impl ScanWarning {
    pub fn new(kind: WarningKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(path: Option<PathBuf>, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            io::ErrorKind::NotFound => WarningKind::Vanished,
            _ => WarningKind::Io,
        };
        Self::new(kind, path, err.to_string())
    }

    pub(crate) fn from_walkdir(err: &walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf);
        if err.loop_ancestor().is_some() {
            return Self::new(WarningKind::SymlinkCycle, path, err.to_string());
        }
        match err.io_error() {
            Some(io_err) => Self::from_io(path, io_err),
            None => Self::new(WarningKind::Io, path, err.to_string()),
        }
    }

    pub(crate) fn log(&self) {
        tracing::warn!(
            path = ?self.path,
            kind = ?self.kind,
            "{}",
            self.message
        );
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Identity of a filesystem object, used to detect revisits through links.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FileKey {
    #[cfg_attr(not(unix), allow(dead_code))]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    RealPath(PathBuf),
}

impl FileKey {
    #[cfg(unix)]
    pub(crate) fn of(_path: &Path, metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn of(path: &Path, _metadata: &Metadata) -> Self {
        Self::RealPath(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
    }
}

/// Number of hard links to a file, where the platform exposes it.
pub(crate) fn link_count(metadata: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.nlink()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        1
    }
}

/// Convert SystemTime to DateTime<Utc>
fn system_time_to_datetime(time: SystemTime) -> DateTime<Utc> {
    let duration = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    DateTime::from_timestamp(duration.as_secs() as i64, 0).unwrap_or_else(Utc::now)
}
