use crate::audit::{NullSink, ReportSink};
use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::plan::{Plan, PlanEntry};
use crate::trash::TrashManager;
use crate::utils::format_size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How approved items are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// Move to a recoverable location
    #[default]
    Trash,
    Permanent,
}

/// What trash mode does when recoverable removal is unavailable for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashFallback {
    /// Record the item as failed
    #[default]
    Fail,
    /// Delete it permanently instead
    Permanent,
}

impl fmt::Display for RemovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trash => f.write_str("trash"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

impl FromStr for RemovalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trash" => Ok(Self::Trash),
            "permanent" => Ok(Self::Permanent),
            other => Err(Error::Config(format!("unknown removal mode `{}`", other))),
        }
    }
}

impl FromStr for TrashFallback {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "permanent" => Ok(Self::Permanent),
            other => Err(Error::Config(format!("unknown trash fallback `{}`", other))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemovalError {
    #[error("recoverable removal unavailable: {0}")]
    Unavailable(String),

    #[error("failed to remove {}: {source}", path.display())]
    Failed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The destructive capability. Each call is one opaque operation on one
/// directory.
pub trait Remover: Send + Sync {
    fn move_to_recoverable(&self, path: &Path, size: u64) -> Result<(), RemovalError>;

    fn remove_permanently(&self, path: &Path) -> Result<(), RemovalError>;
}

/// Filesystem remover; recoverable removal goes through a [`TrashManager`].
#[derive(Debug, Clone, Default)]
pub struct FsRemover {
    trash: Option<TrashManager>,
}

impl FsRemover {
    pub fn new(trash: Option<TrashManager>) -> Self {
        Self { trash }
    }

    pub fn with_trash(trash: TrashManager) -> Self {
        Self::new(Some(trash))
    }

    pub fn trash(&self) -> Option<&TrashManager> {
        self.trash.as_ref()
    }
}

impl Remover for FsRemover {
    fn move_to_recoverable(&self, path: &Path, size: u64) -> Result<(), RemovalError> {
        let Some(trash) = &self.trash else {
            return Err(RemovalError::Unavailable(
                "no trash location configured".to_string(),
            ));
        };
        match trash.trash_dir(path, size) {
            Ok(_) => Ok(()),
            Err(err) if is_cross_device(&err) => Err(RemovalError::Unavailable(
                format!("{} is on a different filesystem than the trash", path.display()),
            )),
            Err(source) => Err(RemovalError::Failed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn remove_permanently(&self, path: &Path) -> Result<(), RemovalError> {
        fs::remove_dir_all(path).map_err(|source| RemovalError::Failed {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A rename that would cross filesystems (`EXDEV`, `ERROR_NOT_SAME_DEVICE`).
fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DryRun,
    Cancelled,
    /// The path vanished between planning and execution
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed(String),
    Skipped(SkipReason),
}

/// Result of executing one plan entry.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub path: PathBuf,
    pub category: String,
    pub status: OutcomeStatus,
    pub bytes_freed: u64,
    /// Method actually used, after any fallback
    pub method: Option<RemovalMode>,
}

impl Outcome {
    fn new(entry: &PlanEntry, status: OutcomeStatus) -> Self {
        Self {
            path: entry.path.clone(),
            category: entry.category.clone(),
            status,
            bytes_freed: 0,
            method: None,
        }
    }

    fn succeeded(entry: &PlanEntry, method: RemovalMode) -> Self {
        Self {
            bytes_freed: entry.size,
            method: Some(method),
            ..Self::new(entry, OutcomeStatus::Succeeded)
        }
    }

    fn failed(entry: &PlanEntry, reason: impl Into<String>) -> Self {
        Self::new(entry, OutcomeStatus::Failed(reason.into()))
    }

    fn skipped(entry: &PlanEntry, reason: SkipReason) -> Self {
        Self::new(entry, OutcomeStatus::Skipped(reason))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub mode: RemovalMode,
    pub dry_run: bool,
    pub fallback: TrashFallback,
}

/// Totals over a set of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_freed: u64,
}

impl ExecutionSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Succeeded => summary.succeeded += 1,
                OutcomeStatus::Failed(_) => summary.failed += 1,
                OutcomeStatus::Skipped(_) => summary.skipped += 1,
            }
            summary.bytes_freed += outcome.bytes_freed;
        }
        summary
    }

    /// Returns a human-readable size string
    pub fn size_freed_human(&self) -> String {
        format_size(self.bytes_freed)
    }
}

/// Applies a plan one entry at a time.
pub struct Executor {
    remover: Box<dyn Remover>,
    options: ExecuteOptions,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(remover: Box<dyn Remover>, options: ExecuteOptions) -> Self {
        Self {
            remover,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Execute every entry; one outcome per entry, in plan order.
    pub fn execute(&self, plan: &Plan) -> Vec<Outcome> {
        self.execute_with(plan, &NullSink)
    }

    pub fn execute_with(&self, plan: &Plan, sink: &dyn ReportSink) -> Vec<Outcome> {
        let outcomes: Vec<Outcome> = plan
            .entries
            .iter()
            .map(|entry| {
                let outcome = if self.cancel.is_cancelled() {
                    Outcome::skipped(entry, SkipReason::Cancelled)
                } else {
                    self.execute_entry(entry)
                };
                log_outcome(&outcome);
                sink.outcome(&outcome);
                outcome
            })
            .collect();

        let summary = ExecutionSummary::from_outcomes(&outcomes);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            bytes_freed = summary.bytes_freed,
            "execution finished"
        );
        outcomes
    }

    fn execute_entry(&self, entry: &PlanEntry) -> Outcome {
        if self.options.dry_run {
            return Outcome::skipped(entry, SkipReason::DryRun);
        }

        match fs::symlink_metadata(&entry.path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Outcome::skipped(entry, SkipReason::Missing);
            }
            Err(err) => return Outcome::failed(entry, err.to_string()),
            Ok(md) if md.file_type().is_symlink() => {
                return Outcome::failed(entry, "path was replaced by a symbolic link");
            }
            Ok(md) if !md.is_dir() => {
                return Outcome::failed(entry, "path is no longer a directory");
            }
            Ok(_) => {}
        }

        match self.options.mode {
            RemovalMode::Permanent => self.remove_permanently(entry),
            RemovalMode::Trash => match self.remover.move_to_recoverable(&entry.path, entry.size) {
                Ok(()) => Outcome::succeeded(entry, RemovalMode::Trash),
                Err(RemovalError::Unavailable(why)) => match self.options.fallback {
                    TrashFallback::Fail => {
                        Outcome::failed(entry, format!("trash unavailable: {}", why))
                    }
                    TrashFallback::Permanent => {
                        tracing::warn!(
                            path = %entry.path.display(),
                            "trash unavailable ({}), removing permanently",
                            why
                        );
                        self.remove_permanently(entry)
                    }
                },
                Err(err) => Outcome::failed(entry, err.to_string()),
            },
        }
    }

    fn remove_permanently(&self, entry: &PlanEntry) -> Outcome {
        match self.remover.remove_permanently(&entry.path) {
            Ok(()) => Outcome::succeeded(entry, RemovalMode::Permanent),
            Err(err) => Outcome::failed(entry, err.to_string()),
        }
    }
}

fn log_outcome(outcome: &Outcome) {
    match &outcome.status {
        OutcomeStatus::Succeeded => tracing::info!(
            path = %outcome.path.display(),
            bytes = outcome.bytes_freed,
            method = ?outcome.method,
            "removed"
        ),
        OutcomeStatus::Failed(reason) => {
            tracing::warn!(path = %outcome.path.display(), "removal failed: {}", reason)
        }
        OutcomeStatus::Skipped(reason) => {
            tracing::info!(path = %outcome.path.display(), reason = ?reason, "skipped")
        }
    }
}
