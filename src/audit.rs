use crate::cleaner::{ExecutionSummary, Outcome, OutcomeStatus, SkipReason};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::scanner::{Candidate, ScanWarning};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_AUDIT_FILENAME: &str = "operations.jsonl";

/// Receives pipeline events for display or recording. Sinks are not part
/// of the correctness contract; every method defaults to doing nothing.
pub trait ReportSink {
    fn candidate(&self, _candidate: &Candidate) {}

    fn warning(&self, _warning: &ScanWarning) {}

    fn outcome(&self, _outcome: &Outcome) {}
}

/// Sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    RunStarted {
        run_id: String,
        command: String,
        ts: String,
    },
    ItemAction {
        run_id: String,
        path: String,
        category: String,
        result: String,
        bytes: u64,
        reason: Option<String>,
        ts: String,
    },
    RunFinished {
        run_id: String,
        ts: String,
        succeeded: usize,
        skipped: usize,
        failed: usize,
        freed_bytes: u64,
    },
}

impl AuditRecord {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::ItemAction { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Append-only JSONL record of one run.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    run_id: String,
}

impl AuditLog {
    /// Open the log configured in `config`, or `None` if auditing is off.
    pub fn from_config(config: &Config, command: &str) -> Result<Option<Self>> {
        if !config.audit.enabled {
            return Ok(None);
        }
        let path = config.audit.path.clone().unwrap_or_else(default_audit_path);
        Self::start(path, command).map(Some)
    }

    /// Begin a run, writing its `run_started` record.
    pub fn start(path: PathBuf, command: &str) -> Result<Self> {
        let log = Self {
            path,
            run_id: generate_run_id(),
        };
        log.append(&AuditRecord::RunStarted {
            run_id: log.run_id.clone(),
            command: command.to_string(),
            ts: Utc::now().to_rfc3339(),
        })?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn finish(&self, summary: &ExecutionSummary) -> Result<()> {
        self.append(&AuditRecord::RunFinished {
            run_id: self.run_id.clone(),
            ts: Utc::now().to_rfc3339(),
            succeeded: summary.succeeded,
            skipped: summary.skipped,
            failed: summary.failed,
            freed_bytes: summary.bytes_freed,
        })
    }

    fn append(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;

        serde_json::to_writer(&mut file, record)?;
        writeln!(file).map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }

    pub fn read_records(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str::<AuditRecord>(line).ok())
            .collect())
    }

    /// Records written by this run.
    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter(|r| r.run_id() == self.run_id)
            .collect())
    }
}

impl ReportSink for AuditLog {
    fn outcome(&self, outcome: &Outcome) {
        let (result, reason) = match &outcome.status {
            OutcomeStatus::Succeeded => ("succeeded", None),
            OutcomeStatus::Failed(reason) => ("failed", Some(reason.clone())),
            OutcomeStatus::Skipped(skip) => (
                "skipped",
                Some(
                    match skip {
                        SkipReason::DryRun => "dry-run",
                        SkipReason::Cancelled => "cancelled",
                        SkipReason::Missing => "missing",
                    }
                    .to_string(),
                ),
            ),
        };
        let record = AuditRecord::ItemAction {
            run_id: self.run_id.clone(),
            path: outcome.path.display().to_string(),
            category: outcome.category.clone(),
            result: result.to_string(),
            bytes: outcome.bytes_freed,
            reason,
            ts: Utc::now().to_rfc3339(),
        };
        if let Err(err) = self.append(&record) {
            tracing::warn!(log = %self.path.display(), "audit write failed: {}", err);
        }
    }
}

pub fn default_audit_path() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devsweep")
        .join(DEFAULT_AUDIT_FILENAME)
}

fn generate_run_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%d%H%M%S%9f"),
        std::process::id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome(path: &str, status: OutcomeStatus, bytes: u64) -> Outcome {
        Outcome {
            path: PathBuf::from(path),
            category: "node-modules".to_string(),
            status,
            bytes_freed: bytes,
            method: None,
        }
    }

    #[test]
    fn audit_roundtrip_records() {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::start(temp.path().join("logs").join("operations.jsonl"), "clean").unwrap();

        let outcomes = vec![
            outcome("/w/a/node_modules", OutcomeStatus::Succeeded, 42),
            outcome("/w/b/node_modules", OutcomeStatus::Skipped(SkipReason::Missing), 0),
        ];
        for o in &outcomes {
            log.outcome(o);
        }
        log.finish(&ExecutionSummary::from_outcomes(&outcomes)).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], AuditRecord::RunStarted { .. }));
        assert!(matches!(
            &records[2],
            AuditRecord::ItemAction { result, reason: Some(r), .. } if result == "skipped" && r == "missing"
        ));
        assert!(matches!(
            records[3],
            AuditRecord::RunFinished { succeeded: 1, skipped: 1, freed_bytes: 42, .. }
        ));
    }

    #[test]
    fn disabled_audit_yields_no_log() {
        let mut config = Config::default();
        config.audit.enabled = false;
        assert!(AuditLog::from_config(&config, "clean").unwrap().is_none());
    }
}
