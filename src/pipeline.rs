//! The scan → protect → size → plan → execute pipeline behind one handle.

use crate::audit::ReportSink;
use crate::cancel::CancellationToken;
use crate::cleaner::{ExecuteOptions, Executor, FsRemover, Outcome, RemovalMode};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::plan::{Plan, PlanBuilder, PlanOptions};
use crate::policy::{KeepPolicy, SafetyGuard};
use crate::rules::{RuleFilter, RuleRegistry};
use crate::scanner::{
    Candidate, ScanOptions, ScanReport, ScanStream, ScanWarning, SizeAggregator, Traverser,
};
use crate::trash::{default_trash_root, TrashManager};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

/// Candidates that went through safety checks and sizing.
#[derive(Debug, Clone, Serialize)]
pub struct Survey {
    pub candidates: Vec<Candidate>,
    pub scan: ScanReport,
    /// Unreadable entries met while sizing
    pub size_warnings: Vec<ScanWarning>,
}

impl Survey {
    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().filter_map(Candidate::size).sum()
    }
}

pub struct Sweeper {
    traverser: Traverser,
    guard: SafetyGuard,
    workers: usize,
    plan_options: PlanOptions,
    execute_options: ExecuteOptions,
    trash_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Sweeper {
    pub fn new(registry: RuleRegistry, guard: SafetyGuard) -> Self {
        let cancel = CancellationToken::new();
        let traverser = Traverser::new(registry).cancellation(cancel.clone());
        let workers = traverser.options().workers;
        Self {
            traverser,
            guard,
            workers,
            plan_options: PlanOptions::default(),
            execute_options: ExecuteOptions::default(),
            trash_dir: None,
            cancel,
        }
        .skip_trash()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let guard = SafetyGuard::with_git(KeepPolicy::from_config(config)?);
        Ok(Self::new(config.registry()?, guard)
            .with_scan_options(config.scan_options())
            .with_plan_options(PlanOptions {
                override_protections: config.override_protections,
                include_confirm_required: config.include_confirm_required,
                min_size: config.min_size_bytes()?,
            })
            .with_execute_options(ExecuteOptions {
                mode: config.mode,
                dry_run: config.dry_run,
                fallback: config.trash_fallback,
            })
            .with_trash_dir(config.trash_dir.clone()))
    }

    pub fn with_scan_options(mut self, options: ScanOptions) -> Self {
        self.workers = options.workers.max(1);
        self.traverser = self.traverser.with_options(options);
        self.skip_trash()
    }

    pub fn with_plan_options(mut self, options: PlanOptions) -> Self {
        self.plan_options = options;
        self
    }

    pub fn with_execute_options(mut self, options: ExecuteOptions) -> Self {
        self.execute_options = options;
        self
    }

    pub fn with_trash_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.trash_dir = dir;
        self.skip_trash()
    }

    /// Items already moved to the trash must not be found again.
    fn skip_trash(self) -> Self {
        let trash = self.trash_dir.clone().unwrap_or_else(default_trash_root);
        Self {
            traverser: self.traverser.exclude_paths(&[trash]),
            ..self
        }
    }

    /// Narrow the active rules to a group/category subset.
    pub fn restrict(mut self, filter: &RuleFilter) -> Result<Self> {
        let registry = self.traverser.registry().subset(filter)?;
        let options = self.traverser.options().clone();
        self.traverser = Traverser::new(registry)
            .with_options(options)
            .cancellation(self.cancel.clone());
        Ok(self)
    }

    /// Token observed by every stage; cancel it to stop a run early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.traverser.registry()
    }

    pub fn plan_options(&self) -> &PlanOptions {
        &self.plan_options
    }

    pub fn execute_options(&self) -> &ExecuteOptions {
        &self.execute_options
    }

    /// Lazy candidate stream over `roots`.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanStream> {
        self.traverser.scan(roots)
    }

    /// Safety-check and size scanned candidates.
    pub fn assess(&self, mut candidates: Vec<Candidate>) -> Result<(Vec<Candidate>, Vec<ScanWarning>)> {
        let warnings = assess_in_place(&self.guard, self.workers, &self.cancel, &mut candidates)?;
        Ok((candidates, warnings))
    }

    /// Scan, check and size in one go, reporting to `sink` along the way.
    pub fn survey(&self, roots: &[PathBuf], sink: &dyn ReportSink) -> Result<Survey> {
        let mut stream = self.scan(roots)?;
        let mut found = Vec::new();
        for candidate in stream.by_ref() {
            sink.candidate(&candidate);
            found.push(candidate);
        }
        let scan = stream.finish();
        for warning in &scan.warnings {
            sink.warning(warning);
        }

        let (mut candidates, size_warnings) = self.assess(found)?;
        for warning in &size_warnings {
            sink.warning(warning);
        }
        candidates.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Survey {
            candidates,
            scan,
            size_warnings,
        })
    }

    pub fn plan(&self, candidates: Vec<Candidate>) -> Plan {
        PlanBuilder::new(self.plan_options.clone()).build(candidates)
    }

    /// Executor wired to the filesystem and the configured trash.
    pub fn executor(&self) -> Executor {
        filesystem_executor(self.execute_options, self.trash_dir.clone())
            .with_cancellation(self.cancel.clone())
    }

    pub fn execute(&self, plan: &Plan, sink: &dyn ReportSink) -> Vec<Outcome> {
        self.executor().execute_with(plan, sink)
    }
}

/// Guard checks, then sizing, then the nested-repository re-check that
/// sizing makes possible.
pub(crate) fn assess_in_place(
    guard: &SafetyGuard,
    workers: usize,
    cancel: &CancellationToken,
    candidates: &mut [Candidate],
) -> Result<Vec<ScanWarning>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    pool.install(|| {
        candidates
            .par_iter_mut()
            .for_each(|candidate| guard.check_candidate(candidate));
    });

    let warnings = SizeAggregator::new()
        .workers(workers)
        .with_cancellation(cancel.clone())
        .size_all(candidates)?;

    pool.install(|| {
        candidates
            .par_iter_mut()
            .for_each(|candidate| guard.check_contents(candidate));
    });

    Ok(warnings)
}

/// Executor removing from the real filesystem. The trash is only opened
/// when trash mode will actually move something.
pub(crate) fn filesystem_executor(options: ExecuteOptions, trash_dir: Option<PathBuf>) -> Executor {
    let needs_trash = options.mode == RemovalMode::Trash && !options.dry_run;
    let trash = if needs_trash {
        let root = trash_dir.unwrap_or_else(default_trash_root);
        match TrashManager::new_with_root(root) {
            Ok(trash) => Some(trash),
            Err(err) => {
                tracing::warn!("trash unavailable: {}", err);
                None
            }
        }
    } else {
        None
    };
    Executor::new(Box::new(FsRemover::new(trash)), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullSink;
    use crate::cleaner::{OutcomeStatus, SkipReason};
    use crate::rules::RuleGroup;
    use std::fs;
    use tempfile::TempDir;

    fn project(temp: &TempDir) {
        let app = temp.path().join("app");
        fs::create_dir_all(app.join("node_modules").join("pkg")).unwrap();
        fs::write(app.join("package.json"), "{}").unwrap();
        fs::write(app.join("node_modules").join("pkg").join("index.js"), "12345").unwrap();

        let crate_dir = temp.path().join("tool");
        fs::create_dir_all(crate_dir.join("target").join("debug")).unwrap();
        fs::write(crate_dir.join("Cargo.toml"), "[package]").unwrap();
        fs::write(crate_dir.join("target").join("debug").join("tool"), "123").unwrap();
    }

    fn sweeper(config: &Config) -> Sweeper {
        Sweeper::from_config(config).unwrap()
    }

    #[test]
    fn survey_checks_and_sizes_everything() {
        let temp = TempDir::new().unwrap();
        project(&temp);

        let survey = sweeper(&Config::default())
            .survey(&[temp.path().to_path_buf()], &NullSink)
            .unwrap();

        assert_eq!(survey.candidates.len(), 2);
        assert!(survey
            .candidates
            .iter()
            .all(|c| c.protection().is_some() && c.size().is_some()));
        assert_eq!(survey.total_bytes(), 8);
    }

    #[test]
    fn restrict_limits_rules_to_a_group() {
        let temp = TempDir::new().unwrap();
        project(&temp);

        let survey = sweeper(&Config::default())
            .restrict(&RuleFilter::groups(&[RuleGroup::Deps]))
            .unwrap()
            .survey(&[temp.path().to_path_buf()], &NullSink)
            .unwrap();

        assert_eq!(survey.candidates.len(), 1);
        assert_eq!(survey.candidates[0].category(), "node-modules");
    }

    #[test]
    fn dry_run_configuration_leaves_files_alone() {
        let temp = TempDir::new().unwrap();
        project(&temp);
        let config = Config {
            dry_run: true,
            ..Default::default()
        };
        let sweeper = sweeper(&config);

        let survey = sweeper.survey(&[temp.path().to_path_buf()], &NullSink).unwrap();
        let plan = sweeper.plan(survey.candidates);
        let outcomes = sweeper.execute(&plan, &NullSink);

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Skipped(SkipReason::DryRun)));
        assert!(temp.path().join("app").join("node_modules").exists());
    }

    #[test]
    fn trash_mode_uses_the_configured_trash_dir() {
        let temp = TempDir::new().unwrap();
        project(&temp);
        let trash_dir = TempDir::new().unwrap();
        let config = Config {
            trash_dir: Some(trash_dir.path().to_path_buf()),
            ..Default::default()
        };
        let sweeper = sweeper(&config);

        let survey = sweeper.survey(&[temp.path().to_path_buf()], &NullSink).unwrap();
        let plan = sweeper.plan(survey.candidates);
        let outcomes = sweeper.execute(&plan, &NullSink);

        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Succeeded));
        assert!(!temp.path().join("app").join("node_modules").exists());
        assert!(crate::trash::latest_batch_id(trash_dir.path()).unwrap().is_some());
    }
}
