pub mod audit;
pub mod cancel;
pub mod cleaner;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod policy;
pub mod rules;
pub mod scanner;
pub mod trash;
pub mod utils;

// Re-export commonly used types
pub use audit::{AuditLog, NullSink, ReportSink};
pub use cancel::CancellationToken;
pub use cleaner::{
    ExecuteOptions, ExecutionSummary, Executor, FsRemover, Outcome, OutcomeStatus, RemovalMode,
    Remover, SkipReason, TrashFallback,
};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Survey, Sweeper};
pub use plan::{Plan, PlanBuilder, PlanEntry, PlanOptions};
pub use policy::{KeepPolicy, Protection, ProtectionReason, SafetyGuard};
pub use rules::{RuleFilter, RuleGroup, RuleRegistry};
pub use scanner::{Candidate, CandidateState, ScanStream, ScanWarning, SizeAggregator, Traverser};

use std::path::PathBuf;

/// Lazily scan `roots` with the built-in rules narrowed to `filter`.
/// devsweep's own trash and audit directories are never entered.
pub fn scan(roots: &[PathBuf], filter: &RuleFilter) -> Result<ScanStream> {
    let registry = RuleRegistry::builtin()?.subset(filter)?;
    Traverser::new(registry)
        .exclude_paths(&Config::default().state_dirs())
        .scan(roots)
}

/// Safety-check and size `candidates` in place with libgit2 and the system
/// deny list. Returns the warnings met while sizing.
pub fn assess(candidates: &mut [Candidate]) -> Result<Vec<ScanWarning>> {
    let guard = SafetyGuard::with_git(KeepPolicy::new());
    pipeline::assess_in_place(&guard, num_cpus::get(), &CancellationToken::new(), candidates)
}

/// Build a plan with default options apart from the override flag.
/// Candidates straight from [`scan`] are assessed first; ones that were
/// already checked keep their verdict.
pub fn plan(candidates: Vec<Candidate>, override_protections: bool) -> Plan {
    let (mut unchecked, mut ready): (Vec<Candidate>, Vec<Candidate>) = candidates
        .into_iter()
        .partition(|candidate| candidate.protection().is_none());
    if !unchecked.is_empty() {
        if let Err(err) = assess(&mut unchecked) {
            tracing::warn!("cannot assess candidates: {}", err);
        }
        ready.append(&mut unchecked);
    }

    PlanBuilder::new(PlanOptions {
        override_protections,
        ..PlanOptions::default()
    })
    .build(ready)
}

/// Execute `plan` against the filesystem. Trash mode uses the default trash
/// location and fails items it cannot move.
pub fn execute(plan: &Plan, mode: RemovalMode, dry_run: bool) -> Vec<Outcome> {
    let options = ExecuteOptions {
        mode,
        dry_run,
        fallback: TrashFallback::Fail,
    };
    pipeline::filesystem_executor(options, None).execute(plan)
}
