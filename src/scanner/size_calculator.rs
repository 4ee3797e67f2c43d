use super::{link_count, Candidate, FileKey, ScanWarning};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// Result of measuring one directory tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SizeReport {
    /// Bytes of regular files, hard links counted once
    pub bytes: u64,
    pub files: u64,
    /// Unreadable subpaths; they contribute zero bytes
    pub warnings: Vec<ScanWarning>,
    /// Working trees found below the measured root
    pub nested_repos: Vec<PathBuf>,
    /// False when the measurement was cancelled part way
    pub complete: bool,
}

/// Parallel size computation over disjoint candidate subtrees.
pub struct SizeAggregator {
    workers: usize,
    cancel: CancellationToken,
}

impl SizeAggregator {
    /// One worker per CPU, no shared cancellation.
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the pool size (0 = one per CPU)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 { num_cpus::get() } else { workers };
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Total size of `root`, skipping the subtrees listed in `exclude`.
    ///
    /// The top-level entries of `root` are walked in parallel on the
    /// current rayon pool, so one wide tree is spread over every worker.
    pub fn measure(&self, root: &Path, exclude: &[PathBuf]) -> SizeReport {
        let mut report = SizeReport::default();
        if self.cancel.is_cancelled() {
            return report;
        }

        let mut children = Vec::new();
        match fs::read_dir(root) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(entry) => children.push(entry.path()),
                        Err(err) => report.warn(ScanWarning::from_io(Some(root.to_path_buf()), &err)),
                    }
                }
            }
            Err(err) => report.warn(ScanWarning::from_io(Some(root.to_path_buf()), &err)),
        }

        let seen_links = Mutex::new(HashSet::new());
        let parts: Vec<SizeReport> = children
            .par_iter()
            .map(|child| self.measure_subtree(child, exclude, &seen_links))
            .collect();

        let mut complete = true;
        for part in parts {
            report.bytes += part.bytes;
            report.files += part.files;
            report.warnings.extend(part.warnings);
            report.nested_repos.extend(part.nested_repos);
            complete &= part.complete;
        }
        report.nested_repos.sort();
        report.nested_repos.dedup();
        report.complete = complete && !self.cancel.is_cancelled();
        report
    }

    /// Sequential walk of one top-level entry. Hard links are deduplicated
    /// through `seen_links`, which is shared by every part of one root.
    fn measure_subtree(
        &self,
        start: &Path,
        exclude: &[PathBuf],
        seen_links: &Mutex<HashSet<FileKey>>,
    ) -> SizeReport {
        let mut report = SizeReport::default();
        let mut walker = WalkDir::new(start).follow_links(false).into_iter();

        while let Some(result) = walker.next() {
            if self.cancel.is_cancelled() {
                return report;
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    report.warn(ScanWarning::from_walkdir(&err));
                    continue;
                }
            };

            // Linked worktrees and submodules carry a `.git` file.
            if entry.file_name() == ".git" {
                if let Some(repo) = entry.path().parent() {
                    report.nested_repos.push(repo.to_path_buf());
                }
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if exclude.iter().any(|p| p.as_path() == entry.path()) {
                    walker.skip_current_dir();
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(md) => md,
                Err(err) => {
                    report.warn(ScanWarning::from_walkdir(&err));
                    continue;
                }
            };

            if link_count(&metadata) > 1 {
                let key = FileKey::of(entry.path(), &metadata);
                let first = seen_links
                    .lock()
                    .map(|mut seen| seen.insert(key))
                    .unwrap_or(true);
                if !first {
                    continue;
                }
            }

            report.bytes += metadata.len();
            report.files += 1;
        }

        report.complete = true;
        report
    }

    /// Measure every candidate in parallel, recording results in place.
    /// Nested candidates are excluded from their ancestors' totals.
    pub fn size_all(&self, candidates: &mut [Candidate]) -> Result<Vec<ScanWarning>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.max(1))
            .thread_name(|i| format!("devsweep-size-{}", i))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let paths: Vec<PathBuf> = candidates.iter().map(|c| c.path.clone()).collect();

        let reports: Vec<SizeReport> = pool.install(|| {
            candidates
                .par_iter_mut()
                .map(|candidate| {
                    let nested: Vec<PathBuf> = paths
                        .iter()
                        .filter(|p| **p != candidate.path && p.starts_with(&candidate.path))
                        .cloned()
                        .collect();
                    let report = self.measure(&candidate.path, &nested);
                    candidate.record_size(&report);
                    tracing::debug!(
                        path = %candidate.path.display(),
                        bytes = report.bytes,
                        complete = report.complete,
                        "sized"
                    );
                    report
                })
                .collect()
        });

        Ok(reports.into_iter().flat_map(|r| r.warnings).collect())
    }
}

impl SizeReport {
    fn warn(&mut self, warning: ScanWarning) {
        warning.log();
        self.warnings.push(warning);
    }
}

impl Default for SizeAggregator {
    fn default() -> Self {
        Self::new()
    }
}
