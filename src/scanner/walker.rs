use super::{Candidate, FileKey, ScanWarning, WarningKind};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::rules::{MatchContext, RuleRegistry};
use crossbeam::channel::{self, Receiver, Sender};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder, WalkState};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Version-control metadata directories are never walked.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".jj", ".bzr", "_darcs"];

/// Traversal settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Worker threads pulling from the shared directory queue
    pub workers: usize,

    /// Maximum scan depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Directory basenames that are never entered
    pub exclude_dirs: Vec<String>,

    /// When non-empty, only candidates matching one of these are emitted
    pub include_globs: Vec<String>,

    /// Paths matching these are neither entered nor emitted
    pub exclude_globs: Vec<String>,

    /// Directories never entered, such as the trash and the audit log's home
    pub exclude_paths: Vec<PathBuf>,

    pub follow_symlinks: bool,

    /// Follow links whose target resolves outside the scan root
    pub allow_external_symlinks: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            max_depth: None,
            exclude_dirs: Vec::new(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            exclude_paths: Vec::new(),
            follow_symlinks: false,
            allow_external_symlinks: false,
        }
    }
}

/// Concurrent directory walker that classifies and prunes as it goes.
pub struct Traverser {
    registry: Arc<RuleRegistry>,
    options: ScanOptions,
    cancel: CancellationToken,
}

impl Traverser {
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            options: ScanOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the worker count (0 = one per CPU)
    pub fn workers(mut self, workers: usize) -> Self {
        self.options.workers = if workers == 0 { num_cpus::get() } else { workers };
        self
    }

    /// Set maximum scan depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = Some(depth);
        self
    }

    /// Set directories to exclude from scanning (by basename)
    pub fn exclude_dirs(mut self, dirs: &[String]) -> Self {
        self.options.exclude_dirs = dirs.to_vec();
        self
    }

    pub fn include_globs(mut self, globs: &[String]) -> Self {
        self.options.include_globs = globs.to_vec();
        self
    }

    pub fn exclude_globs(mut self, globs: &[String]) -> Self {
        self.options.exclude_globs = globs.to_vec();
        self
    }

    /// Add directories that are never entered.
    pub fn exclude_paths(mut self, paths: &[PathBuf]) -> Self {
        for path in paths {
            if !self.options.exclude_paths.contains(path) {
                self.options.exclude_paths.push(path.clone());
            }
        }
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.options.follow_symlinks = follow;
        self
    }

    pub fn allow_external_symlinks(mut self, allow: bool) -> Self {
        self.options.allow_external_symlinks = allow;
        self
    }

    /// Share a cancellation token with other pipeline stages.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Start a scan. Roots are walked one after another on a background
    /// thread; each root fans out over the worker pool. Candidates are
    /// yielded as they are classified.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanStream> {
        if roots.is_empty() {
            return Err(Error::Config("no scan roots given".to_string()));
        }
        let roots = roots
            .iter()
            .map(|root| resolve_root(root))
            .collect::<Result<Vec<_>>>()?;

        let walker = RootWalker {
            registry: Arc::clone(&self.registry),
            options: self.options.clone(),
            filters: Arc::new(PathFilters::compile(&self.options)?),
            cancel: self.cancel.clone(),
            visited: Mutex::new(HashSet::new()),
            open_candidates: Mutex::new(Vec::new()),
        };

        let (tx, rx) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("devsweep-scan".to_string())
            .spawn(move || {
                for root in roots {
                    if walker.cancel.is_cancelled() {
                        break;
                    }
                    tracing::debug!(root = %root.display(), "walking root");
                    walker.walk(&root, &tx);
                    if walker.cancel.is_cancelled() {
                        break;
                    }
                    if tx.send(ScanEvent::RootDone(root)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        Ok(ScanStream {
            rx,
            worker: Some(worker),
            report: ScanReport::default(),
            cancel: self.cancel.clone(),
        })
    }

    /// Scan and collect everything, sorted by path.
    pub fn scan_all(&self, roots: &[PathBuf]) -> Result<ScanOutcome> {
        Ok(self.scan(roots)?.collect_all())
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    let resolved = fs::canonicalize(root).map_err(|e| Error::InvalidRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !resolved.is_dir() {
        return Err(Error::InvalidRoot {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(resolved)
}

#[derive(Debug)]
struct PathFilters {
    exclude_dirs: HashSet<String>,
    exclude_paths: Vec<PathBuf>,
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilters {
    fn compile(options: &ScanOptions) -> Result<Self> {
        let include = if options.include_globs.is_empty() {
            None
        } else {
            Some(build_glob_set(&options.include_globs)?)
        };
        Ok(Self {
            exclude_dirs: options.exclude_dirs.iter().cloned().collect(),
            exclude_paths: options
                .exclude_paths
                .iter()
                .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
                .collect(),
            include,
            exclude: build_glob_set(&options.exclude_globs)?,
        })
    }

    fn admits(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !VCS_DIRS.contains(&name.as_ref())
            && !self.exclude_dirs.contains(name.as_ref())
            && !self.exclude.is_match(entry.path())
            && !self.exclude_paths.iter().any(|p| p.as_path() == entry.path())
    }

    fn includes(&self, path: &Path) -> bool {
        self.include.as_ref().map_or(true, |set| set.is_match(path))
    }
}

pub(crate) fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::glob(pattern, e))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::glob(&patterns.join(","), e))
}

enum ScanEvent {
    Candidate(Candidate),
    Warning(ScanWarning),
    RootDone(PathBuf),
}

/// State shared by every worker of one scan.
struct RootWalker {
    registry: Arc<RuleRegistry>,
    options: ScanOptions,
    filters: Arc<PathFilters>,
    cancel: CancellationToken,
    /// Identity keys of every directory entered so far, across roots
    visited: Mutex<HashSet<FileKey>>,
    /// Emitted candidates that are still being descended into
    open_candidates: Mutex<Vec<PathBuf>>,
}

impl RootWalker {
    fn walk(&self, root: &Path, tx: &Sender<ScanEvent>) {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(false)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(self.options.follow_symlinks)
            .max_depth(self.options.max_depth)
            .threads(self.options.workers.max(1));

        let filters = Arc::clone(&self.filters);
        builder.filter_entry(move |entry| filters.admits(entry));

        builder.build_parallel().run(|| {
            Box::new(move |result| match result {
                Ok(entry) => self.visit(root, &entry, tx),
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        return WalkState::Quit;
                    }
                    self.warn(tx, warning_from_walk_error(&err))
                }
            })
        });
    }

    fn visit(&self, root: &Path, entry: &DirEntry, tx: &Sender<ScanEvent>) -> WalkState {
        if self.cancel.is_cancelled() {
            return WalkState::Quit;
        }
        if !entry.file_type().map_or(false, |ft| ft.is_dir()) {
            return WalkState::Continue;
        }
        let path = entry.path();

        if entry.path_is_symlink() && !self.options.allow_external_symlinks {
            match fs::canonicalize(path) {
                Ok(real) if !real.starts_with(root) => {
                    let warning = ScanWarning::new(
                        WarningKind::ExternalSymlink,
                        Some(path.to_path_buf()),
                        format!("link resolves outside the scan root to {}", real.display()),
                    );
                    self.warn(tx, warning);
                    return WalkState::Skip;
                }
                Ok(_) => {}
                Err(err) => {
                    self.warn(tx, ScanWarning::from_io(Some(path.to_path_buf()), &err));
                    return WalkState::Skip;
                }
            }
        }

        let metadata = match entry.metadata() {
            Ok(md) => md,
            Err(err) => {
                self.warn(tx, warning_from_walk_error(&err));
                return WalkState::Skip;
            }
        };

        let first_visit = lock(&self.visited).insert(FileKey::of(path, &metadata));
        if !first_visit {
            if entry.path_is_symlink() {
                let warning = ScanWarning::new(
                    WarningKind::SymlinkCycle,
                    Some(path.to_path_buf()),
                    "directory already visited through another path",
                );
                self.warn(tx, warning);
            }
            return WalkState::Skip;
        }

        if entry.depth() == 0 {
            return WalkState::Continue;
        }

        let Some(ctx) = MatchContext::new(path) else {
            return WalkState::Continue;
        };
        let Some(rule) = self.registry.find(&ctx) else {
            return WalkState::Continue;
        };
        let prune = rule.prune;

        if self.filters.includes(path) {
            let parent = self.enclosing_candidate(path);
            let mut candidate = Candidate::new(path.to_path_buf(), rule);
            candidate.mark_classified(parent, Some(&metadata));
            if !prune {
                lock(&self.open_candidates).push(path.to_path_buf());
            }
            tracing::debug!(
                path = %path.display(),
                category = %candidate.rule.category,
                prune,
                "classified"
            );
            if tx.send(ScanEvent::Candidate(candidate)).is_err() {
                // Receiver is gone; nobody is listening any more.
                return WalkState::Quit;
            }
        }

        if prune {
            WalkState::Skip
        } else {
            WalkState::Continue
        }
    }

    fn enclosing_candidate(&self, path: &Path) -> Option<PathBuf> {
        lock(&self.open_candidates)
            .iter()
            .filter(|open| path != open.as_path() && path.starts_with(open))
            .max_by_key(|open| open.components().count())
            .cloned()
    }

    fn warn(&self, tx: &Sender<ScanEvent>, warning: ScanWarning) -> WalkState {
        warning.log();
        match tx.send(ScanEvent::Warning(warning)) {
            Ok(()) => WalkState::Continue,
            Err(_) => WalkState::Quit,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn warning_from_walk_error(err: &ignore::Error) -> ScanWarning {
    fn inner(err: &ignore::Error, path: Option<PathBuf>) -> ScanWarning {
        match err {
            ignore::Error::WithPath { path, err } => inner(err, Some(path.clone())),
            ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
                inner(err, path)
            }
            ignore::Error::Loop { child, .. } => {
                ScanWarning::new(WarningKind::SymlinkCycle, Some(child.clone()), err.to_string())
            }
            ignore::Error::Io(io_err) => ScanWarning::from_io(path, io_err),
            ignore::Error::Partial(errs) if !errs.is_empty() => inner(&errs[0], path),
            _ => ScanWarning::new(WarningKind::Io, path, err.to_string()),
        }
    }
    inner(err, None)
}

/// Summary of a finished (or cancelled) scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub warnings: Vec<ScanWarning>,
    pub cancelled: bool,
    /// Roots that were walked to completion, in order
    pub roots_completed: Vec<PathBuf>,
}

/// Candidates plus the report of the scan that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub candidates: Vec<Candidate>,
    pub report: ScanReport,
}

/// Lazy sequence of candidates from a running scan.
pub struct ScanStream {
    rx: Receiver<ScanEvent>,
    worker: Option<JoinHandle<()>>,
    report: ScanReport,
    cancel: CancellationToken,
}

impl Iterator for ScanStream {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            match self.rx.recv() {
                Ok(ScanEvent::Candidate(candidate)) => return Some(candidate),
                Ok(ScanEvent::Warning(warning)) => self.report.warnings.push(warning),
                Ok(ScanEvent::RootDone(root)) => self.report.roots_completed.push(root),
                Err(_) => return None,
            }
        }
    }
}

impl ScanStream {
    /// Warnings received so far.
    pub fn warnings(&self) -> &[ScanWarning] {
        &self.report.warnings
    }

    /// Request cooperative cancellation of the running scan.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the walk to end and return its report. Candidates not yet
    /// consumed are discarded.
    pub fn finish(mut self) -> ScanReport {
        let unconsumed = self.by_ref().count();
        if unconsumed > 0 {
            tracing::debug!(unconsumed, "discarding unconsumed candidates");
        }
        self.join();
        self.report.cancelled = self.cancel.is_cancelled();
        self.report
    }

    /// Drain the stream into a path-sorted candidate list plus report.
    pub fn collect_all(mut self) -> ScanOutcome {
        let mut candidates: Vec<Candidate> = self.by_ref().collect();
        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        let report = self.finish();
        ScanOutcome { candidates, report }
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                self.report.warnings.push(ScanWarning::new(
                    WarningKind::Io,
                    None,
                    "scan worker panicked; results are partial",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleGroup, RuleSpec, TieBreak};
    use std::fs;
    use tempfile::TempDir;

    fn traverser() -> Traverser {
        Traverser::new(RuleRegistry::builtin().unwrap()).workers(4)
    }

    fn node_project(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("package.json"), "{}").unwrap();
        let node_modules = dir.join("node_modules");
        fs::create_dir_all(&node_modules).unwrap();
        fs::write(node_modules.join("test.txt"), "test").unwrap();
        node_modules
    }

    fn names(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .candidates
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_scanner_basic() {
        let temp = TempDir::new().unwrap();
        node_project(&temp.path().join("test-project"));

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].category(), "node-modules");
        assert!(outcome.candidates[0].path.is_absolute());
        assert!(!outcome.report.cancelled);
        assert_eq!(outcome.report.roots_completed.len(), 1);
    }

    #[test]
    fn nested_node_modules_are_pruned() {
        let temp = TempDir::new().unwrap();
        let outer = node_project(&temp.path().join("app"));
        node_project(&outer.join("left-pad"));

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(
            outcome.candidates[0].path,
            fs::canonicalize(&outer).unwrap()
        );
    }

    #[test]
    fn test_scanner_python_egg_info() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("py-project");
        let egg_info = project_dir.join("mypkg.egg-info");
        fs::create_dir_all(&egg_info).unwrap();
        fs::write(project_dir.join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        fs::write(egg_info.join("PKG-INFO"), "Name: mypkg\n").unwrap();

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].category(), "egg-info");
    }

    #[test]
    fn test_scanner_ruby_vendor_bundle() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("rb-project");
        let vendor_bundle = project_dir.join("vendor").join("bundle");
        fs::create_dir_all(&vendor_bundle).unwrap();
        fs::write(project_dir.join("Gemfile"), "source \"https://rubygems.org\"").unwrap();
        fs::write(vendor_bundle.join("x"), "y").unwrap();

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].category(), "ruby-bundle");
        assert!(outcome.candidates[0].path.ends_with("vendor/bundle"));
    }

    #[test]
    fn test_scanner_cmake_builds() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("cmake-project");
        fs::create_dir_all(project_dir.join("src")).unwrap();
        fs::write(project_dir.join("CMakeLists.txt"), "project(test)").unwrap();
        fs::write(project_dir.join("src").join("main.cpp"), "int main() {}").unwrap();

        for name in ["build-debug", "_build", "build"] {
            let dir = project_dir.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("CMakeCache.txt"), "# cache").unwrap();
        }

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();

        let mut found = names(&outcome);
        found.sort();
        assert_eq!(found, vec!["_build", "build", "build-debug"]);
    }

    #[test]
    fn test_scanner_cmake_in_source() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("cmake-project");
        fs::create_dir_all(&project_dir).unwrap();
        fs::write(project_dir.join("CMakeLists.txt"), "project(test)").unwrap();
        fs::write(project_dir.join("CMakeCache.txt"), "# CMake cache").unwrap();

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]).unwrap();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn test_scanner_exclude_dirs_prunes() {
        let temp = TempDir::new().unwrap();
        node_project(&temp.path().join("excluded").join("test-project"));

        let outcome = traverser()
            .exclude_dirs(&["excluded".to_string()])
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn path_globs_filter_traversal_and_emission() {
        let temp = TempDir::new().unwrap();
        node_project(&temp.path().join("keep").join("app"));
        node_project(&temp.path().join("archive").join("app"));

        let excluded = traverser()
            .exclude_globs(&["**/archive".to_string()])
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();
        assert_eq!(excluded.candidates.len(), 1);
        assert!(excluded.candidates[0].path.to_string_lossy().contains("keep"));

        let included = traverser()
            .include_globs(&["**/archive/**".to_string()])
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();
        assert_eq!(included.candidates.len(), 1);
        assert!(included.candidates[0].path.to_string_lossy().contains("archive"));
    }

    #[test]
    fn excluded_paths_are_never_entered() {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        node_project(&root.join("app"));
        let trash = root.join(".trash");
        fs::create_dir_all(trash.join("batch").join("api").join("__pycache__")).unwrap();

        let outcome = traverser()
            .exclude_paths(&[trash.clone()])
            .scan_all(&[root.clone()])
            .unwrap();
        assert_eq!(names(&outcome), vec!["node_modules"]);

        let unfiltered = traverser().scan_all(&[root]).unwrap();
        assert_eq!(unfiltered.candidates.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directories_warn_and_the_walk_continues() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        node_project(&temp.path().join("app"));
        let locked = temp.path().join("locked");
        node_project(&locked.join("inner"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Permission bits do not bind this user (root).
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let outcome = traverser().scan_all(&[temp.path().to_path_buf()]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let outcome = outcome.unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.candidates[0].path.ends_with("app/node_modules"));
        assert!(outcome
            .report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PermissionDenied));
        assert_eq!(outcome.report.roots_completed.len(), 1);
    }

    #[test]
    fn overlapping_roots_do_not_duplicate_candidates() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("app");
        node_project(&project);

        let outcome = traverser()
            .scan_all(&[temp.path().to_path_buf(), project.clone()])
            .unwrap();
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn invalid_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");
        let err = traverser().scan(&[missing]).err().unwrap();
        assert!(matches!(err, Error::InvalidRoot { .. }));

        let file = temp.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = traverser().scan(&[file]).err().unwrap();
        assert!(matches!(err, Error::InvalidRoot { .. }));
    }

    #[test]
    fn cancelled_scan_returns_partial_results() {
        let temp = TempDir::new().unwrap();
        node_project(&temp.path().join("app"));

        let traverser = traverser();
        traverser.cancellation_token().cancel();
        let outcome = traverser.scan_all(&[temp.path().to_path_buf()]).unwrap();

        assert!(outcome.report.cancelled);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.report.roots_completed.is_empty());
    }

    #[test]
    fn non_pruning_matches_record_nested_candidates() {
        let specs = vec![
            RuleSpec::new("cache-root", RuleGroup::Caches, ".cache")
                .confirm()
                .descend(),
            RuleSpec::new("pip-cache", RuleGroup::Caches, "pip").under("**/.cache"),
        ];
        let registry = RuleRegistry::new(&specs, TieBreak::FirstDeclared).unwrap();
        let temp = TempDir::new().unwrap();
        let pip = temp.path().join(".cache").join("pip");
        fs::create_dir_all(pip.join("http")).unwrap();

        let outcome = Traverser::new(registry)
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        let cache_root = &outcome.candidates[0];
        let nested = &outcome.candidates[1];
        assert_eq!(cache_root.category(), "cache-root");
        assert_eq!(nested.category(), "pip-cache");
        assert_eq!(nested.parent.as_ref(), Some(&cache_root.path));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_are_reported_not_followed_forever() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(&dir, dir.join("loop")).unwrap();
        node_project(&dir.join("app"));

        let outcome = traverser()
            .follow_symlinks(true)
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome
            .report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SymlinkCycle));
    }

    #[cfg(unix)]
    #[test]
    fn external_symlinks_need_explicit_permission() {
        let outside = TempDir::new().unwrap();
        node_project(&outside.path().join("elsewhere"));
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("mount")).unwrap();

        let blocked = traverser()
            .follow_symlinks(true)
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();
        assert!(blocked.candidates.is_empty());
        assert!(blocked
            .report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::ExternalSymlink));

        let allowed = traverser()
            .follow_symlinks(true)
            .allow_external_symlinks(true)
            .scan_all(&[temp.path().to_path_buf()])
            .unwrap();
        assert_eq!(allowed.candidates.len(), 1);
    }

    #[test]
    fn candidates_stream_lazily() {
        let temp = TempDir::new().unwrap();
        for i in 0..3 {
            node_project(&temp.path().join(format!("app{}", i)));
        }

        let mut stream = traverser().scan(&[temp.path().to_path_buf()]).unwrap();
        let first = stream.next();
        assert!(first.is_some());
        let report = stream.finish();
        assert!(!report.cancelled);
        assert_eq!(report.roots_completed.len(), 1);
    }
}
