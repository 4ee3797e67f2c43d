use crate::audit::{AuditLog, ReportSink};
use crate::cleaner::{ExecutionSummary, Outcome, OutcomeStatus, RemovalMode, SkipReason, TrashFallback};
use crate::plan::Plan;
use crate::rules::RuleGroup;
use crate::scanner::{Candidate, ScanWarning};
use crate::trash::{default_trash_root, latest_batch_id, restore_batch, RestoreOptions};
use crate::utils::format_size;
use crate::{Config, Sweeper};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::cell::Cell;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "devsweep")]
#[command(version, about = "Find and safely reclaim disk space used by build artifacts and caches", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan directories and report reclaimable artifacts
    Scan(ScanArgs),

    /// Remove reclaimable artifacts (dry run unless --yes)
    Clean(CleanArgs),

    /// Clean Xcode derived data, archives and simulator caches
    Xcode(CleanArgs),

    /// Clean Docker and buildx caches
    Docker(CleanArgs),

    /// Clean package-manager and tool caches
    Caches(CleanArgs),

    /// Move a trashed batch back to its original location
    Restore {
        /// Batch id (defaults to the most recent batch)
        #[arg(long)]
        batch: Option<String>,

        /// Report what would be restored without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Replace anything that now exists at the original path
        #[arg(short, long)]
        force: bool,
    },

    /// Write a default config file
    InitConfig {
        /// Destination (defaults to the user config directory)
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Directories to scan
    pub roots: Vec<PathBuf>,

    /// Only use rules from this group (repeatable)
    #[arg(short, long = "group", value_name = "GROUP")]
    pub groups: Vec<RuleGroup>,

    /// Only use rules with this category tag (repeatable)
    #[arg(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<String>,

    /// Maximum scan depth
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Only report candidates matching this glob (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    pub include_globs: Vec<String>,

    /// Skip paths matching this glob (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    pub exclude_globs: Vec<String>,

    /// Ignore entries smaller than this, e.g. 100MB
    #[arg(long)]
    pub min_size: Option<String>,

    /// Follow symbolic links while scanning
    #[arg(long)]
    pub follow_symlinks: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CleanArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    /// Actually remove files; without it only a dry run happens
    #[arg(short, long)]
    pub yes: bool,

    /// Override lifted protections (dirty or remote-less repositories)
    #[arg(short, long)]
    pub force: bool,

    /// Delete permanently instead of moving to the trash
    #[arg(long)]
    pub permanent: bool,

    /// What to do when the trash cannot take an item (fail|permanent)
    #[arg(long, value_name = "POLICY")]
    pub fallback: Option<TrashFallback>,

    /// Also remove categories that ask for confirmation (broad caches,
    /// package stores, VM images)
    #[arg(long = "include-confirm")]
    pub include_confirm: bool,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let mut config = if let Some(config_path) = &self.config {
            Config::load(config_path)
                .with_context(|| format!("failed to load config {}", config_path.display()))?
        } else {
            Config::load_or_default(Config::default_path()).context("failed to load config")?
        };
        let json = self.json;

        match self.command {
            Commands::Scan(args) => {
                let roots = apply_scan_args(&mut config, &args, None);
                run_scan(&config, &roots, json)
            }
            Commands::Clean(args) => run_clean(&mut config, &args, None, json),
            Commands::Xcode(args) => run_clean(&mut config, &args, Some(RuleGroup::Xcode), json),
            Commands::Docker(args) => run_clean(&mut config, &args, Some(RuleGroup::Docker), json),
            Commands::Caches(args) => run_clean(&mut config, &args, Some(RuleGroup::Caches), json),
            Commands::Restore {
                batch,
                dry_run,
                force,
            } => run_restore(&config, batch, RestoreOptions { dry_run, force }, json),
            Commands::InitConfig { path } => init_config(path),
        }
    }
}

/// Fold command-line options into `config` and resolve the roots to scan.
fn apply_scan_args(config: &mut Config, args: &ScanArgs, group: Option<RuleGroup>) -> Vec<PathBuf> {
    if let Some(group) = group {
        config.groups = vec![group];
        config.categories.clear();
    }
    if !args.groups.is_empty() {
        config.groups = args.groups.clone();
    }
    if !args.categories.is_empty() {
        config.categories = args.categories.clone();
    }
    if let Some(depth) = args.depth {
        config.max_depth = Some(depth);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.include_globs.extend(args.include_globs.iter().cloned());
    config.exclude_globs.extend(args.exclude_globs.iter().cloned());
    if let Some(min_size) = &args.min_size {
        config.min_size = Some(min_size.clone());
    }
    config.follow_symlinks |= args.follow_symlinks;

    if !args.roots.is_empty() {
        return args.roots.clone();
    }
    let configured = config.root_paths();
    if !configured.is_empty() {
        return configured;
    }
    // Group shortcuts target per-user locations.
    if group.is_some() {
        if let Some(home) = dirs::home_dir() {
            return vec![home];
        }
    }
    vec![PathBuf::from(".")]
}

/// Spinner that follows scan progress.
struct ScanProgress {
    bar: ProgressBar,
    found: Cell<usize>,
    warnings: Cell<usize>,
}

impl ScanProgress {
    fn start(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {elapsed} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        bar.set_message("Scanning for cleanable directories...");
        Self {
            bar,
            found: Cell::new(0),
            warnings: Cell::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ReportSink for ScanProgress {
    fn candidate(&self, candidate: &Candidate) {
        self.found.set(self.found.get() + 1);
        self.bar.set_message(format!(
            "{} found, latest: {}",
            self.found.get(),
            shorten(&candidate.path.display().to_string(), 60)
        ));
    }

    fn warning(&self, _warning: &ScanWarning) {
        self.warnings.set(self.warnings.get() + 1);
    }
}

fn shorten(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}

fn run_scan(config: &Config, roots: &[PathBuf], json_output: bool) -> Result<()> {
    let sweeper = Sweeper::from_config(config).context("invalid configuration")?;

    let progress = ScanProgress::start(json_output);
    let survey = sweeper.survey(roots, &progress);
    progress.finish();
    let survey = survey.context("scan failed")?;

    let plan = sweeper.plan(survey.candidates.clone());
    if json_output {
        let warnings: Vec<&ScanWarning> = survey
            .scan
            .warnings
            .iter()
            .chain(&survey.size_warnings)
            .collect();
        let out = json!({
            "candidates": survey.candidates,
            "warnings": warnings,
            "cancelled": survey.scan.cancelled,
            "plan": plan,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if survey.candidates.is_empty() {
        println!("{}", "No cleanable directories found.".yellow());
        return Ok(());
    }

    let mut candidates: Vec<&Candidate> = survey.candidates.iter().collect();
    candidates.sort_by(|a, b| b.size().cmp(&a.size()).then_with(|| a.path.cmp(&b.path)));
    display_candidates(&candidates);

    println!(
        "\n{} {} cleanable directories found",
        "✓".green().bold(),
        candidates.len().to_string().green().bold()
    );
    println!(
        "{} {}",
        "Total size:".bold(),
        format_size(survey.total_bytes()).green().bold()
    );
    println!(
        "{} {} in {} entries",
        "Reclaimable:".bold(),
        plan.total_human().green().bold(),
        plan.len()
    );
    if progress.warnings.get() > 0 {
        println!(
            "{} {} entries could not be read (run with -v for details)",
            "Warning:".yellow().bold(),
            progress.warnings.get()
        );
    }
    Ok(())
}

fn display_candidates(candidates: &[&Candidate]) {
    for candidate in candidates {
        let status = match candidate.protection() {
            Some(protection) if !protection.is_approved() => {
                format!(" [PROTECTED: {}]", protection.reason().map(|r| r.to_string()).unwrap_or_default())
                    .yellow()
                    .to_string()
            }
            _ => String::new(),
        };
        println!(
            "  {} {} {} ({}){}",
            "✓".green(),
            format!("[{}/{}]", candidate.rule.group, candidate.category()).bright_black(),
            candidate.path.display().to_string().bright_white(),
            candidate.size_human().yellow(),
            status
        );
    }
}

fn display_plan(plan: &Plan) {
    for (idx, entry) in plan.entries.iter().enumerate() {
        let overridden = match &entry.overridden {
            Some(reason) => format!(" [OVERRIDE: {}]", reason).red().to_string(),
            None => String::new(),
        };
        println!(
            "{}. {} {} - {}{}",
            (idx + 1).to_string().dimmed(),
            format!("[{}]", entry.category).bright_black(),
            entry.path.display().to_string().bold(),
            entry.size_human().green(),
            overridden
        );
    }
    if !plan.excluded.is_empty() {
        println!(
            "\n{} {} candidates left out (protected, unsized or below the size threshold)",
            "Note:".yellow().bold(),
            plan.excluded.len()
        );
    }
}

/// Prints outcomes as they arrive and forwards them to the audit log.
struct OutcomePrinter<'a> {
    audit: Option<&'a AuditLog>,
    quiet: bool,
}

impl ReportSink for OutcomePrinter<'_> {
    fn outcome(&self, outcome: &Outcome) {
        if let Some(audit) = self.audit {
            audit.outcome(outcome);
        }
        if self.quiet {
            return;
        }
        let path = outcome.path.display().to_string();
        match &outcome.status {
            OutcomeStatus::Succeeded => println!("  {} {}", "✓".green(), path),
            OutcomeStatus::Failed(reason) => println!("  {} {}: {}", "✗".red(), path, reason.red()),
            OutcomeStatus::Skipped(SkipReason::DryRun) => println!("  {} {}", "-".dimmed(), path),
            OutcomeStatus::Skipped(reason) => {
                println!("  {} {} ({:?})", "-".yellow(), path, reason)
            }
        }
    }
}

fn apply_clean_args(config: &mut Config, args: &CleanArgs) {
    config.dry_run = !args.yes;
    config.override_protections |= args.force;
    config.include_confirm_required |= args.include_confirm;
    if args.permanent {
        config.mode = RemovalMode::Permanent;
    }
    if let Some(fallback) = args.fallback {
        config.trash_fallback = fallback;
    }
}

fn run_clean(
    config: &mut Config,
    args: &CleanArgs,
    group: Option<RuleGroup>,
    json_output: bool,
) -> Result<()> {
    let roots = apply_scan_args(config, &args.scan, group);
    apply_clean_args(config, args);

    let sweeper = Sweeper::from_config(config).context("invalid configuration")?;

    let progress = ScanProgress::start(json_output);
    let survey = sweeper.survey(&roots, &progress);
    progress.finish();
    let survey = survey.context("scan failed")?;
    let plan = sweeper.plan(survey.candidates);

    if plan.is_empty() {
        if json_output {
            println!("{}", serde_json::to_string_pretty(&json!({ "plan": plan, "outcomes": [] }))?);
        } else {
            println!("{}", "Nothing to clean.".yellow());
        }
        return Ok(());
    }

    if !json_output {
        display_plan(&plan);
        println!(
            "\n{} {}",
            "Total size:".bold(),
            plan.total_human().green().bold()
        );
        if config.dry_run {
            println!("\n{}", "Dry run - nothing will be removed.".cyan().bold());
        } else {
            println!("\n{}", "Cleaning...".cyan().bold());
        }
    }

    let audit = match AuditLog::from_config(config, "clean") {
        Ok(audit) => audit,
        Err(err) => {
            tracing::warn!("audit log unavailable: {}", err);
            None
        }
    };
    let printer = OutcomePrinter {
        audit: audit.as_ref(),
        quiet: json_output,
    };
    let outcomes = sweeper.execute(&plan, &printer);
    let summary = ExecutionSummary::from_outcomes(&outcomes);
    if let Some(audit) = &audit {
        if let Err(err) = audit.finish(&summary) {
            tracing::warn!("failed to finish audit run: {}", err);
        }
    }

    if json_output {
        let out = json!({
            "plan": plan,
            "outcomes": outcomes,
            "summary": summary,
            "dry_run": config.dry_run,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summary(&summary, config);
    }

    if summary.failed > 0 {
        bail!("{} of {} entries could not be removed", summary.failed, outcomes.len());
    }
    Ok(())
}

fn print_summary(summary: &ExecutionSummary, config: &Config) {
    if config.dry_run {
        println!(
            "\n{} {} entries would be removed",
            "Dry run:".cyan().bold(),
            summary.skipped
        );
        println!("  Re-run with {} to clean.", "--yes".bold());
        return;
    }

    println!("\n{}", "Cleaning completed!".green().bold());
    println!("  Cleaned: {}", summary.succeeded.to_string().green());
    println!("  Skipped: {}", summary.skipped.to_string().yellow());
    println!("  Failed: {}", summary.failed.to_string().red());
    println!("  Space freed: {}", summary.size_freed_human().green().bold());

    if config.mode == RemovalMode::Trash && summary.succeeded > 0 {
        let root = config.trash_dir.clone().unwrap_or_else(default_trash_root);
        if let Ok(Some(batch_id)) = latest_batch_id(&root) {
            println!("  Trash batch: {}", batch_id.cyan().bold());
            println!(
                "  Undo: {}",
                format!("devsweep restore --batch {}", batch_id).bright_black()
            );
        }
    }
}

fn run_restore(
    config: &Config,
    batch: Option<String>,
    options: RestoreOptions,
    json_output: bool,
) -> Result<()> {
    let trash_root = config.trash_dir.clone().unwrap_or_else(default_trash_root);
    let batch_id = match batch {
        Some(b) => Some(b),
        None => latest_batch_id(&trash_root).context("failed to read trash log")?,
    };

    let Some(batch_id) = batch_id else {
        println!("{}", "No trash batches found.".yellow());
        return Ok(());
    };

    if !json_output {
        println!("{}", "Restoring from trash...".cyan().bold());
        println!("  Trash root: {}", trash_root.display());
        println!("  Batch: {}", batch_id.cyan().bold());
    }

    let result = restore_batch(&trash_root, &batch_id, options)
        .with_context(|| format!("failed to restore batch {}", batch_id))?;

    if let Ok(Some(audit)) = AuditLog::from_config(config, "restore") {
        let summary = ExecutionSummary {
            succeeded: result.restored_count,
            failed: result.failed_count,
            skipped: result.skipped_count,
            bytes_freed: 0,
        };
        if let Err(err) = audit.finish(&summary) {
            tracing::warn!("failed to finish audit run: {}", err);
        }
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("\n{}", "Restore completed!".green().bold());
    println!("  Restored: {}", result.restored_count.to_string().green());
    println!("  Skipped: {}", result.skipped_count.to_string().yellow());
    println!("  Failed: {}", result.failed_count.to_string().red());

    if !result.errors.is_empty() {
        println!("\n{}", "Errors:".red().bold());
        for error in &result.errors {
            println!("  {}", error.red());
        }
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = match path {
        Some(path) => path,
        None => Config::ensure_config_dir().context("failed to create config directory")?,
    };

    Config::default()
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!(
        "{} {}",
        "Config file created:".green().bold(),
        config_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["devsweep", "clean", "/tmp/work"]).unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert!(!args.yes);
        assert_eq!(args.scan.roots, vec![PathBuf::from("/tmp/work")]);
    }

    #[test]
    fn parses_groups_and_fallback() {
        let cli = Cli::try_parse_from([
            "devsweep", "-vv", "clean", "--group", "deps", "-g", "build", "--fallback", "permanent",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(args.scan.groups, vec![RuleGroup::Deps, RuleGroup::Build]);
        assert_eq!(args.fallback, Some(TrashFallback::Permanent));
        assert!(args.yes);
    }

    #[test]
    fn yes_alone_leaves_confirm_required_categories_out() {
        let cli = Cli::try_parse_from(["devsweep", "caches", "--yes"]).unwrap();
        let Commands::Caches(args) = cli.command else {
            panic!("expected caches");
        };
        let mut config = Config::default();
        apply_clean_args(&mut config, &args);
        assert!(!config.dry_run);
        assert!(!config.include_confirm_required);

        let cli = Cli::try_parse_from(["devsweep", "caches", "--yes", "--include-confirm"]).unwrap();
        let Commands::Caches(args) = cli.command else {
            panic!("expected caches");
        };
        apply_clean_args(&mut config, &args);
        assert!(config.include_confirm_required);
    }

    #[test]
    fn group_shortcut_replaces_configured_groups() {
        let mut config = Config {
            groups: vec![RuleGroup::Deps],
            roots: vec!["/srv/code".to_string()],
            ..Default::default()
        };
        let roots = apply_scan_args(&mut config, &ScanArgs::default(), Some(RuleGroup::Docker));
        assert_eq!(config.groups, vec![RuleGroup::Docker]);
        assert_eq!(roots, vec![PathBuf::from("/srv/code")]);
    }

    #[test]
    fn shorten_keeps_the_tail() {
        assert_eq!(shorten("abc", 10), "abc");
        assert_eq!(shorten("0123456789", 8), "...56789");
    }
}
