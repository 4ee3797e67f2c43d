use crate::audit::default_audit_path;
use crate::cleaner::{RemovalMode, TrashFallback};
use crate::error::{Error, Result};
use crate::rules::{RuleFilter, RuleGroup, RuleRegistry, RuleSpec, TieBreak};
use crate::scanner::ScanOptions;
use crate::trash::default_trash_root;
use crate::utils::{expand_tilde, parse_size};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scan roots; `~/` is expanded
    #[serde(default)]
    pub roots: Vec<String>,

    /// Active rule groups (empty = all)
    #[serde(default)]
    pub groups: Vec<RuleGroup>,

    /// Active rule categories, in addition to `groups`
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub dry_run: bool,

    /// Allow removal of candidates protected for overridable reasons
    #[serde(default)]
    pub override_protections: bool,

    /// Plan categories whose rules ask for confirmation (broad caches,
    /// package stores, VM images)
    #[serde(default)]
    pub include_confirm_required: bool,

    #[serde(default)]
    pub mode: RemovalMode,

    /// What to do when trash mode cannot move an item
    #[serde(default)]
    pub trash_fallback: TrashFallback,

    /// Worker threads for scanning and sizing (0 = one per CPU)
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub include_globs: Vec<String>,

    #[serde(default)]
    pub exclude_globs: Vec<String>,

    /// Directories to always exclude from scanning
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    #[serde(default)]
    pub follow_symlinks: bool,

    #[serde(default)]
    pub allow_external_symlinks: bool,

    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Smallest entry worth planning, e.g. `10MB`
    #[serde(default)]
    pub min_size: Option<String>,

    /// Protected paths and everything below them
    #[serde(default)]
    pub keep_paths: Vec<String>,

    /// Glob protected paths
    #[serde(default)]
    pub keep_globs: Vec<String>,

    /// Extra rules, declared after the built-in table
    #[serde(default)]
    pub custom_rules: Vec<RuleSpec>,

    #[serde(default)]
    pub tie_break: TieBreak,

    /// Where trashed items are kept (defaults to the user data dir)
    #[serde(default)]
    pub trash_dir: Option<PathBuf>,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            groups: Vec::new(),
            categories: Vec::new(),
            dry_run: false,
            override_protections: false,
            include_confirm_required: false,
            mode: RemovalMode::default(),
            trash_fallback: TrashFallback::default(),
            workers: 0,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            follow_symlinks: false,
            allow_external_symlinks: false,
            max_depth: None,
            min_size: None,
            keep_paths: Vec::new(),
            keep_globs: Vec::new(),
            custom_rules: Vec::new(),
            tie_break: TieBreak::default(),
            trash_dir: None,
            audit: AuditConfig::default(),
        }
    }
}

fn default_exclude_dirs() -> Vec<String> {
    vec![String::from(".git"), String::from(".svn"), String::from(".hg")]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load config from file, or use defaults if it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load and validate config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content).map_err(|e| Error::io(path.as_ref(), e))
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("devsweep").join("config.toml")
        } else {
            PathBuf::from(".devsweep.toml")
        }
    }

    /// Create config directory if it doesn't exist
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let config_path = Self::default_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        Ok(config_path)
    }

    /// Reject settings that would make a run meaningless or unsafe.
    pub fn validate(&self) -> Result<()> {
        for pattern in self
            .include_globs
            .iter()
            .chain(&self.exclude_globs)
            .chain(&self.keep_globs)
        {
            globset::Glob::new(pattern).map_err(|e| Error::glob(pattern, e))?;
        }
        self.min_size_bytes()?;
        self.registry()?;
        Ok(())
    }

    /// Roots with `~/` expanded.
    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| expand_tilde(r)).collect()
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    pub fn min_size_bytes(&self) -> Result<Option<u64>> {
        self.min_size.as_deref().map(parse_size).transpose()
    }

    pub fn rule_filter(&self) -> RuleFilter {
        RuleFilter {
            groups: self.groups.clone(),
            categories: self.categories.clone(),
        }
    }

    /// Built-in plus custom rules, restricted to the active groups and
    /// categories.
    pub fn registry(&self) -> Result<RuleRegistry> {
        let registry = RuleRegistry::with_custom(&self.custom_rules, self.tie_break)?;
        let filter = self.rule_filter();
        if let Some(unknown) = filter
            .categories
            .iter()
            .find(|c| !registry.categories().contains(&c.as_str()))
        {
            return Err(Error::Config(format!("unknown rule category `{}`", unknown)));
        }
        registry.subset(&filter)
    }

    pub fn trash_root(&self) -> PathBuf {
        self.trash_dir.clone().unwrap_or_else(default_trash_root)
    }

    /// Directories devsweep writes to; scans never enter them.
    pub fn state_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.trash_root()];
        let audit_log = self.audit.path.clone().unwrap_or_else(default_audit_path);
        if let Some(parent) = audit_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            dirs.push(parent.to_path_buf());
        }
        dirs
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            workers: self.worker_count(),
            max_depth: self.max_depth,
            exclude_dirs: self.exclude_dirs.clone(),
            include_globs: self.include_globs.clone(),
            exclude_globs: self.exclude_globs.clone(),
            exclude_paths: self.state_dirs(),
            follow_symlinks: self.follow_symlinks,
            allow_external_symlinks: self.allow_external_symlinks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_save_load() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");

        let config = Config {
            exclude_dirs: vec![String::from("test")],
            groups: vec![RuleGroup::Xcode],
            mode: RemovalMode::Permanent,
            min_size: Some("10MB".to_string()),
            ..Default::default()
        };

        config.save(&config_path).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.exclude_dirs, vec!["test"]);
        assert_eq!(loaded.groups, vec![RuleGroup::Xcode]);
        assert_eq!(loaded.mode, RemovalMode::Permanent);
        assert_eq!(loaded.min_size_bytes().unwrap(), Some(10 * 1024 * 1024));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.exclude_dirs.contains(&String::from(".git")));
        assert_eq!(config.mode, RemovalMode::Trash);
        assert_eq!(config.trash_fallback, TrashFallback::Fail);
        assert!(!config.include_confirm_required);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn scans_skip_the_trash_and_audit_directories() {
        let config = Config {
            trash_dir: Some(PathBuf::from("/data/devsweep-trash")),
            audit: AuditConfig {
                enabled: true,
                path: Some(PathBuf::from("/data/logs/audit.jsonl")),
            },
            ..Default::default()
        };

        assert_eq!(
            config.scan_options().exclude_paths,
            vec![PathBuf::from("/data/devsweep-trash"), PathBuf::from("/data/logs")]
        );
        assert_eq!(Config::default().state_dirs()[0], default_trash_root());
    }

    #[test]
    fn parses_hand_written_toml() {
        let config: Config = toml::from_str(
            r#"
            roots = ["~/src"]
            groups = ["caches", "docker"]
            mode = "permanent"
            trash_fallback = "permanent"
            tie_break = "last-declared"

            [[custom_rules]]
            category = "unity-library"
            group = "build"
            directory = "Library"
            markers = ["Assets", "ProjectSettings"]
            marker_mode = "all_of"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.groups, vec![RuleGroup::Caches, RuleGroup::Docker]);
        assert_eq!(config.trash_fallback, TrashFallback::Permanent);
        assert_eq!(config.tie_break, TieBreak::LastDeclared);
        assert_eq!(config.custom_rules.len(), 1);
        assert!(config.custom_rules[0].prune);
        assert!(config.root_paths()[0].ends_with("src"));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let bad_glob = Config {
            exclude_globs: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(bad_glob.validate(), Err(Error::InvalidGlob { .. })));

        let bad_size = Config {
            min_size: Some("lots".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad_size.validate(), Err(Error::Config(_))));

        let bad_category = Config {
            categories: vec!["not-a-rule".to_string()],
            ..Default::default()
        };
        assert!(matches!(bad_category.validate(), Err(Error::Config(_))));

        let unknown_group = toml::from_str::<Config>("groups = [\"gpu\"]");
        assert!(unknown_group.is_err());
    }
}
