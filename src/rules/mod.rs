//! Classification rules for artifact directories.
//!
//! A rule is a plain data record: a directory-name glob, optional marker
//! files next to or inside the directory, an optional glob the parent
//! directory must match, a category tag, a group, a default action and a
//! prune flag. [`RuleSpec`] is the declarative form (built-in table and user
//! config); [`RuleRegistry`] compiles and orders them for matching.

mod builtin;

pub use builtin::builtin_rules;

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Stable grouping of rule categories, used for subcommand-level selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleGroup {
    Deps,
    Build,
    Venv,
    Caches,
    Xcode,
    Docker,
    Ide,
    Toolchain,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 8] = [
        Self::Deps,
        Self::Build,
        Self::Venv,
        Self::Caches,
        Self::Xcode,
        Self::Docker,
        Self::Ide,
        Self::Toolchain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Deps => "deps",
            Self::Build => "build",
            Self::Venv => "venv",
            Self::Caches => "caches",
            Self::Xcode => "xcode",
            Self::Docker => "docker",
            Self::Ide => "ide",
            Self::Toolchain => "toolchain",
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|group| group.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown rule group `{}`", s)))
    }
}

/// Default action class attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ActionClass {
    #[default]
    TrashSafe,
    ConfirmRequired,
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrashSafe => f.write_str("trash-safe"),
            Self::ConfirmRequired => f.write_str("confirm-required"),
        }
    }
}

/// How to interpret a rule's marker list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMode {
    #[default]
    AnyOf,
    AllOf,
}

/// Resolution policy for rules of equal specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    #[default]
    FirstDeclared,
    LastDeclared,
}

/// Declarative rule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Category tag, e.g. `node-modules`
    pub category: String,

    pub group: RuleGroup,

    /// Glob matched against the directory's own name
    pub directory: String,

    /// Marker files expected next to the directory (in its parent)
    #[serde(default)]
    pub markers: Vec<String>,

    /// Marker files expected inside the directory
    #[serde(default)]
    pub child_markers: Vec<String>,

    #[serde(default)]
    pub marker_mode: MarkerMode,

    /// Entries inside the directory that veto the match
    #[serde(default)]
    pub unless: Vec<String>,

    /// Glob the parent directory's absolute path must match
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub action: ActionClass,

    /// Do not descend into matched directories
    #[serde(default = "default_true")]
    pub prune: bool,
}

fn default_true() -> bool {
    true
}

impl RuleSpec {
    pub fn new(category: &str, group: RuleGroup, directory: &str) -> Self {
        Self {
            category: category.to_string(),
            group,
            directory: directory.to_string(),
            markers: Vec::new(),
            child_markers: Vec::new(),
            marker_mode: MarkerMode::AnyOf,
            unless: Vec::new(),
            parent: None,
            action: ActionClass::TrashSafe,
            prune: true,
        }
    }

    pub fn sibling(mut self, markers: &[&str]) -> Self {
        self.markers.extend(markers.iter().map(|m| m.to_string()));
        self
    }

    pub fn child(mut self, markers: &[&str]) -> Self {
        self.child_markers.extend(markers.iter().map(|m| m.to_string()));
        self
    }

    pub fn all_of(mut self) -> Self {
        self.marker_mode = MarkerMode::AllOf;
        self
    }

    pub fn unless(mut self, entries: &[&str]) -> Self {
        self.unless.extend(entries.iter().map(|m| m.to_string()));
        self
    }

    pub fn under(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn confirm(mut self) -> Self {
        self.action = ActionClass::ConfirmRequired;
        self
    }

    /// Keep walking below matched directories.
    pub fn descend(mut self) -> Self {
        self.prune = false;
        self
    }

    /// Parent constraint outweighs markers, which outweigh a literal name.
    pub fn specificity(&self) -> u32 {
        let parent = if self.parent.is_some() { 4 } else { 0 };
        let markers = 2 * (self.markers.len() + self.child_markers.len()) as u32;
        let literal = if has_glob_chars(&self.directory) { 0 } else { 1 };
        parent + markers + literal
    }
}

/// A compiled rule.
#[derive(Debug, Serialize)]
pub struct Rule {
    pub category: String,
    /// Glob matched against the directory name
    pub directory: String,
    pub group: RuleGroup,
    pub action: ActionClass,
    pub prune: bool,
    pub specificity: u32,
    /// Position in declaration order
    pub order: usize,
    #[serde(skip)]
    matcher: Matcher,
}

#[derive(Debug)]
struct Matcher {
    sibling: Vec<Marker>,
    child: Vec<Marker>,
    mode: MarkerMode,
    unless: Vec<String>,
    parent: Option<GlobMatcher>,
}

#[derive(Debug)]
enum Marker {
    Literal(String),
    Pattern(GlobMatcher),
}

/// Upper bound on directory entries inspected for a glob marker.
const MARKER_LISTING_LIMIT: usize = 4096;

impl Marker {
    fn compile(raw: &str) -> Result<Self> {
        if has_glob_chars(raw) {
            Ok(Self::Pattern(compile_glob(raw)?.compile_matcher()))
        } else {
            Ok(Self::Literal(raw.to_string()))
        }
    }

    fn present_in(&self, dir: &Path) -> bool {
        match self {
            Self::Literal(name) => dir.join(name).exists(),
            Self::Pattern(glob) => match fs::read_dir(dir) {
                Ok(entries) => entries
                    .take(MARKER_LISTING_LIMIT)
                    .filter_map(|e| e.ok())
                    .any(|e| glob.is_match(e.file_name())),
                Err(_) => false,
            },
        }
    }
}

impl Rule {
    fn compile(spec: &RuleSpec, order: usize) -> Result<Self> {
        let sibling = spec
            .markers
            .iter()
            .map(|m| Marker::compile(m))
            .collect::<Result<Vec<_>>>()?;
        let child = spec
            .child_markers
            .iter()
            .map(|m| Marker::compile(m))
            .collect::<Result<Vec<_>>>()?;
        let parent = match &spec.parent {
            Some(pattern) => Some(compile_glob(pattern)?.compile_matcher()),
            None => None,
        };

        Ok(Self {
            category: spec.category.clone(),
            directory: spec.directory.clone(),
            group: spec.group,
            action: spec.action,
            prune: spec.prune,
            specificity: spec.specificity(),
            order,
            matcher: Matcher {
                sibling,
                child,
                mode: spec.marker_mode,
                unless: spec.unless.clone(),
                parent,
            },
        })
    }

    /// Checks everything except the name glob, which the registry has
    /// already matched.
    fn matches_context(&self, ctx: &MatchContext<'_>) -> bool {
        let m = &self.matcher;

        if let Some(parent) = &m.parent {
            if !parent.is_match(normalize(ctx.parent).as_str()) {
                return false;
            }
        }

        if m.unless.iter().any(|name| ctx.dir.join(name).exists()) {
            return false;
        }

        let mut checks = m
            .sibling
            .iter()
            .map(|marker| marker.present_in(ctx.parent))
            .chain(m.child.iter().map(|marker| marker.present_in(ctx.dir)))
            .peekable();

        if checks.peek().is_none() {
            return true;
        }

        match m.mode {
            MarkerMode::AnyOf => checks.any(|present| present),
            MarkerMode::AllOf => checks.all(|present| present),
        }
    }
}

/// The directory being classified together with its parent context.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub dir: &'a Path,
    pub name: &'a str,
    pub parent: &'a Path,
}

impl<'a> MatchContext<'a> {
    /// `None` for paths without a UTF-8 file name or a parent.
    pub fn new(dir: &'a Path) -> Option<Self> {
        Some(Self {
            dir,
            name: dir.file_name()?.to_str()?,
            parent: dir.parent()?,
        })
    }
}

/// Selects a subset of rules by group and/or category tag. An empty filter
/// selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl RuleFilter {
    pub fn groups(groups: &[RuleGroup]) -> Self {
        Self {
            groups: groups.to_vec(),
            categories: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.categories.is_empty()
    }

    pub fn selects(&self, rule: &Rule) -> bool {
        self.is_empty()
            || self.groups.contains(&rule.group)
            || self.categories.iter().any(|c| c == &rule.category)
    }
}

/// Ordered, compiled rule table.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<Arc<Rule>>,
    /// Name globs, indexed like `rules`
    names: GlobSet,
    tie_break: TieBreak,
}

impl RuleRegistry {
    /// Registry over the built-in table.
    pub fn builtin() -> Result<Self> {
        Self::new(&builtin_rules(), TieBreak::default())
    }

    pub fn new(specs: &[RuleSpec], tie_break: TieBreak) -> Result<Self> {
        let mut rules = specs
            .iter()
            .enumerate()
            .map(|(order, spec)| Rule::compile(spec, order).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        // Stable sort keeps declaration order among equal specificity.
        match tie_break {
            TieBreak::FirstDeclared => {
                rules.sort_by(|a, b| b.specificity.cmp(&a.specificity));
            }
            TieBreak::LastDeclared => {
                rules.sort_by(|a, b| {
                    b.specificity
                        .cmp(&a.specificity)
                        .then_with(|| b.order.cmp(&a.order))
                });
            }
        }

        Self::from_ordered(rules, tie_break)
    }

    /// Built-in rules followed by user rules, which are declared last.
    pub fn with_custom(custom: &[RuleSpec], tie_break: TieBreak) -> Result<Self> {
        let mut specs = builtin_rules();
        specs.extend(custom.iter().cloned());
        Self::new(&specs, tie_break)
    }

    fn from_ordered(rules: Vec<Arc<Rule>>, tie_break: TieBreak) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for rule in &rules {
            builder.add(compile_glob(&rule.directory)?);
        }
        let names = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build rule name set: {}", e)))?;

        Ok(Self {
            rules,
            names,
            tie_break,
        })
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Rules in match order.
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Category tags known to this registry, sorted and deduplicated.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.rules.iter().map(|r| r.category.as_str()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Restricts the registry to the rules a filter selects, keeping order.
    pub fn subset(&self, filter: &RuleFilter) -> Result<Self> {
        if filter.is_empty() {
            return Ok(self.clone());
        }
        let kept = self
            .rules
            .iter()
            .filter(|rule| filter.selects(rule))
            .cloned()
            .collect();
        Self::from_ordered(kept, self.tie_break)
    }

    /// First (most specific) rule matching the directory, if any.
    pub fn find(&self, ctx: &MatchContext<'_>) -> Option<Arc<Rule>> {
        let mut hits = self.names.matches(ctx.name);
        hits.sort_unstable();
        hits.into_iter()
            .map(|idx| &self.rules[idx])
            .find(|rule| rule.matches_context(ctx))
            .cloned()
    }
}

fn compile_glob(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(&pattern.replace('\\', "/"))
        .literal_separator(true)
        .build()
        .map_err(|e| Error::glob(pattern, e))
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}
