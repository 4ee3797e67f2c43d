use crate::error::{Error, Result};
use crate::rules::{ActionClass, RuleGroup};
use crate::scanner::{Candidate, CandidateState};
use crate::utils::format_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// One directory to remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub path: PathBuf,
    pub category: String,
    pub group: RuleGroup,
    pub action: ActionClass,
    /// Bytes reclaimed, including absorbed nested candidates
    pub size: u64,
    /// Nested candidates removed together with this entry
    #[serde(default)]
    pub absorbed: Vec<PathBuf>,
    /// Protection lifted by an explicit override
    #[serde(default)]
    pub overridden: Option<String>,
}

impl PlanEntry {
    fn from_candidate(candidate: &Candidate, size: u64) -> Self {
        Self {
            path: candidate.path.clone(),
            category: candidate.rule.category.clone(),
            group: candidate.rule.group,
            action: candidate.rule.action,
            size,
            absorbed: Vec::new(),
            overridden: candidate
                .protection()
                .and_then(|p| p.reason())
                .map(|reason| reason.to_string()),
        }
    }

    pub fn size_human(&self) -> String {
        format_size(self.size)
    }
}

/// A candidate left out of the plan, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub path: PathBuf,
    pub reason: String,
}

impl Exclusion {
    fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Ordered, approved, sized entries ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<PlanEntry>,
    pub total_bytes: u64,
    #[serde(default)]
    pub excluded: Vec<Exclusion>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_human(&self) -> String {
        format_size(self.total_bytes)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let plan: Plan = serde_json::from_str(&content)?;
        if plan.schema_version != PLAN_SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "unsupported plan schema version {}",
                plan.schema_version
            )));
        }
        Ok(plan)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json_pretty()?;
        fs::write(path.as_ref(), json).map_err(|e| Error::io(path.as_ref(), e))
    }
}

#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Admit candidates whose protection is overridable
    pub override_protections: bool,
    /// Admit rules whose action is `confirm-required`; off unless the caller
    /// asks for them
    pub include_confirm_required: bool,
    /// Drop entries smaller than this many bytes
    pub min_size: Option<u64>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            override_protections: false,
            include_confirm_required: false,
            min_size: None,
        }
    }
}

/// Turns checked, sized candidates into a deterministic plan.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    options: PlanOptions,
}

impl PlanBuilder {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    pub fn build(&self, candidates: Vec<Candidate>) -> Plan {
        let mut excluded = Vec::new();
        let mut blockers: Vec<PathBuf> = Vec::new();
        let mut eligible: Vec<Candidate> = Vec::new();

        for candidate in candidates {
            let Some(verdict) = candidate.protection() else {
                excluded.push(Exclusion::new(&candidate.path, "not safety-checked"));
                blockers.push(candidate.path.clone());
                continue;
            };
            if !verdict.allows(self.options.override_protections) {
                excluded.push(Exclusion::new(&candidate.path, verdict.to_string()));
                blockers.push(candidate.path.clone());
                continue;
            }
            if candidate.size().is_none() {
                excluded.push(Exclusion::new(&candidate.path, "size unknown"));
                continue;
            }
            if !self.options.include_confirm_required
                && candidate.rule.action == ActionClass::ConfirmRequired
            {
                excluded.push(Exclusion::new(&candidate.path, "requires confirmation"));
                continue;
            }
            eligible.push(candidate);
        }

        // Removing an ancestor would take a protected descendant with it.
        eligible.retain(|candidate| {
            let blocker = blockers
                .iter()
                .find(|b| **b != candidate.path && b.starts_with(&candidate.path));
            match blocker {
                Some(blocker) => {
                    excluded.push(Exclusion::new(
                        &candidate.path,
                        format!("contains protected {}", blocker.display()),
                    ));
                    false
                }
                None => true,
            }
        });

        // Ancestors sort before descendants, so each nested candidate folds
        // into its outermost approved ancestor.
        eligible.sort_by(|a, b| a.path.cmp(&b.path));
        let mut entries: Vec<PlanEntry> = Vec::new();
        for mut candidate in eligible {
            let size = candidate.size().unwrap_or(0);
            candidate.advance(CandidateState::Planned);
            match entries
                .iter_mut()
                .find(|entry| candidate.path.starts_with(&entry.path))
            {
                Some(owner) => {
                    owner.size += size;
                    owner.absorbed.push(candidate.path);
                }
                None => entries.push(PlanEntry::from_candidate(&candidate, size)),
            }
        }

        if let Some(min_size) = self.options.min_size {
            entries.retain(|entry| {
                let keep = entry.size >= min_size;
                if !keep {
                    excluded.push(Exclusion::new(&entry.path, "below minimum size"));
                }
                keep
            });
        }

        entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        excluded.sort_by(|a, b| a.path.cmp(&b.path));

        let total_bytes = entries.iter().map(|e| e.size).sum();
        tracing::info!(
            entries = entries.len(),
            excluded = excluded.len(),
            total_bytes,
            "plan built"
        );

        Plan {
            schema_version: PLAN_SCHEMA_VERSION,
            created_at: Utc::now(),
            entries,
            total_bytes,
            excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Protection, ProtectionReason};
    use crate::rules::{Rule, RuleRegistry};
    use crate::scanner::SizeReport;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rule(category: &str) -> Arc<Rule> {
        RuleRegistry::builtin()
            .unwrap()
            .rules()
            .iter()
            .find(|r| r.category == category)
            .cloned()
            .unwrap()
    }

    fn candidate(path: &str, category: &str, bytes: Option<u64>, protection: Protection) -> Candidate {
        let mut c = Candidate::new(PathBuf::from(path), rule(category));
        c.mark_classified(None, None);
        c.record_protection(protection);
        c.record_size(&SizeReport {
            bytes: bytes.unwrap_or(0),
            complete: bytes.is_some(),
            ..SizeReport::default()
        });
        c
    }

    fn plan(candidates: Vec<Candidate>, override_protections: bool) -> Plan {
        PlanBuilder::new(PlanOptions {
            override_protections,
            include_confirm_required: true,
            ..PlanOptions::default()
        })
        .build(candidates)
    }

    fn approved(path: &str, bytes: u64) -> Candidate {
        candidate(path, "node-modules", Some(bytes), Protection::Approved)
    }

    fn dirty(path: &str, bytes: u64) -> Candidate {
        candidate(
            path,
            "node-modules",
            Some(bytes),
            Protection::Protected(ProtectionReason::DirtyWorkingTree {
                repo: PathBuf::from("/w/dirty"),
            }),
        )
    }

    fn paths(plan: &Plan) -> Vec<&str> {
        plan.entries
            .iter()
            .map(|e| e.path.to_str().unwrap())
            .collect()
    }

    #[test]
    fn entries_sort_by_size_then_path() {
        let plan = plan(
            vec![
                approved("/w/b/node_modules", 10),
                approved("/w/c/node_modules", 30),
                approved("/w/a/node_modules", 10),
            ],
            false,
        );

        assert_eq!(
            paths(&plan),
            vec!["/w/c/node_modules", "/w/a/node_modules", "/w/b/node_modules"]
        );
        assert_eq!(plan.total_bytes, 50);
    }

    #[test]
    fn protected_candidates_need_an_override() {
        let input = || {
            vec![
                approved("/w/a/node_modules", 1),
                dirty("/w/dirty/node_modules", 2),
                candidate(
                    "/w/kept/node_modules",
                    "node-modules",
                    Some(3),
                    Protection::Protected(ProtectionReason::KeepMarker),
                ),
            ]
        };

        let strict = plan(input(), false);
        assert_eq!(paths(&strict), vec!["/w/a/node_modules"]);
        assert_eq!(strict.excluded.len(), 2);

        let forced = plan(input(), true);
        assert_eq!(paths(&forced), vec!["/w/dirty/node_modules", "/w/a/node_modules"]);
        assert!(forced.entries[0].overridden.is_some());
        assert!(forced.entries[1].overridden.is_none());
        assert_eq!(forced.excluded.len(), 1);
    }

    #[test]
    fn protected_descendant_blocks_its_ancestor() {
        let plan = plan(
            vec![
                candidate("/home/u/.cache", "user-cache", Some(100), Protection::Approved),
                dirty("/home/u/.cache/tool/node_modules", 5),
                approved("/home/u/app/node_modules", 7),
            ],
            false,
        );

        assert_eq!(paths(&plan), vec!["/home/u/app/node_modules"]);
        assert!(plan
            .excluded
            .iter()
            .any(|e| e.path == Path::new("/home/u/.cache") && e.reason.starts_with("contains protected")));
    }

    #[test]
    fn nested_candidates_are_absorbed_into_approved_ancestor() {
        let plan = plan(
            vec![
                candidate("/home/u/.cache", "user-cache", Some(100), Protection::Approved),
                candidate("/home/u/.cache/pip", "pip-cache", Some(40), Protection::Approved),
            ],
            false,
        );

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].size, 140);
        assert_eq!(plan.entries[0].absorbed, vec![PathBuf::from("/home/u/.cache/pip")]);
        assert_eq!(plan.total_bytes, 140);
    }

    #[test]
    fn unsized_and_unconfirmed_candidates_are_left_out() {
        let builder = PlanBuilder::new(PlanOptions {
            include_confirm_required: false,
            min_size: Some(5),
            ..PlanOptions::default()
        });
        let plan = builder.build(vec![
            candidate("/w/a/node_modules", "node-modules", None, Protection::Approved),
            candidate("/w/.m2/repository", "maven-repository", Some(50), Protection::Approved),
            approved("/w/small/node_modules", 4),
            approved("/w/big/node_modules", 6),
        ]);

        assert_eq!(paths(&plan), vec!["/w/big/node_modules"]);
        let reasons: Vec<&str> = plan.excluded.iter().map(|e| e.reason.as_str()).collect();
        assert!(reasons.contains(&"size unknown"));
        assert!(reasons.contains(&"requires confirmation"));
        assert!(reasons.contains(&"below minimum size"));
    }

    #[test]
    fn confirm_required_rules_are_opt_in() {
        let input = || {
            vec![
                candidate("/home/u/.m2/repository", "maven-repository", Some(50), Protection::Approved),
                approved("/home/u/app/node_modules", 7),
            ]
        };

        let default = PlanBuilder::default().build(input());
        assert_eq!(paths(&default), vec!["/home/u/app/node_modules"]);
        assert_eq!(default.excluded[0].reason, "requires confirmation");

        let opted_in = plan(input(), false);
        assert_eq!(
            paths(&opted_in),
            vec!["/home/u/.m2/repository", "/home/u/app/node_modules"]
        );
    }

    #[test]
    fn test_plan_roundtrip_json() {
        let temp = TempDir::new().unwrap();
        let plan_path = temp.path().join("plan.json");

        let plan = plan(vec![approved("/scan/p1/node_modules", 123)], false);
        plan.save_json(&plan_path).unwrap();

        let loaded = Plan::load_json(&plan_path).unwrap();
        assert_eq!(loaded.schema_version, PLAN_SCHEMA_VERSION);
        assert_eq!(loaded.entries, plan.entries);
        assert_eq!(loaded.total_bytes, 123);
    }
}
