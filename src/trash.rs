use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

const TRASH_LOG_FILENAME: &str = "trash_log.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashEntry {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub original_path: PathBuf,
    pub trashed_path: PathBuf,
    pub size: u64,
}

/// Recoverable removal: items are renamed into
/// `<root>/<batch-id>/<original path>` and recorded in a JSONL log.
#[derive(Debug, Clone)]
pub struct TrashManager {
    batch_id: String,
    root: PathBuf,
    log_path: PathBuf,
}

impl TrashManager {
    pub fn new_default() -> Result<Self> {
        Self::new_with_root(default_trash_root())
    }

    pub fn new_with_root(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;

        let batch_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            std::process::id()
        );
        let log_path = root.join(TRASH_LOG_FILENAME);
        Ok(Self {
            batch_id,
            root,
            log_path,
        })
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `original` into the current batch.
    pub fn trash_dir(&self, original: &Path, size: u64) -> io::Result<TrashEntry> {
        let trashed_path = self
            .root
            .join(&self.batch_id)
            .join(path_to_trash_relpath(original));

        if let Some(parent) = trashed_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(original, &trashed_path)?;

        let entry = TrashEntry {
            batch_id: self.batch_id.clone(),
            created_at: Utc::now(),
            original_path: original.to_path_buf(),
            trashed_path,
            size,
        };
        if let Err(err) = self.append_log(&entry) {
            // Without a log entry the item could not be restored; put it back.
            fs::rename(&entry.trashed_path, original)?;
            return Err(err);
        }

        tracing::debug!(
            from = %entry.original_path.display(),
            to = %entry.trashed_path.display(),
            "moved to trash"
        );
        Ok(entry)
    }

    fn append_log(&self, entry: &TrashEntry) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        serde_json::to_writer(&mut file, entry)?;
        writeln!(&mut file)?;
        Ok(())
    }

    pub fn load_log(&self) -> Result<Vec<TrashEntry>> {
        load_trash_log(&self.log_path)
    }
}

pub fn default_trash_root() -> PathBuf {
    if let Ok(custom) = std::env::var("DEVSWEEP_TRASH_DIR") {
        return PathBuf::from(custom);
    }

    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devsweep")
        .join("trash")
}

pub fn load_trash_log(log_path: &Path) -> Result<Vec<TrashEntry>> {
    let content = match fs::read_to_string(log_path) {
        Ok(c) => c,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(log_path, err)),
    };

    let mut entries = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<TrashEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => tracing::warn!(log = %log_path.display(), "skipping bad trash log line: {}", err),
        }
    }

    Ok(entries)
}

pub fn latest_batch_id(root: &Path) -> Result<Option<String>> {
    let entries = load_trash_log(&root.join(TRASH_LOG_FILENAME))?;
    Ok(entries
        .into_iter()
        .max_by_key(|e| e.created_at)
        .map(|e| e.batch_id))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    pub dry_run: bool,
    /// Replace whatever now exists at the original location
    pub force: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct RestoreResult {
    pub restored_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

/// Move every item of a batch back to where it came from.
pub fn restore_batch(root: &Path, batch_id: &str, options: RestoreOptions) -> Result<RestoreResult> {
    let mut entries: Vec<TrashEntry> = load_trash_log(&root.join(TRASH_LOG_FILENAME))?
        .into_iter()
        .filter(|e| e.batch_id == batch_id)
        .collect();

    let mut result = RestoreResult::default();
    if entries.is_empty() {
        result
            .errors
            .push(format!("No entries found for batch_id `{}`", batch_id));
        return Ok(result);
    }

    // Deeper paths first, so nested items land before their parents.
    entries.sort_by_key(|e| std::cmp::Reverse(e.original_path.components().count()));

    for entry in entries {
        if !entry.trashed_path.exists() {
            result.skipped_count += 1;
            continue;
        }

        if entry.original_path.exists() && !options.force {
            result.skipped_count += 1;
            result.errors.push(format!(
                "Restore target already exists (use --force to override): {}",
                entry.original_path.display()
            ));
            continue;
        }

        if options.dry_run {
            result.restored_count += 1;
            tracing::info!(
                from = %entry.trashed_path.display(),
                to = %entry.original_path.display(),
                "would restore"
            );
            continue;
        }

        match restore_entry(&entry) {
            Ok(()) => {
                result.restored_count += 1;
                tracing::info!(path = %entry.original_path.display(), "restored");
            }
            Err(err) => {
                result.failed_count += 1;
                result.errors.push(format!(
                    "Failed to restore {}: {}",
                    entry.original_path.display(),
                    err
                ));
            }
        }
    }

    Ok(result)
}

fn restore_entry(entry: &TrashEntry) -> io::Result<()> {
    let target = &entry.original_path;
    if target.is_dir() {
        fs::remove_dir_all(target)?;
    } else if target.exists() {
        fs::remove_file(target)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&entry.trashed_path, target)
}

fn path_to_trash_relpath(path: &Path) -> PathBuf {
    let mut rel = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(prefix) => {
                // Windows: "C:" etc
                rel.push(prefix.as_os_str().to_string_lossy().replace(':', ""));
            }
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
            Component::Normal(part) => rel.push(part),
        }
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn victim(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join("src").join("to-delete");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("x"), "y").unwrap();
        dir
    }

    #[test]
    fn test_trash_and_restore_roundtrip() {
        let temp = TempDir::new().unwrap();
        let trash_root = temp.path().join("trash");
        let manager = TrashManager::new_with_root(trash_root.clone()).unwrap();

        let original = victim(&temp);
        let entry = manager.trash_dir(&original, 1).unwrap();
        assert!(!original.exists());
        assert!(entry.trashed_path.starts_with(trash_root.join(manager.batch_id())));
        assert_eq!(
            latest_batch_id(&trash_root).unwrap().as_deref(),
            Some(manager.batch_id())
        );

        let result =
            restore_batch(&trash_root, manager.batch_id(), RestoreOptions::default()).unwrap();
        assert_eq!(result.restored_count, 1);
        assert!(original.join("x").exists());
    }

    #[test]
    fn restore_refuses_to_clobber_without_force() {
        let temp = TempDir::new().unwrap();
        let trash_root = temp.path().join("trash");
        let manager = TrashManager::new_with_root(trash_root.clone()).unwrap();
        let original = victim(&temp);
        manager.trash_dir(&original, 1).unwrap();
        fs::create_dir_all(&original).unwrap();

        let dry = RestoreOptions {
            dry_run: true,
            force: true,
        };
        let result = restore_batch(&trash_root, manager.batch_id(), dry).unwrap();
        assert_eq!(result.restored_count, 1);
        assert!(!original.join("x").exists());

        let result =
            restore_batch(&trash_root, manager.batch_id(), RestoreOptions::default()).unwrap();
        assert_eq!(result.skipped_count, 1);
        assert!(!original.join("x").exists());

        let forced = RestoreOptions {
            dry_run: false,
            force: true,
        };
        let result = restore_batch(&trash_root, manager.batch_id(), forced).unwrap();
        assert_eq!(result.restored_count, 1);
        assert!(original.join("x").exists());
    }

    #[test]
    fn unknown_batch_reports_an_error() {
        let temp = TempDir::new().unwrap();
        let result = restore_batch(temp.path(), "nope", RestoreOptions::default()).unwrap();
        assert_eq!(result.restored_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(latest_batch_id(temp.path()).unwrap(), None);
    }
}
