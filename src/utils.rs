use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Format bytes into a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Parse a human-readable size into bytes.
///
/// Supported examples:
/// - `1024`
/// - `10KB`, `10 KB`
/// - `1.5GB`
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Config("size is empty".to_string()));
    }

    let split_idx = input.find(|ch: char| ch.is_ascii_alphabetic());
    let (number_str, unit_str) = match split_idx {
        Some(idx) => (&input[..idx], &input[idx..]),
        None => (input, ""),
    };

    let number = number_str
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| Error::Config(format!("invalid size number: `{}`", number_str.trim())))?;

    let unit = unit_str.trim().to_ascii_uppercase();
    let unit = unit.strip_suffix('B').unwrap_or(&unit);

    let multiplier: f64 = match unit {
        "" => 1.0,
        "K" | "KI" => 1024.0,
        "M" | "MI" => 1024.0 * 1024.0,
        "G" | "GI" => 1024.0 * 1024.0 * 1024.0,
        "T" | "TI" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => return Err(Error::Config(format!("unknown size unit: `{}`", other))),
    };

    let bytes = number * multiplier;
    if bytes > (u64::MAX as f64) {
        return Err(Error::Config("size is too large".to_string()));
    }

    Ok(bytes.round() as u64)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub(crate) fn is_same_or_child(path: &Path, parent: &Path) -> bool {
    path == parent || path.starts_with(parent)
}
