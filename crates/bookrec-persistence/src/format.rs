//! Output formats and on-disk layout.
//!
//! Layout: `<root>/<format>/<symbol>_<YYYYMMDD>.<ext>`, one file per
//! symbol and UTC day of the snapshot timestamp.

use crate::error::PersistenceResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// On-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line.
    Jsonl,
    /// One row per snapshot with a header line.
    Csv,
    /// Columnar, written in batches.
    Parquet,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [Self::Jsonl, Self::Csv, Self::Parquet];

    /// Directory name and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Make a symbol safe for use in a file name.
///
/// Keeps ASCII alphanumerics, `-` and `.`; everything else becomes `_`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File for `symbol` on `date` in `format`.
pub fn file_path(root: &Path, format: OutputFormat, symbol: &str, date: NaiveDate) -> PathBuf {
    root.join(format.as_str()).join(format!(
        "{}_{}.{}",
        normalize_symbol(symbol),
        date.format("%Y%m%d"),
        format.extension()
    ))
}

/// Files of one format under `root`, sorted by name.
pub fn list_files(root: &Path, format: OutputFormat) -> PersistenceResult<Vec<PathBuf>> {
    let dir = root.join(format.as_str());
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(format.extension())
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Delete files of every format last modified more than `max_age` ago.
///
/// Returns the number of files removed. Files that cannot be inspected
/// or removed are skipped with a warning.
pub fn cleanup_old_files(root: &Path, max_age: Duration) -> PersistenceResult<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for format in OutputFormat::ALL {
        for path in list_files(root, format)? {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read file mtime");
                    continue;
                }
            };
            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed old file");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old file"),
                }
            }
        }
    }

    if removed > 0 {
        info!(root = %root.display(), removed, "Cleaned up old recordings");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BTC-PERPETUAL"), "BTC-PERPETUAL");
        assert_eq!(normalize_symbol("BTC/USDT:USDT"), "BTC_USDT_USDT");
        assert_eq!(normalize_symbol("a\\b c"), "a_b_c");
    }

    #[test]
    fn test_file_path() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let path = file_path(Path::new("/data"), OutputFormat::Csv, "BTC/USD:BTC", date);
        assert_eq!(path, PathBuf::from("/data/csv/BTC_USD_BTC_20240307.csv"));
    }

    #[test]
    fn test_format_serde() {
        let f: OutputFormat = serde_json::from_str("\"parquet\"").unwrap();
        assert_eq!(f, OutputFormat::Parquet);
        assert_eq!(OutputFormat::Jsonl.to_string(), "jsonl");
    }

    #[test]
    fn test_list_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let jsonl = dir.path().join("jsonl");
        std::fs::create_dir_all(&jsonl).unwrap();
        std::fs::write(jsonl.join("B_20240101.jsonl"), "{}\n").unwrap();
        std::fs::write(jsonl.join("A_20240101.jsonl"), "{}\n").unwrap();
        std::fs::write(jsonl.join("notes.txt"), "x").unwrap();

        let files = list_files(dir.path(), OutputFormat::Jsonl).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("A_20240101.jsonl"));
        assert!(list_files(dir.path(), OutputFormat::Parquet).unwrap().is_empty());

        // Fresh files survive a one-hour cutoff; a zero cutoff removes them.
        assert_eq!(cleanup_old_files(dir.path(), Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_files(dir.path(), Duration::ZERO).unwrap(), 2);
        assert!(jsonl.join("notes.txt").exists());
    }
}
