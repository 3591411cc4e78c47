//! JSON Lines snapshot writer.
//!
//! One `JsonlRecord` per line, flushed after every write. A restart on the
//! same day appends to the existing file. `read_jsonl` reports a line that
//! does not parse with its path and line number.

use crate::error::{PersistenceError, PersistenceResult};
use crate::record::JsonlRecord;
use bookrec_core::Snapshot;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-mode writer for one JSON Lines file.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
}

impl JsonlWriter {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening JSON Lines writer (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one snapshot and flush it to the OS.
    pub fn write(&mut self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let json = serde_json::to_string(&JsonlRecord::from_snapshot(snapshot))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    pub fn close(mut self) -> PersistenceResult<()> {
        self.writer.flush()?;
        info!(
            path = %self.path.display(),
            records = self.records_written,
            "Closed JSON Lines writer"
        );
        Ok(())
    }
}

/// Read every record of a JSON Lines file in order. Blank lines are skipped.
pub fn read_jsonl(path: &Path) -> PersistenceResult<Vec<JsonlRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            PersistenceError::Decode(format!("{}:{}: {e}", path.display(), idx + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}
