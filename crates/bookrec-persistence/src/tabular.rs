//! CSV snapshot writer.
//!
//! One row per snapshot. The header is written only when the file is
//! new, so reopening a day's file keeps appending rows under it.

use crate::error::PersistenceResult;
use crate::record::SnapshotRecord;
use bookrec_core::{PriceLevel, Snapshot};
use chrono::SecondsFormat;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Columns present in every file.
pub const BASE_COLUMNS: [&str; 10] = [
    "timestamp",
    "symbol",
    "exchange",
    "best_bid",
    "best_ask",
    "mid",
    "spread",
    "bid_depth",
    "ask_depth",
    "crossed",
];

/// Header for a file with `depth_levels` per-level column groups.
pub fn header(depth_levels: usize) -> Vec<String> {
    let mut cols: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for i in 0..depth_levels {
        cols.push(format!("bid_price_{i}"));
        cols.push(format!("bid_size_{i}"));
        cols.push(format!("ask_price_{i}"));
        cols.push(format!("ask_size_{i}"));
    }
    cols
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn row(snapshot: &Snapshot, depth_levels: usize) -> Vec<String> {
    let r = SnapshotRecord::from_snapshot(snapshot);
    let mut fields = vec![
        r.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        r.symbol,
        r.exchange,
        opt(r.best_bid),
        opt(r.best_ask),
        opt(r.mid),
        opt(r.spread),
        r.bid_depth.to_string(),
        r.ask_depth.to_string(),
        r.crossed.to_string(),
    ];
    let level = |side: &[PriceLevel], i: usize| side.get(i).copied();
    for i in 0..depth_levels {
        let bid = level(&snapshot.bids, i);
        let ask = level(&snapshot.asks, i);
        fields.push(opt(bid.map(|l| l.price)));
        fields.push(opt(bid.map(|l| l.size)));
        fields.push(opt(ask.map(|l| l.price)));
        fields.push(opt(ask.map(|l| l.size)));
    }
    fields
}

/// Append-mode writer for one CSV file.
pub struct CsvWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    depth_levels: usize,
    records_written: usize,
}

impl CsvWriter {
    /// Open `path` for appending; writes the header if the file is empty.
    pub fn open(path: &Path, depth_levels: usize) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        debug!(path = %path.display(), is_new, "Opening CSV writer (append mode)");

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(header(depth_levels))?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            depth_levels,
            records_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to the OS.
    pub fn write(&mut self, snapshot: &Snapshot) -> PersistenceResult<()> {
        self.writer.write_record(row(snapshot, self.depth_levels))?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    pub fn close(mut self) -> PersistenceResult<()> {
        self.writer.flush()?;
        info!(
            path = %self.path.display(),
            records = self.records_written,
            "Closed CSV writer"
        );
        Ok(())
    }
}

/// Read the fixed columns of every row, in file order.
pub fn read_csv(path: &Path) -> PersistenceResult<Vec<SnapshotRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        records.push(result?);
    }
    Ok(records)
}
