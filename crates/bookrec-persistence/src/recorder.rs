//! Snapshot recorder and its actor.
//!
//! `SnapshotRecorder` owns every open file of one collector. It is
//! driven from a single blocking task through `RecorderHandle`, so
//! stream workers never do file I/O themselves.

use crate::columnar::ParquetBatcher;
use crate::error::{PersistenceError, PersistenceResult};
use crate::format::{file_path, OutputFormat};
use crate::jsonl::JsonlWriter;
use crate::record::ColumnarRecord;
use crate::tabular::CsvWriter;
use bookrec_core::Snapshot;
use bookrec_telemetry::Metrics;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn default_root_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Jsonl]
}

fn default_parquet_batch_size() -> usize {
    1000
}

/// Parquet rows held per file while flushes fail, in batches.
const MAX_PENDING_BATCHES: usize = 4;

/// Recorder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    /// Buffered Parquet rows per file before a rewrite.
    #[serde(default = "default_parquet_batch_size")]
    pub parquet_batch_size: usize,
    /// Per-level column groups in CSV files; 0 writes the fixed columns only.
    #[serde(default)]
    pub csv_depth_levels: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            formats: default_formats(),
            parquet_batch_size: default_parquet_batch_size(),
            csv_depth_levels: 0,
        }
    }
}

/// Counters reported by `SnapshotRecorder::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub total_snapshots: u64,
    pub distinct_symbols: usize,
    /// Distinct files written per format name.
    pub files_per_format: BTreeMap<String, usize>,
}

fn close_quietly<W>(old: W, close: impl FnOnce(W) -> PersistenceResult<()>) {
    if let Err(e) = close(old) {
        warn!(error = %e, "Failed to close rotated writer");
    }
}

fn flush_batcher(
    batcher: &mut ParquetBatcher,
    files: &mut BTreeMap<OutputFormat, HashSet<PathBuf>>,
) -> PersistenceResult<usize> {
    if batcher.pending() == 0 {
        return Ok(0);
    }
    let n = batcher.flush()?;
    files
        .entry(OutputFormat::Parquet)
        .or_default()
        .insert(batcher.path().to_path_buf());
    Ok(n)
}

/// Writes snapshots to every configured format.
pub struct SnapshotRecorder {
    config: RecorderConfig,
    jsonl: HashMap<String, JsonlWriter>,
    csv: HashMap<String, CsvWriter>,
    parquet: HashMap<String, ParquetBatcher>,
    total_snapshots: u64,
    symbols: HashSet<String>,
    files: BTreeMap<OutputFormat, HashSet<PathBuf>>,
}

impl SnapshotRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        info!(
            root = %config.root_dir.display(),
            formats = ?config.formats,
            "Snapshot recorder created"
        );
        Self {
            config,
            jsonl: HashMap::new(),
            csv: HashMap::new(),
            parquet: HashMap::new(),
            total_snapshots: 0,
            symbols: HashSet::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// Record one snapshot in every format.
    ///
    /// A failing format is logged and counted; the others are still written.
    pub fn record(&mut self, snapshot: &Snapshot) {
        self.total_snapshots += 1;
        if !self.symbols.contains(&snapshot.symbol) {
            self.symbols.insert(snapshot.symbol.clone());
        }

        let date = snapshot.timestamp.date_naive();
        let formats = self.config.formats.clone();
        for format in formats {
            let result = match format {
                OutputFormat::Jsonl => self.write_jsonl(snapshot, date),
                OutputFormat::Csv => self.write_csv(snapshot, date),
                OutputFormat::Parquet => self.buffer_parquet(snapshot, date),
            };
            match result {
                Ok(()) => Metrics::record_written(format.as_str()),
                Err(e) => {
                    warn!(
                        symbol = %snapshot.symbol,
                        format = %format,
                        error = %e,
                        "Failed to record snapshot"
                    );
                    Metrics::storage_error(format.as_str());
                }
            }
        }
    }

    fn write_jsonl(&mut self, snapshot: &Snapshot, date: NaiveDate) -> PersistenceResult<()> {
        let path = file_path(&self.config.root_dir, OutputFormat::Jsonl, &snapshot.symbol, date);
        let writer = match self.jsonl.entry(snapshot.symbol.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().path() != path {
                    let old = e.insert(JsonlWriter::open(&path)?);
                    close_quietly(old, JsonlWriter::close);
                }
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(JsonlWriter::open(&path)?),
        };
        writer.write(snapshot)?;
        self.files.entry(OutputFormat::Jsonl).or_default().insert(path);
        Ok(())
    }

    fn write_csv(&mut self, snapshot: &Snapshot, date: NaiveDate) -> PersistenceResult<()> {
        let path = file_path(&self.config.root_dir, OutputFormat::Csv, &snapshot.symbol, date);
        let depth = self.config.csv_depth_levels;
        let writer = match self.csv.entry(snapshot.symbol.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().path() != path {
                    let old = e.insert(CsvWriter::open(&path, depth)?);
                    close_quietly(old, CsvWriter::close);
                }
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(CsvWriter::open(&path, depth)?),
        };
        writer.write(snapshot)?;
        self.files.entry(OutputFormat::Csv).or_default().insert(path);
        Ok(())
    }

    fn buffer_parquet(&mut self, snapshot: &Snapshot, date: NaiveDate) -> PersistenceResult<()> {
        let path = file_path(&self.config.root_dir, OutputFormat::Parquet, &snapshot.symbol, date);
        let max_pending = self.config.parquet_batch_size.max(1) * MAX_PENDING_BATCHES;
        let batcher = self
            .parquet
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| ParquetBatcher::new(path.clone()).with_max_pending(max_pending));

        // Day rollover: finish the previous file first.
        if batcher.path() != path {
            flush_batcher(batcher, &mut self.files)?;
            *batcher = ParquetBatcher::new(path).with_max_pending(max_pending);
        }

        let discarded = batcher.push(ColumnarRecord::from_snapshot(snapshot));
        if discarded > 0 {
            warn!(
                symbol = %snapshot.symbol,
                discarded,
                total_discarded = batcher.discarded(),
                "Parquet buffer full, oldest rows discarded"
            );
            Metrics::records_discarded(OutputFormat::Parquet.as_str(), discarded);
        }
        if batcher.pending() >= self.config.parquet_batch_size.max(1) {
            let n = flush_batcher(batcher, &mut self.files)?;
            debug!(symbol = %snapshot.symbol, rows = n, "Parquet batch flushed");
        }
        Ok(())
    }

    /// Flush buffered rows.
    ///
    /// With a symbol, also closes that symbol's open files. Every buffer
    /// is attempted; the first error is returned.
    pub fn flush(&mut self, symbol: Option<&str>) -> PersistenceResult<()> {
        let mut first_err = None;

        for (sym, batcher) in self.parquet.iter_mut() {
            if symbol.is_some_and(|s| s != sym) {
                continue;
            }
            if let Err(e) = flush_batcher(batcher, &mut self.files) {
                warn!(symbol = %sym, error = %e, "Parquet flush failed");
                Metrics::storage_error(OutputFormat::Parquet.as_str());
                first_err.get_or_insert(e);
            }
        }

        if let Some(sym) = symbol {
            if let Some(w) = self.jsonl.remove(sym) {
                if let Err(e) = w.close() {
                    first_err.get_or_insert(e);
                }
            }
            if let Some(w) = self.csv.remove(sym) {
                if let Err(e) = w.close() {
                    first_err.get_or_insert(e);
                }
            }
            if self.parquet.get(sym).is_some_and(|b| b.pending() == 0) {
                self.parquet.remove(sym);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush everything and close every open file.
    pub fn close(&mut self) -> PersistenceResult<()> {
        let result = self.flush(None);
        for (_, w) in self.jsonl.drain() {
            close_quietly(w, JsonlWriter::close);
        }
        for (_, w) in self.csv.drain() {
            close_quietly(w, CsvWriter::close);
        }
        info!(
            total_snapshots = self.total_snapshots,
            symbols = self.symbols.len(),
            "Snapshot recorder closed"
        );
        result
    }

    pub fn stats(&self) -> RecorderStats {
        let files_per_format = self
            .config
            .formats
            .iter()
            .map(|f| {
                let n = self.files.get(f).map_or(0, HashSet::len);
                (f.as_str().to_string(), n)
            })
            .collect();
        RecorderStats {
            total_snapshots: self.total_snapshots,
            distinct_symbols: self.symbols.len(),
            files_per_format,
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Messages for the recorder actor.
#[derive(Debug)]
pub enum RecorderMsg {
    Record(Arc<Snapshot>),
    Flush {
        symbol: Option<String>,
        ack: oneshot::Sender<PersistenceResult<()>>,
    },
    Stats(oneshot::Sender<RecorderStats>),
    /// Close every file and end the task.
    Shutdown(oneshot::Sender<PersistenceResult<()>>),
}

struct RecorderTask {
    rx: mpsc::Receiver<RecorderMsg>,
    recorder: SnapshotRecorder,
}

impl RecorderTask {
    fn run(mut self) {
        info!("Recorder task started");
        while let Some(msg) = self.rx.blocking_recv() {
            match msg {
                RecorderMsg::Record(snapshot) => self.recorder.record(&snapshot),
                RecorderMsg::Flush { symbol, ack } => {
                    let _ = ack.send(self.recorder.flush(symbol.as_deref()));
                }
                RecorderMsg::Stats(reply) => {
                    let _ = reply.send(self.recorder.stats());
                }
                RecorderMsg::Shutdown(ack) => {
                    let _ = ack.send(self.recorder.close());
                    info!("Recorder task stopped");
                    return;
                }
            }
        }

        // Every handle dropped without a shutdown.
        if let Err(e) = self.recorder.close() {
            warn!(error = %e, "Recorder close failed after channel closed");
        }
        info!("Recorder task stopped (channel closed)");
    }
}

/// Cloneable handle to the recorder actor.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderMsg>,
}

impl RecorderHandle {
    /// Queue a snapshot. Waits if the channel is full.
    pub async fn record(&self, snapshot: Arc<Snapshot>) -> PersistenceResult<()> {
        self.tx
            .send(RecorderMsg::Record(snapshot))
            .await
            .map_err(|_| PersistenceError::RecorderClosed)
    }

    /// Flush buffered rows (one symbol or all) and wait for completion.
    pub async fn flush(&self, symbol: Option<&str>) -> PersistenceResult<()> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(RecorderMsg::Flush {
                symbol: symbol.map(str::to_string),
                ack,
            })
            .await
            .map_err(|_| PersistenceError::RecorderClosed)?;
        rx.await.map_err(|_| PersistenceError::RecorderClosed)?
    }

    pub async fn stats(&self) -> PersistenceResult<RecorderStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecorderMsg::Stats(reply))
            .await
            .map_err(|_| PersistenceError::RecorderClosed)?;
        rx.await.map_err(|_| PersistenceError::RecorderClosed)
    }

    /// Close every file and stop the actor. Snapshots queued earlier are
    /// written first.
    pub async fn shutdown(&self) -> PersistenceResult<()> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(RecorderMsg::Shutdown(ack))
            .await
            .map_err(|_| PersistenceError::RecorderClosed)?;
        rx.await.map_err(|_| PersistenceError::RecorderClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the recorder actor on the blocking pool.
///
/// Returns a handle for interaction and a join handle for the task.
#[must_use]
pub fn spawn_recorder(
    recorder: SnapshotRecorder,
    capacity: usize,
) -> (RecorderHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = RecorderTask { rx, recorder };
    let join_handle = tokio::task::spawn_blocking(move || task.run());
    (RecorderHandle { tx }, join_handle)
}
