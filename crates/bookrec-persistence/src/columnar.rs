//! Parquet snapshot writer.
//!
//! Rows are buffered per file and written in batches. Parquet files
//! cannot be appended to in place, so a flush reads the existing rows,
//! writes old and new rows to a temp file and renames it over the
//! original. The file on disk is always complete; rows still in the
//! buffer are lost if the process dies before the next flush.

use crate::error::{PersistenceError, PersistenceResult};
use crate::record::ColumnarRecord;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Float64Builder, Int64Array, ListArray,
    ListBuilder, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

fn level_list() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
}

/// Arrow schema of a snapshot file.
pub fn snapshot_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp_ms", DataType::Int64, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("exchange", DataType::Utf8, false),
        Field::new("best_bid", DataType::Float64, true),
        Field::new("best_ask", DataType::Float64, true),
        Field::new("mid", DataType::Float64, true),
        Field::new("spread", DataType::Float64, true),
        Field::new("bid_depth", DataType::UInt32, false),
        Field::new("ask_depth", DataType::UInt32, false),
        Field::new("crossed", DataType::Boolean, false),
        Field::new("bid_prices", level_list(), false),
        Field::new("bid_sizes", level_list(), false),
        Field::new("ask_prices", level_list(), false),
        Field::new("ask_sizes", level_list(), false),
    ]))
}

fn list_column(rows: &[ColumnarRecord], values: impl Fn(&ColumnarRecord) -> &[f64]) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(values(row));
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Build one record batch from `rows`.
pub fn to_batch(rows: &[ColumnarRecord]) -> PersistenceResult<RecordBatch> {
    let arrays: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.timestamp_ms))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.symbol.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.exchange.as_str()))),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.best_bid).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.best_ask).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.mid).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.spread).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.bid_depth))),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.ask_depth))),
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.crossed).collect::<Vec<_>>())),
        list_column(rows, |r| &r.bid_prices),
        list_column(rows, |r| &r.bid_sizes),
        list_column(rows, |r| &r.ask_prices),
        list_column(rows, |r| &r.ask_sizes),
    ];
    Ok(RecordBatch::try_new(snapshot_schema(), arrays)?)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> PersistenceResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PersistenceError::Decode(format!("missing or mistyped column {name}")))
}

fn nullable(a: &Float64Array, i: usize) -> Option<f64> {
    if a.is_null(i) {
        None
    } else {
        Some(a.value(i))
    }
}

fn list_values(a: &ListArray, i: usize) -> PersistenceResult<Vec<f64>> {
    let values = a.value(i);
    let floats = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| PersistenceError::Decode("level list is not Float64".to_string()))?;
    Ok(floats.values().iter().copied().collect())
}

fn decode_batch(batch: &RecordBatch, out: &mut Vec<ColumnarRecord>) -> PersistenceResult<()> {
    let ts = column::<Int64Array>(batch, "timestamp_ms")?;
    let symbol = column::<StringArray>(batch, "symbol")?;
    let exchange = column::<StringArray>(batch, "exchange")?;
    let best_bid = column::<Float64Array>(batch, "best_bid")?;
    let best_ask = column::<Float64Array>(batch, "best_ask")?;
    let mid = column::<Float64Array>(batch, "mid")?;
    let spread = column::<Float64Array>(batch, "spread")?;
    let bid_depth = column::<UInt32Array>(batch, "bid_depth")?;
    let ask_depth = column::<UInt32Array>(batch, "ask_depth")?;
    let crossed = column::<BooleanArray>(batch, "crossed")?;
    let bid_prices = column::<ListArray>(batch, "bid_prices")?;
    let bid_sizes = column::<ListArray>(batch, "bid_sizes")?;
    let ask_prices = column::<ListArray>(batch, "ask_prices")?;
    let ask_sizes = column::<ListArray>(batch, "ask_sizes")?;

    for i in 0..batch.num_rows() {
        out.push(ColumnarRecord {
            timestamp_ms: ts.value(i),
            symbol: symbol.value(i).to_string(),
            exchange: exchange.value(i).to_string(),
            best_bid: nullable(best_bid, i),
            best_ask: nullable(best_ask, i),
            mid: nullable(mid, i),
            spread: nullable(spread, i),
            bid_depth: bid_depth.value(i),
            ask_depth: ask_depth.value(i),
            crossed: crossed.value(i),
            bid_prices: list_values(bid_prices, i)?,
            bid_sizes: list_values(bid_sizes, i)?,
            ask_prices: list_values(ask_prices, i)?,
            ask_sizes: list_values(ask_sizes, i)?,
        });
    }
    Ok(())
}

/// Read every row of a snapshot Parquet file, in file order.
pub fn read_parquet(path: &Path) -> PersistenceResult<Vec<ColumnarRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        decode_batch(&batch?, &mut rows)?;
    }
    Ok(rows)
}

/// Write `rows` after any rows already in `path`, replacing the file
/// atomically.
pub fn append_parquet(path: &Path, rows: &[ColumnarRecord]) -> PersistenceResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut all = existing_rows(path)?;
    let existing = all.len();
    all.extend_from_slice(rows);

    let batch = to_batch(&all)?;
    let tmp_path = path.with_extension("parquet.tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    std::fs::rename(&tmp_path, path)?;

    debug!(
        path = %path.display(),
        existing,
        appended = rows.len(),
        "Rewrote Parquet file"
    );
    Ok(())
}

/// Rows already in `path`. A file that exists but does not decode is
/// renamed to `<name>.parquet.corrupt-<n>` and treated as empty.
fn existing_rows(path: &Path) -> PersistenceResult<Vec<ColumnarRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    match read_parquet(path) {
        Ok(rows) => Ok(rows),
        Err(PersistenceError::Io(e)) => Err(e.into()),
        Err(e) => {
            let aside = move_aside(path)?;
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %e,
                "Unreadable Parquet file moved aside"
            );
            Ok(Vec::new())
        }
    }
}

fn move_aside(path: &Path) -> PersistenceResult<PathBuf> {
    let mut n = 0u32;
    loop {
        let aside = path.with_extension(format!("parquet.corrupt-{n}"));
        if !aside.exists() {
            std::fs::rename(path, &aside)?;
            return Ok(aside);
        }
        n += 1;
    }
}

/// Pending rows for one Parquet file.
///
/// At most `max_pending` rows are held; past that the oldest are
/// discarded so a file that keeps failing cannot grow the buffer.
#[derive(Debug)]
pub struct ParquetBatcher {
    path: PathBuf,
    pending: Vec<ColumnarRecord>,
    max_pending: usize,
    discarded: u64,
}

impl ParquetBatcher {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: Vec::new(),
            max_pending: usize::MAX,
            discarded: 0,
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer one row. Returns how many old rows were discarded to make
    /// room.
    pub fn push(&mut self, row: ColumnarRecord) -> usize {
        let excess = (self.pending.len() + 1).saturating_sub(self.max_pending);
        if excess > 0 {
            self.pending.drain(..excess);
            self.discarded += excess as u64;
        }
        self.pending.push(row);
        excess
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Rows discarded over the batcher's lifetime.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Write pending rows. Returns how many were written.
    ///
    /// On failure the rows stay pending so a later flush can retry.
    pub fn flush(&mut self) -> PersistenceResult<usize> {
        append_parquet(&self.path, &self.pending)?;
        let n = self.pending.len();
        self.pending.clear();
        Ok(n)
    }
}
