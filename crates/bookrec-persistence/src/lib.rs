//! Snapshot recording for bookrec.
//!
//! Writes every applied snapshot to append-only files partitioned by
//! symbol and UTC day:
//! - JSON Lines: summary plus full levels, one object per line
//! - CSV: fixed summary columns, optional per-level columns
//! - Parquet: buffered, rewritten atomically on each flush
//!
//! All file I/O runs on the recorder actor (`spawn_recorder`).

pub mod columnar;
pub mod error;
pub mod format;
pub mod jsonl;
pub mod record;
pub mod recorder;
pub mod tabular;

pub use columnar::{append_parquet, read_parquet, snapshot_schema, ParquetBatcher};
pub use error::{PersistenceError, PersistenceResult};
pub use format::{cleanup_old_files, file_path, list_files, normalize_symbol, OutputFormat};
pub use jsonl::{read_jsonl, JsonlWriter};
pub use record::{ColumnarRecord, JsonlRecord, SnapshotRecord};
pub use recorder::{
    spawn_recorder, RecorderConfig, RecorderHandle, RecorderMsg, RecorderStats, SnapshotRecorder,
};
pub use tabular::{read_csv, CsvWriter};
