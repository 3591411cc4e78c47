//! Streaming engine for bookrec.
//!
//! One `StreamWorker` task per subscribed symbol:
//! - connects through a `FeedConnector` and reconnects with backoff
//! - validates each book message (`BookNormalizer`) and drops bad ones
//! - writes snapshots into the shared `SnapshotStore`
//! - notifies the `UpdateHandler` and forwards to the recorder
//!
//! `SubscriptionManager` keeps at most one live worker per symbol.

pub mod error;
pub mod handler;
pub mod normalizer;
pub mod store;
pub mod subscription;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{FeedError, FeedResult};
pub use handler::{NoopHandler, UpdateHandler};
pub use normalizer::{BookNormalizer, Rejection};
pub use store::{HistoryConfig, SnapshotStore};
pub use subscription::SubscriptionManager;
pub use worker::{
    SharedState, StreamWorker, SubscriptionState, WorkerConfig, WorkerContext, WorkerStatus,
};
