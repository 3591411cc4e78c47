//! Latest-snapshot store with bounded history.
//!
//! One slot per symbol. Only the symbol's own worker writes its slot;
//! readers clone `Arc`s out and never see a partially written snapshot.

use bookrec_core::Snapshot;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// History retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Keep a history ring at all.
    pub enabled: bool,
    /// Ring capacity per symbol.
    pub max_per_symbol: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_symbol: 1000,
        }
    }
}

/// Per-symbol slot.
#[derive(Debug, Default)]
struct Slot {
    latest: Option<Arc<Snapshot>>,
    history: VecDeque<Arc<Snapshot>>,
}

type SlotEntry = Arc<RwLock<Slot>>;

/// Snapshot store shared between workers and readers.
#[derive(Debug)]
pub struct SnapshotStore {
    slots: DashMap<String, SlotEntry>,
    history: HistoryConfig,
}

impl SnapshotStore {
    pub fn new(history: HistoryConfig) -> Self {
        Self {
            slots: DashMap::new(),
            history,
        }
    }

    fn get_or_create(&self, symbol: &str) -> SlotEntry {
        if let Some(slot) = self.slots.get(symbol) {
            return slot.clone();
        }
        self.slots
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Slot::default())))
            .clone()
    }

    /// Replace the latest snapshot and push it into the history ring.
    pub fn apply(&self, snapshot: Arc<Snapshot>) {
        let entry = self.get_or_create(&snapshot.symbol);
        let mut slot = entry.write();
        if self.history.enabled && self.history.max_per_symbol > 0 {
            while slot.history.len() >= self.history.max_per_symbol {
                slot.history.pop_front();
            }
            slot.history.push_back(snapshot.clone());
        }
        slot.latest = Some(snapshot);
    }

    pub fn get_latest(&self, symbol: &str) -> Option<Arc<Snapshot>> {
        self.slots
            .get(symbol)
            .and_then(|entry| entry.read().latest.clone())
    }

    /// Full history, oldest first.
    pub fn get_history(&self, symbol: &str) -> Vec<Arc<Snapshot>> {
        self.slots
            .get(symbol)
            .map(|entry| entry.read().history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent `limit` snapshots, oldest first.
    pub fn get_history_limit(&self, symbol: &str, limit: usize) -> Vec<Arc<Snapshot>> {
        self.slots
            .get(symbol)
            .map(|entry| {
                let slot = entry.read();
                let skip = slot.history.len().saturating_sub(limit);
                slot.history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Latest snapshot of every symbol that has one.
    pub fn all_latest(&self) -> Vec<Arc<Snapshot>> {
        let mut out: Vec<_> = self
            .slots
            .iter()
            .filter_map(|entry| entry.read().latest.clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.slots.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Drop a symbol's slot.
    pub fn remove(&self, symbol: &str) -> bool {
        self.slots.remove(symbol).is_some()
    }

    pub fn history_config(&self) -> HistoryConfig {
        self.history
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
