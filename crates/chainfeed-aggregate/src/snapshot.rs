//! Per-network aggregation state and the snapshot handed to subscribers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// One pending transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub hash: String,
    /// `None` when the feed sent a malformed value.
    pub value: Option<i64>,
}

/// Batched view delivered to every subscriber on broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// network → transactions received since the previous broadcast, in
    /// arrival order.
    pub transactions: BTreeMap<String, Vec<TransactionEntry>>,
    /// network → throughput samples, newest first.
    pub tps: BTreeMap<String, Vec<u64>>,
    /// Seconds covered by one throughput sample.
    pub interval_secs: u64,
}

impl Snapshot {
    /// Total pending transactions across networks.
    pub fn transaction_count(&self) -> usize {
        self.transactions.values().map(Vec::len).sum()
    }
}

/// Transactions pending broadcast. A hash is recorded at most once between
/// clears; the first value seen wins.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<TransactionEntry>,
    seen: HashSet<String>,
}

impl Ledger {
    /// Returns `true` if `hash` was new.
    pub fn insert(&mut self, hash: &str, value: Option<i64>) -> bool {
        if !self.seen.insert(hash.to_string()) {
            return false;
        }
        self.entries.push(TransactionEntry {
            hash: hash.to_string(),
            value,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry and forget the seen hashes.
    pub fn take(&mut self) -> Vec<TransactionEntry> {
        self.seen.clear();
        std::mem::take(&mut self.entries)
    }
}

/// Bounded newest-first sequence of throughput samples.
#[derive(Debug)]
pub struct ThroughputWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl ThroughputWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: u64) {
        self.samples.push_front(sample);
        self.samples.truncate(self.capacity);
    }

    pub fn samples(&self) -> Vec<u64> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Everything the engine tracks for one network.
#[derive(Debug)]
pub struct NetworkState {
    pub ledger: Ledger,
    /// Distinct transactions since the last sample.
    pub counter: u64,
    pub window: ThroughputWindow,
}

impl NetworkState {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            ledger: Ledger::default(),
            counter: 0,
            window: ThroughputWindow::new(window_capacity),
        }
    }

    /// Record a transaction. Duplicates within the current batch are ignored
    /// and do not count towards throughput.
    pub fn record(&mut self, hash: &str, value: Option<i64>) -> bool {
        let fresh = self.ledger.insert(hash, value);
        if fresh {
            self.counter += 1;
        }
        fresh
    }

    /// Push the running counter into the window and reset it.
    pub fn sample(&mut self) {
        self.window.push(self.counter);
        self.counter = 0;
    }
}
