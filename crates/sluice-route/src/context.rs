//! Per-run state: the active channel, transaction progress and timing statistics

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::{Channel, Data};

/// Named timing counters accumulated over a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    /// Time spent executing the select
    QueryTime,
    /// Time spent mapping rows that were new
    ReadTime,
    /// Time spent on rows that had already been routed
    RereadTime,
    /// Time spent handing batches to the queue
    EnqueueTime,
}

impl Stat {
    /// Counter name as reported in logs and summaries
    pub const fn name(self) -> &'static str {
        match self {
            Self::QueryTime => "query_time_ms",
            Self::ReadTime => "read_time_ms",
            Self::RereadTime => "reread_time_ms",
            Self::EnqueueTime => "enqueue_time_ms",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time copy of the router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total select execution time (milliseconds)
    pub query_time_ms: u64,
    /// Total mapping time for new rows (milliseconds)
    pub read_time_ms: u64,
    /// Total time spent on re-read rows (milliseconds)
    pub reread_time_ms: u64,
    /// Total enqueue time (milliseconds)
    pub enqueue_time_ms: u64,
    /// Rows mapped into data records
    pub rows_read: u64,
    /// Rows skipped as already routed
    pub rows_reread: u64,
}

impl StatsSnapshot {
    /// Value of a named timing counter
    pub fn get(&self, stat: Stat) -> u64 {
        match stat {
            Stat::QueryTime => self.query_time_ms,
            Stat::ReadTime => self.read_time_ms,
            Stat::RereadTime => self.reread_time_ms,
            Stat::EnqueueTime => self.enqueue_time_ms,
        }
    }
}

/// Atomic router statistics
///
/// Counters only ever grow. They are atomics so that a snapshot can be taken
/// from another thread while the reader is still running.
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct RouterStats {
    pub query_time_ms: AtomicU64,
    pub read_time_ms: AtomicU64,
    pub reread_time_ms: AtomicU64,
    pub enqueue_time_ms: AtomicU64,
    pub rows_read: AtomicU64,
    pub rows_reread: AtomicU64,
}

impl RouterStats {
    fn counter(&self, stat: Stat) -> &AtomicU64 {
        match stat {
            Stat::QueryTime => &self.query_time_ms,
            Stat::ReadTime => &self.read_time_ms,
            Stat::RereadTime => &self.reread_time_ms,
            Stat::EnqueueTime => &self.enqueue_time_ms,
        }
    }

    /// Add elapsed milliseconds to a counter
    pub fn add(&self, stat: Stat, elapsed_ms: u64) {
        self.counter(stat).fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    /// Count one mapped row
    pub fn record_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one skipped re-read row
    pub fn record_reread(&self) {
        self.rows_reread.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            query_time_ms: self.query_time_ms.load(Ordering::Relaxed),
            read_time_ms: self.read_time_ms.load(Ordering::Relaxed),
            reread_time_ms: self.reread_time_ms.load(Ordering::Relaxed),
            enqueue_time_ms: self.enqueue_time_ms.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_reread: self.rows_reread.load(Ordering::Relaxed),
        }
    }
}

/// State owned by one reader run
#[derive(Debug)]
pub struct RunContext {
    channel: Channel,
    last_data_ids: HashMap<String, i64>,
    stats: Arc<RouterStats>,
}

impl RunContext {
    /// Start a run for a channel
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            last_data_ids: HashMap::new(),
            stats: Arc::new(RouterStats::default()),
        }
    }

    /// Channel being read
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Remember `data` as the latest change seen for its transaction.
    /// Records without a transaction id are ignored.
    pub fn record_last_data_id(&mut self, data: &Data) {
        if let Some(tx) = &data.transaction_id {
            self.last_data_ids.insert(tx.clone(), data.data_id);
        }
    }

    /// Latest data id seen for a transaction
    pub fn last_data_id(&self, transaction_id: &str) -> Option<i64> {
        self.last_data_ids.get(transaction_id).copied()
    }

    /// All transactions seen so far with their latest data id
    pub fn last_data_ids(&self) -> &HashMap<String, i64> {
        &self.last_data_ids
    }

    /// Add elapsed milliseconds to a timing counter
    pub fn add_stat(&self, stat: Stat, elapsed_ms: u64) {
        self.stats.add(stat, elapsed_ms);
    }

    /// Shared handle to the statistics, readable from other threads
    pub fn stats(&self) -> Arc<RouterStats> {
        Arc::clone(&self.stats)
    }
}
