//! The data-to-route reader
//!
//! A reader makes one pass over the rows that still need routing for a channel
//! and hands them to consumers through a [`BoundedQueue`]:
//!
//! ```text
//!  Idle ──► Querying(primary) ──► Streaming ──► Draining ──► Terminated
//!                │ malformed query                              ▲
//!                ▼                                              │
//!          Querying(fallback) ──► Streaming ──► Draining ───────┘
//! ```
//!
//! Any other failure ends the run. Whatever happens, the run finishes by
//! publishing [`QueueItem::EndOfStream`] so consumers learn that nothing more
//! is coming.
//!
//! ```rust,ignore
//! let reader = DataToRouteReader::new(source, config, strategy, context, mapper)?;
//! let handle = reader.handle();
//! let run = tokio::spawn(reader.run());
//!
//! tokio::task::spawn_blocking(move || {
//!     while let Some(data) = handle.take() {
//!         route(data);
//!     }
//! });
//! let summary = run.await?;
//! ```

use parking_lot::RwLock;
use sluice_rdbc::connection::{Connection, DataSource, PreparedStatement};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ReaderConfig;
use crate::context::{RunContext, Stat, StatsSnapshot};
use crate::error::{Error, Result};
use crate::mapper::RowMapper;
use crate::model::Data;
use crate::queue::{BoundedQueue, QueueItem, Take};
use crate::strategy::{QueryShape, QueryStrategy, RouteStatement};

/// Lifecycle of a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Created, not yet run
    Idle,
    /// Preparing and executing a select
    Querying(QueryShape),
    /// Iterating the result
    Streaming,
    /// Flushing the last batch and releasing the connection
    Draining,
    /// Done for good
    Terminated,
}

/// How many more rows may be buffered before the batch goes to the queue
///
/// The budget starts at the free space in the queue, so the reader never holds
/// more than one queue's worth of unflushed rows and adapts to how quickly
/// consumers drain.
#[derive(Debug)]
pub(crate) struct FlushBudget {
    capacity: usize,
    remaining: usize,
}

impl FlushBudget {
    pub(crate) fn new(capacity: usize, queued: usize) -> Self {
        Self {
            capacity,
            remaining: capacity.saturating_sub(queued),
        }
    }

    /// Account for one buffered item; true when the batch must be flushed now
    pub(crate) fn consume(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub(crate) fn reset(&mut self, queued: usize) {
        self.remaining = self.capacity.saturating_sub(queued);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Consumer-side view of a reader, cheap to clone across threads
#[derive(Clone)]
pub struct ReaderHandle {
    queue: Arc<BoundedQueue>,
    reading: Arc<AtomicBool>,
    state: Arc<RwLock<ReaderState>>,
    take_timeout: Duration,
}

impl ReaderHandle {
    /// Block until the next record arrives.
    ///
    /// `None` means either the end of the stream or that nothing arrived within
    /// the take timeout; use [`ReaderHandle::poll_next`] to tell them apart.
    pub fn take(&self) -> Option<Data> {
        self.poll_next().into_data()
    }

    /// Block up to the take timeout for the next item
    pub fn poll_next(&self) -> Take {
        self.poll_next_timeout(self.take_timeout)
    }

    /// Block up to `timeout` for the next item
    pub fn poll_next_timeout(&self, timeout: Duration) -> Take {
        match self.queue.poll(timeout) {
            Some(QueueItem::Data(data)) => Take::Data(data),
            Some(QueueItem::EndOfStream) => Take::EndOfStream,
            None => Take::TimedOut,
        }
    }

    /// Whether the reader is still producing
    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }

    /// Ask the reader to stop (`false`); it notices at the next row or retry
    pub fn set_reading(&self, reading: bool) {
        self.reading.store(reading, Ordering::Release);
    }

    /// The handoff queue
    pub fn queue(&self) -> &Arc<BoundedQueue> {
        &self.queue
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        *self.state.read()
    }

    /// How long [`ReaderHandle::take`] waits
    pub fn take_timeout(&self) -> Duration {
        self.take_timeout
    }
}

/// What a finished run leaves behind
#[derive(Debug)]
pub struct RunSummary {
    /// The run's context, with per-transaction progress and statistics
    pub context: RunContext,
    /// Data records handed to the queue or the in-memory batch
    pub data_count: u64,
    /// The primary select was rejected and the fallback ran
    pub used_fallback: bool,
    /// A pass streamed its whole result without error
    pub completed: bool,
    /// The end-of-stream marker made it onto the queue
    pub end_of_stream_published: bool,
}

impl RunSummary {
    /// Statistics at the end of the run
    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats().snapshot()
    }
}

/// Reads pending change rows for one channel into a bounded queue
pub struct DataToRouteReader {
    data_source: Arc<dyn DataSource>,
    config: ReaderConfig,
    strategy: Arc<dyn QueryStrategy>,
    mapper: Arc<dyn RowMapper>,
    context: RunContext,
    handle: ReaderHandle,
    data_count: u64,
}

impl DataToRouteReader {
    /// Create a reader; fails when the configuration is invalid
    pub fn new(
        data_source: Arc<dyn DataSource>,
        config: ReaderConfig,
        strategy: Arc<dyn QueryStrategy>,
        context: RunContext,
        mapper: Arc<dyn RowMapper>,
    ) -> Result<Self> {
        config.check()?;
        let handle = ReaderHandle {
            queue: Arc::new(BoundedQueue::new(config.max_queue_size)),
            reading: Arc::new(AtomicBool::new(true)),
            state: Arc::new(RwLock::new(ReaderState::Idle)),
            take_timeout: config.take_timeout(),
        };
        Ok(Self {
            data_source,
            config,
            strategy,
            mapper,
            context,
            handle,
            data_count: 0,
        })
    }

    /// Handle for consumers and operators
    pub fn handle(&self) -> ReaderHandle {
        self.handle.clone()
    }

    /// See [`ReaderHandle::take`]
    pub fn take(&self) -> Option<Data> {
        self.handle.take()
    }

    /// Whether the reader is still producing
    pub fn is_reading(&self) -> bool {
        self.handle.is_reading()
    }

    /// See [`ReaderHandle::set_reading`]
    pub fn set_reading(&self, reading: bool) {
        self.handle.set_reading(reading);
    }

    /// The handoff queue
    pub fn queue(&self) -> &Arc<BoundedQueue> {
        self.handle.queue()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        self.handle.state()
    }

    /// Make the single pass of this reader.
    ///
    /// Errors never escape: they are logged, and consumers only ever see the
    /// end-of-stream marker.
    pub async fn run(mut self) -> RunSummary {
        let channel_id = self.context.channel().channel_id.clone();
        let mut used_fallback = false;

        let primary = self.execute(QueryShape::Primary).await;
        let result = match primary {
            Err(e) if e.is_malformed_query() => {
                error!(
                    channel = %channel_id,
                    error = %e,
                    "Primary select to route data was rejected, retrying with the fallback select"
                );
                used_fallback = true;
                self.execute(QueryShape::Fallback).await
            }
            other => other,
        };

        let completed = match result {
            Ok(count) => {
                debug!(channel = %channel_id, rows = count, "Finished reading data to route");
                true
            }
            Err(e) => {
                error!(channel = %channel_id, error = %e, "Failed to read data to route");
                false
            }
        };

        let end_of_stream_published = self.publish_end_of_stream().await;
        if !end_of_stream_published {
            warn!(
                channel = %channel_id,
                "Reader stopped before the end-of-stream marker could be queued"
            );
        }
        self.handle.set_reading(false);
        self.set_state(ReaderState::Terminated);

        let stats = self.context.stats().snapshot();
        info!(
            channel = %channel_id,
            data = self.data_count,
            rereads = stats.rows_reread,
            query_time_ms = stats.query_time_ms,
            read_time_ms = stats.read_time_ms,
            reread_time_ms = stats.reread_time_ms,
            enqueue_time_ms = stats.enqueue_time_ms,
            fallback = used_fallback,
            "Data to route reader terminated"
        );

        RunSummary {
            context: self.context,
            data_count: self.data_count,
            used_fallback,
            completed,
            end_of_stream_published,
        }
    }

    fn set_state(&self, state: ReaderState) {
        *self.handle.state.write() = state;
        debug!(channel = %self.context.channel().channel_id, ?state, "Reader state changed");
    }

    /// One pass with the given statement shape on a dedicated connection
    async fn execute(&mut self, shape: QueryShape) -> Result<u64> {
        self.set_state(ReaderState::Querying(shape));

        let conn = self.data_source.connection().await?;
        let auto_commit = conn.auto_commit();
        if let Err(e) = conn.set_auto_commit(false).await {
            self.close_connection(conn.as_ref()).await;
            return Err(e.into());
        }

        let mut statement = None;
        let outcome = self.stream(shape, conn.as_ref(), &mut statement).await;
        let released = self.release(conn.as_ref(), statement, auto_commit).await;
        self.close_connection(conn.as_ref()).await;

        match (outcome, released) {
            (Ok(count), Ok(())) => Ok(count),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!(error = %release_error, "Failed to release reader resources");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn close_connection(&self, conn: &dyn Connection) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Failed to close reader connection");
        }
    }

    /// Execute the select and move its rows into the queue
    async fn stream(
        &mut self,
        shape: QueryShape,
        conn: &dyn Connection,
        slot: &mut Option<Box<dyn PreparedStatement>>,
    ) -> Result<u64> {
        let RouteStatement { statement, params } =
            self.strategy.prepare(shape, conn, &self.context).await?;
        let statement = slot.insert(statement);

        let started = Instant::now();
        let query = statement.query_stream(&params, self.config.fetch_size);
        let mut rows = match self.config.query_timeout() {
            Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| {
                sluice_rdbc::Error::timeout(format!("select did not finish within {:?}", limit))
            })??,
            None => query.await?,
        };
        let elapsed = started.elapsed();
        self.context.add_stat(Stat::QueryTime, millis(elapsed));
        if elapsed > self.config.long_operation_threshold() {
            warn!(
                channel = %self.context.channel().channel_id,
                elapsed_ms = millis(elapsed),
                "Selected data to route in {}ms",
                millis(elapsed)
            );
        }

        self.set_state(ReaderState::Streaming);
        let stats = self.context.stats();
        let queue = Arc::clone(&self.handle.queue);
        let mut budget = FlushBudget::new(queue.capacity(), queue.len());
        let mut batch = VecDeque::with_capacity(budget.remaining());
        let mut count = 0;

        let mut ts = Instant::now();
        while self.is_reading() {
            let Some(row) = rows.next().await? else {
                break;
            };

            let routed = match row.is_blank(&self.config.marker_column) {
                Some(blank) => !blank,
                None => {
                    return Err(Error::config(format!(
                        "select does not return the marker column '{}'",
                        self.config.marker_column
                    )))
                }
            };

            if !routed {
                let data = self.mapper.map(&row)?;
                self.context.record_last_data_id(&data);
                batch.push_back(QueueItem::Data(data));
                count += 1;
                self.data_count += 1;
                stats.record_read();
                self.context.add_stat(Stat::ReadTime, millis(ts.elapsed()));

                if budget.consume() {
                    let flush_started = Instant::now();
                    self.copy_to_queue(&mut batch).await;
                    budget.reset(queue.len());
                    self.context
                        .add_stat(Stat::EnqueueTime, millis(flush_started.elapsed()));
                }
            } else {
                stats.record_reread();
                self.context.add_stat(Stat::RereadTime, millis(ts.elapsed()));
            }

            ts = Instant::now();
        }
        drop(rows);

        self.set_state(ReaderState::Draining);
        let flush_started = Instant::now();
        self.copy_to_queue(&mut batch).await;
        self.context
            .add_stat(Stat::EnqueueTime, millis(flush_started.elapsed()));

        Ok(count)
    }

    /// Drain `batch` into the queue, waiting out a full queue.
    /// Stops early, dropping the rest, once reading is switched off.
    async fn copy_to_queue(&self, batch: &mut VecDeque<QueueItem>) {
        while self.is_reading() {
            let Some(item) = batch.pop_front() else {
                return;
            };
            if let Err(item) = self.handle.queue.try_push(item) {
                batch.push_front(item);
                tokio::time::sleep(self.config.retry_backoff()).await;
            }
        }
        if !batch.is_empty() {
            debug!(dropped = batch.len(), "Reader stopped with records still batched");
            batch.clear();
        }
    }

    /// Close the statement, end the read transaction and restore auto-commit.
    /// Every step runs; the first failure is reported.
    async fn release(
        &self,
        conn: &dyn Connection,
        statement: Option<Box<dyn PreparedStatement>>,
        auto_commit: bool,
    ) -> Result<()> {
        let closed = match statement {
            Some(statement) => statement.close().await,
            None => Ok(()),
        };
        let committed = conn.commit().await;
        let restored = conn.set_auto_commit(auto_commit).await;

        closed?;
        committed?;
        restored?;
        Ok(())
    }

    /// Queue the end marker, retrying while the queue is full and reading is on.
    /// At least one attempt is always made.
    async fn publish_end_of_stream(&self) -> bool {
        loop {
            if self.handle.queue.try_push(QueueItem::EndOfStream).is_ok() {
                return true;
            }
            if !self.is_reading() {
                return false;
            }
            tokio::time::sleep(self.config.retry_backoff()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_budget_fills_free_space() {
        let mut budget = FlushBudget::new(3, 0);

        assert!(!budget.consume());
        assert!(!budget.consume());
        assert!(budget.consume());

        // consumers drained everything: a fresh cycle of three
        budget.reset(0);
        assert_eq!(budget.remaining(), 3);
        assert!(!budget.consume());
        assert!(!budget.consume());
        assert_eq!(budget.remaining(), 1);
    }

    #[test]
    fn test_flush_budget_after_partial_drain() {
        let mut budget = FlushBudget::new(3, 0);
        assert!(!budget.consume());
        assert!(!budget.consume());
        assert!(budget.consume());

        // one record still queued: the next cycle flushes after two
        budget.reset(1);
        assert_eq!(budget.remaining(), 2);
        assert!(!budget.consume());
        assert!(budget.consume());
    }

    #[test]
    fn test_flush_budget_adapts_to_queue_occupancy() {
        let mut budget = FlushBudget::new(5, 4);
        assert_eq!(budget.remaining(), 1);
        assert!(budget.consume());

        // full queue: every item is flushed on its own
        budget.reset(5);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.consume());
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(Duration::from_micros(2500)), 2);
        assert_eq!(millis(Duration::from_secs(1)), 1000);
    }
}
