//! Scripted in-memory database for reader tests
//!
//! Each prepared statement is matched against a list of `(needle, Script)`
//! pairs; the first script whose needle appears in the SQL decides what the
//! statement returns. Everything the reader does to the connection is
//! recorded in a shared [`Journal`].

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_rdbc::connection::{Connection, DataSource, PreparedStatement, RowStream};
use sluice_rdbc::{Error, Result, Row, Value};
use sluice_route::prelude::*;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PRIMARY_SQL: &str = "SELECT d.data_id, d.table_name, d.event_type, d.row_data, \
     d.pk_data, d.old_data, d.transaction_id, d.channel_id, d.create_time, e.data_id AS route_marker \
     FROM sym_data d /* primary */";

pub const FALLBACK_SQL: &str = "SELECT d.data_id, d.table_name, d.event_type, d.row_data, \
     d.pk_data, d.old_data, d.transaction_id, d.channel_id, d.create_time, e.data_id AS route_marker \
     FROM sym_data d /* fallback */";

/// What a statement does when executed
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these rows
    Rows(Vec<Row>),
    /// Stream these rows, pausing before each one
    Throttled(Vec<Row>, Duration),
    /// Answer only after a delay, then stream these rows
    Delayed(Vec<Row>, Duration),
    /// Stream these rows, then lose the connection
    BreakAfter(Vec<Row>),
    /// Reject the statement as malformed
    Reject,
    /// Fail with a connection error
    Fail,
    /// Never answer
    Hang,
}

/// Everything the reader did to the database
#[derive(Debug, Default)]
pub struct Journal {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub prepared: Vec<String>,
    pub params: Vec<Vec<Value>>,
    pub fetch_sizes: Vec<u32>,
    pub auto_commit_changes: Vec<bool>,
    pub commits: usize,
    pub statements_closed: usize,
}

pub struct ScriptedDatabase {
    scripts: Arc<Vec<(String, Script)>>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedDatabase {
    pub fn new(primary: Script, fallback: Script) -> Self {
        Self {
            scripts: Arc::new(vec![
                ("/* primary */".to_string(), primary),
                ("/* fallback */".to_string(), fallback),
            ]),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl DataSource for ScriptedDatabase {
    async fn connection(&self) -> Result<Box<dyn Connection>> {
        self.journal.lock().connections_opened += 1;
        Ok(Box::new(ScriptedConnection {
            scripts: Arc::clone(&self.scripts),
            journal: Arc::clone(&self.journal),
            auto_commit: AtomicBool::new(true),
        }))
    }
}

struct ScriptedConnection {
    scripts: Arc<Vec<(String, Script)>>,
    journal: Arc<Mutex<Journal>>,
    auto_commit: AtomicBool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        self.journal.lock().auto_commit_changes.push(auto_commit);
        Ok(())
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.journal.lock().prepared.push(sql.to_string());
        let script = self
            .scripts
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, script)| script.clone());
        Ok(Box::new(ScriptedStatement {
            sql: sql.to_string(),
            script,
            journal: Arc::clone(&self.journal),
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.journal.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.journal.lock().connections_closed += 1;
        Ok(())
    }
}

struct ScriptedStatement {
    sql: String,
    script: Option<Script>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl PreparedStatement for ScriptedStatement {
    async fn query_stream(
        &self,
        params: &[Value],
        fetch_size: u32,
    ) -> Result<Pin<Box<dyn RowStream>>> {
        {
            let mut journal = self.journal.lock();
            journal.params.push(params.to_vec());
            journal.fetch_sizes.push(fetch_size);
        }

        let stream = match self.script.clone() {
            Some(Script::Rows(rows)) => ScriptedStream::new(rows, None, false),
            Some(Script::Throttled(rows, pause)) => ScriptedStream::new(rows, Some(pause), false),
            Some(Script::Delayed(rows, delay)) => {
                tokio::time::sleep(delay).await;
                ScriptedStream::new(rows, None, false)
            }
            Some(Script::BreakAfter(rows)) => ScriptedStream::new(rows, None, true),
            Some(Script::Reject) => {
                return Err(Error::bad_grammar(
                    "syntax error at or near \"GAP\"",
                    "42601",
                ))
            }
            Some(Script::Fail) => return Err(Error::connection("connection refused")),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ScriptedStream::new(Vec::new(), None, false)
            }
            None => return Err(Error::query_with_sql("no script", &self.sql)),
        };
        Ok(Box::pin(stream))
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        self.journal.lock().statements_closed += 1;
        Ok(())
    }
}

struct ScriptedStream {
    rows: VecDeque<Row>,
    pause: Option<Duration>,
    break_at_end: bool,
}

impl ScriptedStream {
    fn new(rows: Vec<Row>, pause: Option<Duration>, break_at_end: bool) -> Self {
        Self {
            rows: rows.into(),
            pause,
            break_at_end,
        }
    }
}

impl RowStream for ScriptedStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            if let Some(pause) = self.pause {
                tokio::time::sleep(pause).await;
            }
            match self.rows.pop_front() {
                Some(row) => Ok(Some(row)),
                None if self.break_at_end => Err(Error::connection("connection reset by peer")),
                None => Ok(None),
            }
        })
    }
}

fn row(data_id: i64, event_type: &str, marker: Value) -> Row {
    Row::from_pairs([
        ("data_id", Value::Int64(data_id)),
        ("table_name", Value::from("item")),
        ("event_type", Value::from(event_type)),
        ("row_data", Value::from(format!("\"{}\",\"widget\"", data_id))),
        ("pk_data", Value::from(format!("\"{}\"", data_id))),
        ("old_data", Value::Null),
        ("transaction_id", Value::from(format!("tx-{}", data_id % 2))),
        ("channel_id", Value::from("default")),
        ("create_time", Value::Null),
        ("route_marker", marker),
    ])
}

/// A change that still needs routing
pub fn new_row(data_id: i64) -> Row {
    row(data_id, "I", Value::Null)
}

/// A change that already has a data event
pub fn routed_row(data_id: i64) -> Row {
    row(data_id, "I", Value::Int64(data_id))
}

/// A change whose event type cannot be parsed
pub fn garbled_row(data_id: i64) -> Row {
    row(data_id, "?", Value::Null)
}

pub fn new_rows(ids: std::ops::RangeInclusive<i64>) -> Vec<Row> {
    ids.map(new_row).collect()
}

pub fn config(capacity: usize) -> ReaderConfig {
    ReaderConfig::new()
        .with_max_queue_size(capacity)
        .with_query_timeout_secs(5)
        .with_retry_backoff_ms(5)
}

pub fn reader(db: ScriptedDatabase, config: ReaderConfig, channel: Channel) -> DataToRouteReader {
    let templates = StaticSqlTemplates::new()
        .with_template(SELECT_DATA_TO_ROUTE, PRIMARY_SQL)
        .with_template(SELECT_DATA_TO_ROUTE_FALLBACK, FALLBACK_SQL);
    DataToRouteReader::new(
        Arc::new(db),
        config,
        Arc::new(TemplateQueryStrategy::new(Arc::new(templates))),
        RunContext::new(channel),
        Arc::new(ColumnRowMapper),
    )
    .expect("valid reader config")
}

/// Pull until the end marker (true) or a 5 second silence (false)
pub fn drain(handle: &ReaderHandle) -> (Vec<i64>, bool) {
    let mut ids = Vec::new();
    loop {
        match handle.poll_next_timeout(Duration::from_secs(5)) {
            Take::Data(data) => ids.push(data.data_id),
            Take::EndOfStream => return (ids, true),
            Take::TimedOut => return (ids, false),
        }
    }
}

/// Drain on a blocking thread while the reader runs
pub async fn run_and_drain(reader: DataToRouteReader) -> (RunSummary, Vec<i64>, bool) {
    let handle = reader.handle();
    let consumer = tokio::task::spawn_blocking(move || drain(&handle));
    let summary = reader.run().await;
    let (ids, ended) = consumer.await.expect("consumer panicked");
    (summary, ids, ended)
}
