//! PostgreSQL backend implementation for sluice-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection with emulated auto-commit control
//! - Prepared statements whose results stream through a server-side cursor
//! - SQLSTATE-based error classification

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{ToSql, Type};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, RowStream, VecRowStream,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

static CURSOR_SEQ: AtomicU64 = AtomicU64::new(0);

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Json(j) => Box::new(j.clone()),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn get_opt<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a PostgreSQL value to a Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    let value = match *pg_type {
        Type::BOOL => get_opt::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get_opt::<i16>(row, idx).map(Value::Int16),
        Type::INT4 => get_opt::<i32>(row, idx).map(Value::Int32),
        Type::INT8 => get_opt::<i64>(row, idx).map(Value::Int64),
        Type::FLOAT8 => get_opt::<f64>(row, idx).map(Value::Float64),
        Type::FLOAT4 => get_opt::<f32>(row, idx).map(|f| Value::Float64(f64::from(f))),
        Type::BYTEA => get_opt::<Vec<u8>>(row, idx).map(Value::Bytes),
        Type::TIMESTAMP => get_opt::<chrono::NaiveDateTime>(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => {
            get_opt::<chrono::DateTime<chrono::Utc>>(row, idx).map(Value::DateTimeTz)
        }
        Type::JSON | Type::JSONB => get_opt::<serde_json::Value>(row, idx).map(Value::Json),
        // VARCHAR, TEXT, BPCHAR, NAME and anything text-like
        _ => get_opt::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Map a driver error, classifying it by SQLSTATE
fn pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    if err.is_closed() {
        return Error::connection_with_source("connection closed", err);
    }
    match err.as_db_error() {
        Some(db) => Error::from_sqlstate(db.message(), Some(sql), Some(db.code().code())),
        None => Error::from_sqlstate(err.to_string(), Some(sql), err.code().map(|c| c.code())),
    }
}

fn boxed_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params.iter().map(value_to_sql).collect()
}

fn param_refs(boxed: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Auto-commit bookkeeping shared between a connection and its statements
#[derive(Debug)]
struct SessionState {
    auto_commit: AtomicBool,
    in_transaction: AtomicBool,
}

impl SessionState {
    async fn ensure_transaction(&self, client: &tokio_postgres::Client) -> Result<()> {
        if self.auto_commit.load(Ordering::Acquire) || self.in_transaction.load(Ordering::Acquire)
        {
            return Ok(());
        }
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::Transaction {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;
        self.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    async fn finish(&self, client: &tokio_postgres::Client, command: &str) -> Result<()> {
        if !self.in_transaction.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        client
            .batch_execute(command)
            .await
            .map_err(|e| Error::Transaction {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    session: Arc<SessionState>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            session: Arc::new(SessionState {
                auto_commit: AtomicBool::new(true),
                in_transaction: AtomicBool::new(false),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    fn auto_commit(&self) -> bool {
        self.session.auto_commit.load(Ordering::Acquire)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.check_open()?;
        if auto_commit {
            self.session.finish(&self.client, "COMMIT").await?;
        }
        self.session.auto_commit.store(auto_commit, Ordering::Release);
        Ok(())
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.check_open()?;

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| pg_error(e, sql))?;

        Ok(Box::new(PgPreparedStatement {
            client: Arc::clone(&self.client),
            session: Arc::clone(&self.session),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.check_open()?;
        self.session.finish(&self.client, "COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.check_open()?;
        self.session.finish(&self.client, "ROLLBACK").await
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Arc<tokio_postgres::Client>,
    session: Arc<SessionState>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    async fn query_stream(
        &self,
        params: &[Value],
        fetch_size: u32,
    ) -> Result<Pin<Box<dyn RowStream>>> {
        let boxed = boxed_params(params);
        let refs = param_refs(&boxed);

        // Cursors only live inside a transaction block.
        if fetch_size == 0 || self.session.auto_commit.load(Ordering::Acquire) {
            let rows = self
                .client
                .query(&self.statement, &refs)
                .await
                .map_err(|e| pg_error(e, &self.sql))?;
            return Ok(Box::pin(VecRowStream::new(
                rows.iter().map(pg_row_to_row).collect(),
            )));
        }

        self.session.ensure_transaction(&self.client).await?;

        let cursor = format!(
            "sluice_cursor_{}",
            CURSOR_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let declare = format!("DECLARE {} NO SCROLL CURSOR FOR {}", cursor, self.sql);
        self.client
            .execute(declare.as_str(), &refs)
            .await
            .map_err(|e| pg_error(e, &self.sql))?;

        Ok(Box::pin(PgCursorStream {
            client: Arc::clone(&self.client),
            fetch: format!("FETCH {} FROM {}", fetch_size, cursor),
            fetch_size: fetch_size as usize,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        // The server-side statement is deallocated when the last handle drops.
        Ok(())
    }
}

/// Row stream pulling `fetch_size` rows per round trip from a cursor
struct PgCursorStream {
    client: Arc<tokio_postgres::Client>,
    fetch: String,
    fetch_size: usize,
    buffer: VecDeque<Row>,
    exhausted: bool,
}

impl RowStream for PgCursorStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }

            let rows = self
                .client
                .query(self.fetch.as_str(), &[])
                .await
                .map_err(|e| pg_error(e, &self.fetch))?;
            if rows.len() < self.fetch_size {
                self.exhausted = true;
            }
            self.buffer.extend(rows.iter().map(pg_row_to_row));
            Ok(self.buffer.pop_front())
        })
    }
}

/// Apply extra connection properties; unknown keys are rejected
fn apply_properties(
    pg_config: &mut tokio_postgres::Config,
    properties: &HashMap<String, String>,
) -> Result<()> {
    for (key, value) in properties {
        match key.as_str() {
            "user" => {
                pg_config.user(value);
            }
            "password" => {
                pg_config.password(value);
            }
            "dbname" => {
                pg_config.dbname(value);
            }
            "options" => {
                pg_config.options(value);
            }
            "application_name" => {
                pg_config.application_name(value);
            }
            "sslmode" => {
                let mode = match value.as_str() {
                    "disable" => SslMode::Disable,
                    "prefer" => SslMode::Prefer,
                    "require" => SslMode::Require,
                    other => {
                        return Err(Error::config(format!("unsupported sslmode '{}'", other)))
                    }
                };
                pg_config.ssl_mode(mode);
            }
            "keepalives" => {
                let enabled = value.parse::<bool>().map_err(|_| {
                    Error::config(format!("keepalives must be true or false, got '{}'", value))
                })?;
                pg_config.keepalives(enabled);
            }
            other => {
                return Err(Error::config(format!(
                    "unsupported connection property '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// PostgreSQL connection factory
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::config(format!("invalid connection url: {}", e)))?;
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        apply_properties(&mut pg_config, &config.properties)?;

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }
}

/// Connect with just a URL
pub async fn connect(url: &str) -> Result<Box<dyn Connection>> {
    PgConnectionFactory
        .connect(&ConnectionConfig::new(url))
        .await
}
