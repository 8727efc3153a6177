//! Shared SQLite connection.
//!
//! One connection is opened at startup and released at shutdown. Calls are
//! serialized through a mutex and run on the blocking pool, so handlers can
//! await them without stalling the runtime.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, Stream};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::sql::error::SqlError;

/// One result row, keyed by column name.
pub type Record = Map<String, JsonValue>;

/// Rows buffered between the blocking reader and an async consumer.
const STREAM_BUFFER: usize = 32;

/// Effect of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSummary {
    pub changes: usize,
    pub last_insert_rowid: i64,
}

/// Handle to the shared connection. Clones share the same connection.
#[derive(Debug, Clone)]
pub struct SqlClient {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqlClient {
    /// Open a database file, or an in-memory database for `:memory:`.
    pub fn open(path: &str) -> Result<Self, SqlError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        tracing::info!(path = %path, "Database connection acquired");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Release the connection. Later calls fail with [`SqlError::Closed`].
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<(), SqlError> {
        let conn = lock(&self.conn).take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, err)| SqlError::Query(err))?;
            tracing::info!("Database connection released");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.conn).is_some()
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T, SqlError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SqlError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            let conn = guard.as_mut().ok_or(SqlError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|err| SqlError::Join(err.to_string()))?
    }

    /// Run a statement. Statements with result columns return their rows;
    /// anything else is executed and returns no rows.
    pub fn query(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Vec<Record>, SqlError>> + Send + 'static {
        let span = tracing::debug_span!("sql.query", sql = %sql);
        let sql = sql.to_string();
        let client = self.clone();
        async move {
            client
                .with_connection(move |conn| Ok(run_query(conn, &sql, &params)?))
                .await
        }
        .instrument(span)
    }

    /// Run a query and decode each row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<T>, SqlError> {
        self.query(sql, params)
            .await?
            .into_iter()
            .map(decode_record)
            .collect()
    }

    /// Execute a statement that returns no rows.
    pub fn execute(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<ExecSummary, SqlError>> + Send + 'static {
        let span = tracing::debug_span!("sql.execute", sql = %sql);
        let sql = sql.to_string();
        let client = self.clone();
        async move {
            client
                .with_connection(move |conn| Ok(run_execute(conn, &sql, &params)?))
                .await
        }
        .instrument(span)
    }

    /// Stream rows lazily.
    ///
    /// Rows are read on the blocking pool and handed over through a bounded
    /// channel. Reading stops when the stream is dropped or `cancel` fires.
    /// The connection stays locked until the reader stops.
    pub fn stream(
        &self,
        sql: &str,
        params: Vec<Value>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Record, SqlError>> + Send + 'static {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let span = tracing::debug_span!("sql.stream", sql = %sql);

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let guard = lock(&conn);
            let Some(conn) = guard.as_ref() else {
                let _ = tx.blocking_send(Err(SqlError::Closed));
                return;
            };
            if let Err(err) = stream_rows(conn, &sql, &params, &tx, &cancel) {
                let _ = tx.blocking_send(Err(err.into()));
            }
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T, SqlError>
    where
        F: FnOnce(&SqlTx<'_>) -> Result<T, SqlError> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let result = f(&SqlTx { conn: &tx, depth: 0 });
            match result {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(err) => {
                    // Dropping the transaction rolls it back.
                    drop(tx);
                    tracing::debug!(error = %err, "Transaction rolled back");
                    Err(err)
                }
            }
        })
        .instrument(tracing::debug_span!("sql.transaction"))
        .await
    }
}

/// Statements run inside [`SqlClient::with_transaction`].
pub struct SqlTx<'c> {
    conn: &'c Connection,
    depth: u32,
}

impl SqlTx<'_> {
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, SqlError> {
        Ok(run_query(self.conn, sql, params)?)
    }

    pub fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<T>, SqlError> {
        self.query(sql, params)?
            .into_iter()
            .map(decode_record)
            .collect()
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecSummary, SqlError> {
        Ok(run_execute(self.conn, sql, params)?)
    }

    /// Run `f` inside a nested savepoint. Only the savepoint is rolled back
    /// when `f` fails; the enclosing transaction stays usable.
    pub fn savepoint<T>(
        &self,
        f: impl FnOnce(&SqlTx<'_>) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        let name = format!("sp_{}", self.depth + 1);
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;

        let nested = SqlTx {
            conn: self.conn,
            depth: self.depth + 1,
        };
        match f(&nested) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
                Ok(value)
            }
            Err(err) => {
                self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
                ))?;
                Err(err)
            }
        }
    }
}

fn lock(conn: &Mutex<Option<Connection>>) -> MutexGuard<'_, Option<Connection>> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        stmt.execute(params_from_iter(params.iter()))?;
        return Ok(Vec::new());
    }

    let columns = column_names(&stmt);
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(decode_row(row, &columns)?);
    }
    Ok(records)
}

fn run_execute(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<ExecSummary> {
    let changes = conn.execute(sql, params_from_iter(params.iter()))?;
    Ok(ExecSummary {
        changes,
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

fn stream_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    tx: &mpsc::Sender<Result<Record, SqlError>>,
    cancel: &CancellationToken,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    while let Some(row) = rows.next()? {
        if cancel.is_cancelled() {
            tracing::debug!("Row stream cancelled");
            break;
        }
        if tx.blocking_send(Ok(decode_row(row, &columns)?)).is_err() {
            break;
        }
    }
    Ok(())
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

fn decode_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Map::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => JsonValue::Null,
            ValueRef::Integer(i) => JsonValue::from(i),
            ValueRef::Real(f) => JsonValue::from(f),
            ValueRef::Text(text) => JsonValue::String(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(blob) => JsonValue::from(blob.to_vec()),
        };
        record.insert(name.clone(), value);
    }
    Ok(record)
}

fn decode_record<T: DeserializeOwned>(record: Record) -> Result<T, SqlError> {
    Ok(serde_json::from_value(JsonValue::Object(record))?)
}
