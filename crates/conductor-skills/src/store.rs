use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Params};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One result row, column name to value.
pub type Row = Params;

const DEFAULT_MAX_ROWS: usize = 1_000;

/// Read access to the data the SQL skills query.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Run `query` and return its rows.
    async fn execute(&self, query: &str) -> ConductorResult<Vec<Row>>;

    /// Check that `query` compiles against the store without running it.
    async fn explain(&self, query: &str) -> ConductorResult<()> {
        self.execute(&format!("EXPLAIN {query}")).await.map(|_| ())
    }
}

/// SQLite-backed [`DataStore`]. Queries run on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    max_rows: usize,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            ConductorError::Store(format!(
                "Failed to open {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Store backed by a private in-memory database.
    pub fn open_in_memory() -> ConductorResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Cap the number of rows a single query returns.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    /// Run one or more statements that return no rows (DDL, seed data).
    pub fn execute_batch(&self, sql: &str) -> ConductorResult<()> {
        self.conn.lock().execute_batch(sql).map_err(store_error)
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn execute(&self, query: &str) -> ConductorResult<Vec<Row>> {
        let conn = Arc::clone(&self.conn);
        let query = query.to_string();
        let max_rows = self.max_rows;

        let rows = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            read_rows(&conn, &query, max_rows)
        })
        .await
        .map_err(|e| ConductorError::Store(format!("query task failed: {e}")))?
        .map_err(store_error)?;

        debug!(rows = rows.len(), "Query executed");
        Ok(rows)
    }
}

fn read_rows(conn: &Connection, query: &str, max_rows: usize) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if out.len() >= max_rows {
            break;
        }
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob: {} bytes>", bytes.len())),
    }
}

fn store_error(e: rusqlite::Error) -> ConductorError {
    ConductorError::Store(e.to_string())
}
