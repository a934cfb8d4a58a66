//! SQLite database handle using `rusqlite`.
//!
//! [`SqliteDatabase`] owns one connection behind an async mutex. Driver calls
//! run on the blocking pool via `tokio::task::spawn_blocking`, so the async
//! runtime never waits on disk I/O. Sessions opened from the same database
//! share that connection and must not be used concurrently; open separate
//! database handles for concurrent work on a file database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use repokit_core::settings::DatabaseSettings;
use repokit_core::{RepoError, RepoResult};
use repokit_db::{Row, Value};
use rusqlite::types::ValueRef;
use rusqlite::ErrorCode;
use tokio::sync::Mutex;

use crate::session::SqliteSession;

/// A SQLite database.
#[derive(Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
    round_trips: Arc<AtomicU64>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("path", &self.path)
            .field("round_trips", &self.round_trips())
            .finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Opens a database at `path` with default settings.
    ///
    /// `:memory:` opens an in-memory database.
    pub fn open(path: impl Into<PathBuf>) -> RepoResult<Self> {
        let settings = DatabaseSettings {
            path: path.into().to_string_lossy().into_owned(),
            ..DatabaseSettings::default()
        };
        Self::from_settings(&settings)
    }

    /// Opens an in-memory database.
    pub fn memory() -> RepoResult<Self> {
        Self::open(":memory:")
    }

    /// Opens the database described by `settings` and applies its pragmas.
    ///
    /// # Errors
    ///
    /// `OperationalError` when the file cannot be opened or a pragma fails.
    pub fn from_settings(settings: &DatabaseSettings) -> RepoResult<Self> {
        let path = PathBuf::from(&settings.path);
        let in_memory = settings.path == ":memory:";
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| RepoError::OperationalError(format!("SQLite open failed: {e}")))?;

        let mut pragmas = format!(
            "PRAGMA foreign_keys={}; PRAGMA busy_timeout={}; PRAGMA case_sensitive_like=ON;",
            if settings.foreign_keys { "ON" } else { "OFF" },
            settings.busy_timeout_ms
        );
        if !in_memory {
            pragmas.push_str(&format!(" PRAGMA journal_mode={};", settings.journal_mode));
        }
        conn.execute_batch(&pragmas)
            .map_err(|e| RepoError::OperationalError(format!("Failed to set pragmas: {e}")))?;

        tracing::debug!(path = %settings.path, "opened SQLite database");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            round_trips: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a session on this database.
    pub fn session(&self) -> SqliteSession {
        SqliteSession::new(self.clone())
    }

    /// The number of statements run against the connection so far.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Runs a batch of `;`-separated statements, such as a schema.
    pub async fn execute_batch(&self, sql: &str) -> RepoResult<()> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql).map_err(map_error))
            .await
    }

    /// Runs a statement and returns its rows, labelled as the SQL labels them.
    pub async fn query(&self, sql: String, params: Vec<Value>) -> RepoResult<Vec<Row>> {
        self.run(move |conn| query_rows(conn, &sql, &params)).await
    }

    /// Runs a statement that returns no rows and reports how many it changed.
    pub async fn execute(&self, sql: String, params: Vec<Value>) -> RepoResult<u64> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(map_error)?;
            bind_params(&mut stmt, &params)?;
            let count = stmt.raw_execute().map_err(map_error)?;
            Ok(count as u64)
        })
        .await
    }

    /// Rolls back an open transaction without waiting, if the connection is
    /// free. Used when a session is dropped mid-transaction.
    pub(crate) fn try_rollback(&self) {
        if let Ok(conn) = self.conn.try_lock() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %e, "rollback of abandoned session failed");
                }
            }
        }
    }

    async fn run<T, F>(&self, f: F) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> RepoResult<T> + Send + 'static,
    {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| RepoError::DatabaseError(format!("Task join error: {e}")))?
    }
}

fn query_rows(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> RepoResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(map_error)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    bind_params(&mut stmt, params)?;

    let mut raw_rows = stmt.raw_query();
    let mut rows = Vec::new();
    while let Some(row) = raw_rows.next().map_err(map_error)? {
        rows.push(convert_row(row, &column_names)?);
    }
    Ok(rows)
}

/// Binds `Value`s to a `rusqlite` statement.
///
/// Temporal values are stored as ISO-8601 text, UUIDs and JSON as text,
/// and booleans as integers.
fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> RepoResult<()> {
    for (i, param) in params.iter().enumerate() {
        let idx = i + 1;
        match param {
            Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
            Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
            Value::Int(v) => stmt.raw_bind_parameter(idx, v),
            Value::Float(v) => stmt.raw_bind_parameter(idx, v),
            Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
            Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
            Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
            Value::DateTime(dt) => {
                stmt.raw_bind_parameter(idx, dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339()),
            Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
            Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
            Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
            Value::List(vals) => {
                let json = serde_json::to_string(vals)
                    .map_err(|e| RepoError::SerializationError(e.to_string()))?;
                stmt.raw_bind_parameter(idx, json)
            }
        }
        .map_err(|e| RepoError::DatabaseError(format!("Bind error: {e}")))?;
    }
    Ok(())
}

/// Converts a `rusqlite::Row` to a [`Row`] of raw driver values.
fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> RepoResult<Row> {
    let mut values = Vec::with_capacity(column_names.len());
    for i in 0..column_names.len() {
        let value = match sqlite_row.get_ref(i).map_err(map_error)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        };
        values.push(value);
    }
    Ok(Row::new(column_names.to_vec(), values))
}

/// Maps a driver error onto [`RepoError`].
pub(crate) fn map_error(e: rusqlite::Error) -> RepoError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            RepoError::IntegrityError(e.to_string())
        }
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            RepoError::OperationalError(e.to_string())
        }
        _ => RepoError::DatabaseError(e.to_string()),
    }
}
