use std::future::Future;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::RecordFilter;
use crate::traffic::types::Record;

// Internal row mapping for records to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    src: String,
    dst: String,
    port: i64,
    protocol: String,
    latency_ms: f64,
    error: Option<String>,
    success: bool,
    connected: bool,
    created_time: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record, StorageError> {
        Ok(Record {
            id: Uuid::parse_str(&self.id).map_err(|_| StorageError::ReadFailed)?,
            src: self.src.parse().map_err(|_| StorageError::ReadFailed)?,
            dst: self.dst.parse().map_err(|_| StorageError::ReadFailed)?,
            port: u16::try_from(self.port).map_err(|_| StorageError::ReadFailed)?,
            protocol: self.protocol.parse().map_err(|_| StorageError::ReadFailed)?,
            latency_ms: self.latency_ms,
            error: self.error,
            success: self.success,
            connected: self.connected,
            created_time: DateTime::parse_from_rfc3339(&self.created_time)
                .map_err(|_| StorageError::ReadFailed)?
                .with_timezone(&Utc),
        })
    }
}

enum Bind {
    Text(String),
    Int(i64),
}

/// SQLite record store.
///
/// Owns a private current-thread runtime so that it can be driven from the
/// recorder threads through a plain synchronous API.
pub struct DatabaseRecordStore {
    // Taken on drop only
    rt: Option<tokio::runtime::Runtime>,
    pool: Pool<Sqlite>,
}

impl DatabaseRecordStore {
    /// Default database filename inside the recorder directory
    pub const DEFAULT_DB_FILE: &'static str = "records.sqlite3";

    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| StorageError::ConnectionFailed)?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path_ref)
            .create_if_missing(true);
        let pool = run_on(&rt, async {
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(opts)
                .await
                .map_err(|e| {
                    error!("Failed to open record database: {}", e);
                    StorageError::ConnectionFailed
                })?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS records (
                    id TEXT PRIMARY KEY,
                    src TEXT NOT NULL,
                    dst TEXT NOT NULL,
                    port INTEGER NOT NULL,
                    protocol TEXT NOT NULL,
                    latency_ms REAL NOT NULL,
                    error TEXT,
                    success INTEGER NOT NULL,
                    connected INTEGER NOT NULL,
                    created_time TEXT NOT NULL
                );",
            )
            .execute(&pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
            sqlx::query("CREATE INDEX IF NOT EXISTS records_pair ON records (src, dst);")
                .execute(&pool)
                .await
                .map_err(|_| StorageError::WriteFailed)?;
            Ok::<_, StorageError>(pool)
        })?;
        info!("DatabaseRecordStore opened at {}", path_ref.display());
        Ok(Self { rt: Some(rt), pool })
    }

    fn runtime(&self) -> Result<&tokio::runtime::Runtime, StorageError> {
        self.rt.as_ref().ok_or(StorageError::ConnectionFailed)
    }

    /// Records matching `filter`, oldest first.
    pub fn get_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let (clause, binds) = where_clause(filter);
        let sql = format!(
            "SELECT id, src, dst, port, protocol, latency_ms, error, success, connected, created_time
             FROM records{} ORDER BY created_time ASC",
            clause
        );
        run_on(self.runtime()?, async {
            let mut q = sqlx::query_as::<_, RecordRow>(&sql);
            for b in &binds {
                q = match b {
                    Bind::Text(s) => q.bind(s.as_str()),
                    Bind::Int(i) => q.bind(*i),
                };
            }
            let rows = q.fetch_all(&self.pool).await.map_err(|_| StorageError::ReadFailed)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                out.push(row.into_record()?);
            }
            Ok(out)
        })
    }

    pub fn count_records(&self, filter: &RecordFilter) -> Result<usize, StorageError> {
        let (clause, binds) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM records{}", clause);
        run_on(self.runtime()?, async {
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            for b in &binds {
                q = match b {
                    Bind::Text(s) => q.bind(s.as_str()),
                    Bind::Int(i) => q.bind(*i),
                };
            }
            let count = q.fetch_one(&self.pool).await.map_err(|_| StorageError::ReadFailed)?;
            Ok(count as usize)
        })
    }
}

impl Drop for DatabaseRecordStore {
    fn drop(&mut self) {
        // A runtime may not be dropped from async code
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}

impl RecordStore for DatabaseRecordStore {
    fn persist(&self, record: &Record) -> Result<(), StorageError> {
        run_on(self.runtime()?, async {
            sqlx::query(
                "INSERT INTO records (id, src, dst, port, protocol, latency_ms, error, success, connected, created_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(record.id.to_string())
            .bind(record.src.to_string())
            .bind(record.dst.to_string())
            .bind(i64::from(record.port))
            .bind(record.protocol.to_string())
            .bind(record.latency_ms)
            .bind(record.error.clone())
            .bind(record.success)
            .bind(record.connected)
            .bind(timestamp(&record.created_time))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                debug!("Record insert failed: {}", e);
                StorageError::WriteFailed
            })?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

// Fixed-width so that text comparison orders by time
fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn where_clause(filter: &RecordFilter) -> (String, Vec<Bind>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds = Vec::new();
    if let Some(src) = filter.src {
        clauses.push("src = ?");
        binds.push(Bind::Text(src.to_string()));
    }
    if let Some(dst) = filter.dst {
        clauses.push("dst = ?");
        binds.push(Bind::Text(dst.to_string()));
    }
    if let Some(port) = filter.port {
        clauses.push("port = ?");
        binds.push(Bind::Int(i64::from(port)));
    }
    if let Some(protocol) = filter.protocol {
        clauses.push("protocol = ?");
        binds.push(Bind::Text(protocol.to_string()));
    }
    if let Some(success) = filter.success {
        clauses.push("success = ?");
        binds.push(Bind::Int(i64::from(success)));
    }
    if let Some(since) = filter.since {
        clauses.push("created_time >= ?");
        binds.push(Bind::Text(timestamp(&since)));
    }
    if let Some(until) = filter.until {
        clauses.push("created_time <= ?");
        binds.push(Bind::Text(timestamp(&until)));
    }
    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

/// Drives `fut` on the store runtime. From inside another runtime the call
/// is moved to a scoped thread, where blocking is allowed.
fn run_on<F>(rt: &tokio::runtime::Runtime, fut: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return rt.block_on(fut);
    }
    std::thread::scope(|scope| match scope.spawn(|| rt.block_on(fut)).join() {
        Ok(output) => output,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}
