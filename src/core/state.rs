//! Result store: append-only SQLite history of task results.
//!
//! Every call opens its own connection, runs one short transaction and
//! closes it. Rows are keyed by the content hash of the result record, so
//! saving the same outcome twice never creates a second row.

use super::config::ViperConfig;
use super::error::{Result, ViperError};
use super::hasher::hash_record;
use super::items::{Item, Items};
use super::registry::Registry;
use super::types::TaskResult;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TABLE: &str = "results";

const SCHEMA: &str = r#"
CREATE TABLE results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT UNIQUE NOT NULL,
    trigger_time REAL NOT NULL,
    task JSON NOT NULL,
    host JSON NOT NULL,
    args JSON NOT NULL,
    command JSON NOT NULL,
    stdout TEXT NOT NULL,
    stderr TEXT NOT NULL,
    returncode INTEGER NOT NULL,
    start REAL NOT NULL,
    "end" REAL NOT NULL,
    retry INTEGER NOT NULL
);
CREATE INDEX results_start ON results (start);
"#;

const COLUMNS: &str = r#"id, hash, trigger_time, task, host, args, command, stdout, stderr, returncode, start, "end", retry"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`Store::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(i64),
    /// Identical content was already stored under this id.
    AlreadySaved(i64),
}

impl SaveOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::AlreadySaved(id) => *id,
        }
    }
}

/// History filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Host address (`host.ip`)
    pub host: Option<String>,
    /// Task name (`task.name`)
    pub task: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn for_host(mut self, ip: impl Into<String>) -> Self {
        self.host = Some(ip.into());
        self
    }

    pub fn for_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A stored row in record form, callables left as symbolic paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub hash: String,
    #[serde(flatten)]
    pub record: Value,
}

/// Columns as read from SQLite, before JSON decoding.
struct RawRow {
    id: i64,
    hash: String,
    trigger_time: f64,
    task: String,
    host: String,
    args: String,
    command: String,
    stdout: String,
    stderr: String,
    returncode: i32,
    start: f64,
    end: f64,
    retry: u32,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hash: row.get(1)?,
            trigger_time: row.get(2)?,
            task: row.get(3)?,
            host: row.get(4)?,
            args: row.get(5)?,
            command: row.get(6)?,
            stdout: row.get(7)?,
            stderr: row.get(8)?,
            returncode: row.get(9)?,
            start: row.get(10)?,
            end: row.get(11)?,
            retry: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<StoredRecord> {
        let column = |name: &str, text: &str| -> Result<Value> {
            serde_json::from_str(text)
                .map_err(|e| ViperError::decode(TaskResult::KIND, format!("column {}: {}", name, e)))
        };
        let record = json!({
            "trigger_time": self.trigger_time,
            "task": column("task", &self.task)?,
            "host": column("host", &self.host)?,
            "args": column("args", &self.args)?,
            "command": column("command", &self.command)?,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "returncode": self.returncode,
            "start": self.start,
            "end": self.end,
            "retry": self.retry,
        });
        Ok(StoredRecord {
            id: self.id,
            hash: self.hash,
            record,
        })
    }
}

/// Handle to the result database. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    registry: Arc<Registry>,
}

impl Store {
    /// `registry` resolves task callables when stored results are rebuilt.
    pub fn new(path: impl Into<PathBuf>, registry: Arc<Registry>) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    pub fn from_config(config: &ViperConfig, registry: Arc<Registry>) -> Self {
        Self::new(config.db_url.clone(), registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Create the schema. With `force`, existing history is dropped first.
    pub fn init(&self, force: bool) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if force {
            tx.execute_batch("DROP TABLE IF EXISTS results;")?;
        }
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![TABLE],
            |row| row.get(0),
        )?;
        if exists {
            return Err(ViperError::AlreadyExists(format!(
                "table {} in {}",
                TABLE,
                self.path.display()
            )));
        }
        tx.execute_batch(SCHEMA)?;
        tx.commit()?;
        debug!(path = %self.path.display(), force, "initialized result store");
        Ok(())
    }

    /// Append a result. Identical content is reported, never overwritten.
    pub fn save(&self, result: &TaskResult) -> Result<SaveOutcome> {
        let times = [result.trigger_time, result.start, result.end];
        if !times.iter().all(|t| t.is_finite()) {
            return Err(ViperError::Input(format!(
                "result times must be finite, got trigger_time={} start={} end={}",
                result.trigger_time, result.start, result.end
            )));
        }
        let record = result.try_record()?;
        let hash = hash_record(&record);
        let text = |name: &str| record.get(name).map(Value::to_string).unwrap_or_default();

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            r#"INSERT INTO results (
                hash, trigger_time, task, host, args, command, stdout, stderr, returncode, start, "end", retry
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(hash) DO NOTHING"#,
            params![
                hash,
                result.trigger_time,
                text("task"),
                text("host"),
                text("args"),
                text("command"),
                result.stdout,
                result.stderr,
                result.returncode,
                result.start,
                result.end,
                result.retry,
            ],
        )?;
        let outcome = if inserted == 0 {
            let id: i64 = tx.query_row(
                "SELECT id FROM results WHERE hash = ?1",
                params![hash],
                |row| row.get(0),
            )?;
            SaveOutcome::AlreadySaved(id)
        } else {
            SaveOutcome::Inserted(tx.last_insert_rowid())
        };
        tx.commit()?;
        debug!(hash = %hash, ?outcome, "saved result");
        Ok(outcome)
    }

    /// Stored record by row id, without rebuilding callables.
    pub fn record(&self, id: i64) -> Result<Option<StoredRecord>> {
        self.point_lookup("id = ?1", &id)
    }

    pub fn by_id(&self, id: i64) -> Result<Option<TaskResult>> {
        self.record(id)?.map(|r| self.rebuild(r)).transpose()
    }

    pub fn by_hash(&self, hash: &str) -> Result<Option<TaskResult>> {
        self.point_lookup("hash = ?1", &hash)?
            .map(|r| self.rebuild(r))
            .transpose()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Stored records matching `query`, newest start first.
    pub fn records(&self, query: &HistoryQuery) -> Result<Vec<StoredRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<&str> = Vec::new();
        if let Some(ip) = &query.host {
            clauses.push("json_extract(host, '$.ip') = ?");
            values.push(ip);
        }
        if let Some(name) = &query.task {
            clauses.push("json_extract(task, '$.name') = ?");
            values.push(name);
        }

        let mut sql = format!("SELECT {} FROM results", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY start DESC, id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), RawRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    /// Stored results matching `query`, newest start first.
    pub fn history(&self, query: &HistoryQuery) -> Result<Items<TaskResult>> {
        let results = self
            .records(query)?
            .into_iter()
            .map(|r| self.rebuild(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Items::from_items(results))
    }

    fn point_lookup(&self, predicate: &str, value: &dyn rusqlite::ToSql) -> Result<Option<StoredRecord>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM results WHERE {}", COLUMNS, predicate);
        let raw = conn
            .query_row(&sql, [value], RawRow::read)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    fn rebuild(&self, stored: StoredRecord) -> Result<TaskResult> {
        TaskResult::from_record(stored.record, &self.registry)
    }
}
