//! SQLite-based dose history and adherence statistics.
//!
//! The history is append-only: one row per (medication, due instant). The
//! engine never updates or deletes rows, and a second resolution of the
//! same dose is silently ignored.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::{CoreError, DatabaseError, Result};
use crate::medication::DoseEvent;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Sink for resolved doses.
///
/// The tracker calls `append` from tokio's blocking pool, so implementations
/// may do synchronous I/O.
pub trait DoseLog: Send + Sync {
    /// Append `event`. Returns `false` when the dose was already recorded.
    ///
    /// # Errors
    /// Returns an error if the event could not be stored.
    fn append(&self, event: &DoseEvent) -> Result<bool>;
}

/// Adherence summary over a set of dose events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdherenceStats {
    pub total: u64,
    pub taken: u64,
    pub missed: u64,
    /// `taken / total`, or `0.0` when there is no history.
    pub rate: f64,
}

impl AdherenceStats {
    fn from_counts(taken: u64, missed: u64) -> Self {
        let total = taken + missed;
        let rate = if total == 0 {
            0.0
        } else {
            taken as f64 / total as f64
        };
        Self {
            total,
            taken,
            missed,
            rate,
        }
    }
}

/// SQLite database for dose history.
pub struct HistoryDb {
    conn: Mutex<Connection>,
}

impl HistoryDb {
    /// Open the database at `~/.config/doseminder/doseminder.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_path(&data_dir()?.join("doseminder.db"))
    }

    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        Self::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dose_events (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                medication_id TEXT NOT NULL,
                taken_date    TEXT NOT NULL,
                taken         INTEGER NOT NULL,
                created_at    TEXT NOT NULL,
                UNIQUE(medication_id, taken_date)
            );

            CREATE INDEX IF NOT EXISTS idx_dose_events_taken_date ON dose_events(taken_date);",
        )
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Locked))
    }

    /// Record a resolved dose. Returns `false` if this dose already exists.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record(&self, event: &DoseEvent) -> Result<bool> {
        let written = self.conn()?.execute(
            "INSERT OR IGNORE INTO dose_events (medication_id, taken_date, taken, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.medication_id,
                event.taken_date.format(TIMESTAMP_FORMAT).to_string(),
                event.taken,
                event.created_at.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(written == 1)
    }

    /// Events of one medication, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn events_for(&self, medication_id: &str, limit: Option<usize>) -> Result<Vec<DoseEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT medication_id, taken_date, taken, created_at
             FROM dose_events
             WHERE medication_id = ?1
             ORDER BY taken_date DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![medication_id, sql_limit(limit)], event_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Events of every medication, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: Option<usize>) -> Result<Vec<DoseEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT medication_id, taken_date, taken, created_at
             FROM dose_events
             ORDER BY taken_date DESC, medication_id
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![sql_limit(limit)], event_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Taken/missed counts, for one medication or for all of them.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn stats(&self, medication_id: Option<&str>) -> Result<AdherenceStats> {
        let conn = self.conn()?;
        let (taken, missed) = conn.query_row(
            "SELECT COALESCE(SUM(taken), 0), COALESCE(SUM(1 - taken), 0)
             FROM dose_events
             WHERE ?1 IS NULL OR medication_id = ?1",
            params![medication_id],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;
        Ok(AdherenceStats::from_counts(taken, missed))
    }
}

impl DoseLog for HistoryDb {
    fn append(&self, event: &DoseEvent) -> Result<bool> {
        self.record(event)
    }
}

// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit
        .and_then(|n| i64::try_from(n).ok())
        .unwrap_or(-1)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<DoseEvent> {
    Ok(DoseEvent {
        medication_id: row.get(0)?,
        taken_date: parse_timestamp(row, 1)?,
        taken: row.get(2)?,
        created_at: parse_timestamp(row, 3)?,
    })
}

/// In-process [`DoseLog`] with the same one-event-per-dose rule.
#[derive(Debug, Default)]
pub struct MemoryDoseLog {
    events: Mutex<Vec<DoseEvent>>,
}

impl MemoryDoseLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<DoseEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl DoseLog for MemoryDoseLog {
    fn append(&self, event: &DoseEvent) -> Result<bool> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Locked))?;
        let exists = events.iter().any(|e| {
            e.medication_id == event.medication_id && e.taken_date == event.taken_date
        });
        if exists {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }
}
