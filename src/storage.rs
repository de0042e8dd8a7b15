//! Durable storage for recorded vehicle observations.
//!
//! Every observation becomes one row of the `vehicle_locations` table, tagged
//! with the instant the recorder received it:
//!
//! ```text
//! route_tag | dir_tag | vehicle_id | latitude | longitude | speed | age | heading | creation_timestamp
//! ```
//!
//! Timestamps are stored as fixed-width UTC text (`YYYY-MM-DD HH:MM:SS.SSS`).
//! Older rows may lack the milliseconds, so queries compare the value
//! normalized through `strftime` rather than the raw text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::nextbus::RawObservation;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vehicle_locations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        route_tag TEXT NOT NULL,
        dir_tag TEXT,
        vehicle_id TEXT,
        latitude TEXT,
        longitude TEXT,
        speed TEXT,
        age TEXT,
        heading TEXT,
        creation_timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_vehicle_locations_route_time
        ON vehicle_locations (route_tag, creation_timestamp);
";

/// Failure while writing a batch. Rows written before the failure stay written.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("error preparing insert statement: {0}")]
    Prepare(#[source] rusqlite::Error),

    #[error("error inserting vehicle location (VehicleID: {vehicle_id}) after {written} rows: {source}")]
    Write {
        written: usize,
        vehicle_id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage connection lock poisoned")]
    Poisoned,
}

impl PersistError {
    /// Rows that made it to storage before the failure.
    pub fn written(&self) -> usize {
        match self {
            PersistError::Write { written, .. } => *written,
            PersistError::Prepare(_) | PersistError::Poisoned => 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid creation_timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("storage connection lock poisoned")]
    Poisoned,
}

/// A raw observation as it sits in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedObservation {
    pub received_at: DateTime<Utc>,
    pub observation: RawObservation,
}

/// Storage shared by every recorder and the exporter.
///
/// Implementations serialize concurrent writers themselves.
pub trait ObservationStore: Send + Sync {
    /// Writes one row per observation, all tagged with `route_tag` and
    /// `received_at`. Returns the number of rows written.
    fn persist(
        &self,
        route_tag: &str,
        received_at: DateTime<Utc>,
        observations: &[RawObservation],
    ) -> Result<usize, PersistError>;

    /// Rows for `route_tag` received within `[start, end]`, oldest first.
    fn observations_between(
        &self,
        route_tag: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedObservation>, QueryError>;
}

/// [`ObservationStore`] on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::with_connection(Connection::open(path)?)?)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Option<MutexGuard<'_, Connection>> {
        self.conn.lock().ok()
    }
}

impl ObservationStore for SqliteStore {
    fn persist(
        &self,
        route_tag: &str,
        received_at: DateTime<Utc>,
        observations: &[RawObservation],
    ) -> Result<usize, PersistError> {
        let conn = self.lock().ok_or(PersistError::Poisoned)?;
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO vehicle_locations
                 (route_tag, dir_tag, vehicle_id, latitude, longitude, speed, age, heading, creation_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(PersistError::Prepare)?;

        let timestamp = format_timestamp(received_at);
        let mut written = 0;
        for obs in observations {
            stmt.execute(params![
                route_tag,
                obs.dir_tag,
                obs.vehicle_id,
                obs.lat,
                obs.lon,
                obs.speed,
                obs.age,
                obs.heading,
                timestamp,
            ])
            .map_err(|source| PersistError::Write {
                written,
                vehicle_id: obs.vehicle_id.clone(),
                source,
            })?;
            written += 1;
        }

        debug!(route_tag, written, "Persisted observations");
        Ok(written)
    }

    fn observations_between(
        &self,
        route_tag: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedObservation>, QueryError> {
        let conn = self.lock().ok_or(QueryError::Poisoned)?;
        let mut stmt = conn.prepare_cached(
            "SELECT route_tag, dir_tag, vehicle_id, latitude, longitude, speed, age, heading, creation_timestamp
             FROM vehicle_locations
             WHERE route_tag = ?1
               AND strftime('%Y-%m-%d %H:%M:%f', creation_timestamp) BETWEEN ?2 AND ?3
             ORDER BY strftime('%Y-%m-%d %H:%M:%f', creation_timestamp), id",
        )?;

        let rows = stmt.query_map(
            params![route_tag, format_timestamp(start), format_timestamp(end)],
            |row| {
                let observation = RawObservation {
                    route_tag: row.get(0)?,
                    dir_tag: text_or_empty(row, 1)?,
                    vehicle_id: text_or_empty(row, 2)?,
                    lat: text_or_empty(row, 3)?,
                    lon: text_or_empty(row, 4)?,
                    speed: text_or_empty(row, 5)?,
                    age: text_or_empty(row, 6)?,
                    heading: text_or_empty(row, 7)?,
                };
                let timestamp: String = row.get(8)?;
                Ok((observation, timestamp))
            },
        )?;

        let mut persisted = Vec::new();
        for row in rows {
            let (observation, timestamp) = row?;
            persisted.push(PersistedObservation {
                received_at: parse_timestamp(&timestamp)?,
                observation,
            });
        }
        Ok(persisted)
    }
}

fn text_or_empty(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, QueryError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| QueryError::InvalidTimestamp(text.to_string()))
}

#[cfg(test)]
impl SqliteStore {
    /// Makes every insert of `vehicle_id` fail.
    pub(crate) fn reject_vehicle(&self, vehicle_id: &str) {
        let sql = format!(
            "CREATE TRIGGER reject_{vehicle_id} BEFORE INSERT ON vehicle_locations
             WHEN NEW.vehicle_id = '{vehicle_id}'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;"
        );
        self.lock().unwrap().execute_batch(&sql).unwrap();
    }

    pub(crate) fn insert_raw(&self, vehicle_id: &str, creation_timestamp: &str) {
        self.lock()
            .unwrap()
            .execute(
                "INSERT INTO vehicle_locations (route_tag, vehicle_id, creation_timestamp)
                 VALUES ('510', ?1, ?2)",
                params![vehicle_id, creation_timestamp],
            )
            .unwrap();
    }
}
