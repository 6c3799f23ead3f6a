//! Relational backend over an SQLite database.
//!
//! # Layout
//!
//! ```text
//! meta     (name TEXT PRIMARY KEY, value INTEGER)      <- 'last_timestamp' row
//! minutes  (slot_id INTEGER PRIMARY KEY, timestamp INTEGER, value REAL)  60 rows
//! hours    (slot_id INTEGER PRIMARY KEY, timestamp INTEGER, value REAL)  24 rows
//! ```
//!
//! `slot_id` is the ring index. Each ring table carries a secondary index on
//! `timestamp`, so index resolution is a keyed lookup rather than a scan.
//! Every [`Backend::write_batch`] runs in one transaction covering both rings
//! and the `meta` row.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::backend::{Backend, WriteBatch};
use crate::error::{BackendError, Result, RingError};
use crate::ring::{RingKind, Sample};

/// Name of the metadata row holding the last saved minute.
const LAST_TIMESTAMP_KEY: &str = "last_timestamp";

/// Schema for a fresh database. Ring tables are filled separately.
const CREATE_SCHEMA: &str = "
    DROP TABLE IF EXISTS meta;
    DROP TABLE IF EXISTS minutes;
    DROP TABLE IF EXISTS hours;
    CREATE TABLE meta(name TEXT PRIMARY KEY, value INTEGER);
    CREATE TABLE minutes(slot_id INTEGER PRIMARY KEY, timestamp INTEGER, value REAL);
    CREATE TABLE hours(slot_id INTEGER PRIMARY KEY, timestamp INTEGER, value REAL);
    CREATE INDEX minutes_timestamp ON minutes(timestamp);
    CREATE INDEX hours_timestamp ON hours(timestamp);
";

/// Round-robin storage in two fixed-length SQLite tables.
///
/// The last saved minute is read once at open and kept as a field that only
/// changes after a batch commits.
#[derive(Debug)]
pub struct SqliteBackend {
    /// Open database connection.
    conn: Connection,
    /// Most recent minute timestamp, mirrored from the `meta` table.
    last_timestamp: Option<i64>,
}

impl SqliteBackend {
    /// Opens the database at `path`, creating and initializing it if needed.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the file cannot be opened, the schema
    /// cannot be created, or an existing store has the wrong shape.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a backend error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Wraps an existing connection, initializing the schema if absent.
    ///
    /// # Errors
    ///
    /// Returns a backend error if initialization or validation fails.
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        if is_initialized(&conn)? {
            validate_rings(&conn)?;
        } else {
            initialize(&mut conn)?;
        }

        let last_timestamp: Option<i64> = conn.query_row(
            "SELECT value FROM meta WHERE name = ?1",
            params![LAST_TIMESTAMP_KEY],
            |row| row.get(0),
        )?;

        Ok(Self {
            conn,
            last_timestamp,
        })
    }
}

/// Returns `true` if the database already holds a populated `meta` table.
fn is_initialized(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "meta")? {
        return Ok(false);
    }
    let rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM meta WHERE name = ?1",
        params![LAST_TIMESTAMP_KEY],
        |row| row.get(0),
    )?;
    Ok(rows > 0)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Creates the tables and fills both rings with empty slots.
fn initialize(conn: &mut Connection) -> Result<()> {
    tracing::debug!("initializing sqlite round-robin schema");

    let tx = conn.transaction()?;
    tx.execute_batch(CREATE_SCHEMA)?;
    tx.execute(
        "INSERT INTO meta(name, value) VALUES (?1, NULL)",
        params![LAST_TIMESTAMP_KEY],
    )?;

    for ring in RingKind::ALL {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {}(slot_id, timestamp, value) VALUES (?1, NULL, NULL)",
            ring.as_str()
        ))?;
        for slot in 0..ring.capacity() {
            stmt.execute(params![slot_param(slot)])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Checks that both ring tables exist with exactly `capacity` slots.
fn validate_rings(conn: &Connection) -> Result<()> {
    for ring in RingKind::ALL {
        if !table_exists(conn, ring.as_str())? {
            return Err(BackendError::Corrupted {
                reason: format!("table '{}' is missing", ring.as_str()),
            }
            .into());
        }

        let (count, min_slot, max_slot): (i64, Option<i64>, Option<i64>) = conn.query_row(
            &format!("SELECT COUNT(*), MIN(slot_id), MAX(slot_id) FROM {}", ring.as_str()),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let capacity = slot_param(ring.capacity());
        if count != capacity || min_slot != Some(0) || max_slot != Some(capacity - 1) {
            return Err(BackendError::Corrupted {
                reason: format!(
                    "table '{}' has {count} slots, expected {capacity} numbered 0..{}",
                    ring.as_str(),
                    capacity - 1
                ),
            }
            .into());
        }
    }
    Ok(())
}

/// Looks up the slot holding `timestamp` through the timestamp index.
fn resolve(conn: &Connection, ring: RingKind, timestamp: Option<i64>, default: i64) -> Result<i64> {
    let Some(timestamp) = timestamp else {
        return Ok(default);
    };

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT slot_id FROM {} WHERE timestamp = ?1 LIMIT 1",
        ring.as_str()
    ))?;
    let slot: Option<i64> = stmt.query_row(params![timestamp], |row| row.get(0)).optional()?;
    Ok(slot.unwrap_or(default))
}

#[inline]
#[allow(clippy::cast_possible_wrap)] // slot indices are below 60
fn slot_param(slot: usize) -> i64 {
    slot as i64
}

impl Backend for SqliteBackend {
    fn read_all(&self, ring: RingKind) -> Result<Vec<Sample>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT timestamp, value FROM {} ORDER BY slot_id",
            ring.as_str()
        ))?;
        let slots = stmt
            .query_map([], |row| {
                Ok(Sample {
                    timestamp: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    fn resolve_index(&self, ring: RingKind, timestamp: Option<i64>, default: i64) -> Result<i64> {
        resolve(&self.conn, ring, timestamp, default)
    }

    fn get_value(&self, ring: RingKind, timestamp: i64) -> Result<Option<f64>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT value FROM {} WHERE timestamp = ?1 LIMIT 1",
            ring.as_str()
        ))?;
        let value: Option<Option<f64>> =
            stmt.query_row(params![timestamp], |row| row.get(0)).optional()?;
        Ok(value.flatten())
    }

    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let previous = self.last_timestamp;
        let newest = batch.newest_minute().or(previous);

        let tx = self.conn.transaction()?;
        for ring in RingKind::ALL {
            let samples = batch.samples(ring);
            if samples.is_empty() {
                continue;
            }

            let anchor = previous.map(|ts| ring.truncate(ts));
            let mut slot = ring.next_slot(resolve(&tx, ring, anchor, -1)?);

            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE {} SET timestamp = ?1, value = ?2 WHERE slot_id = ?3",
                ring.as_str()
            ))?;
            for sample in samples {
                stmt.execute(params![sample.timestamp, sample.value, slot_param(slot)])?;
                slot = (slot + 1) % ring.capacity();
            }
        }
        tx.execute(
            "UPDATE meta SET value = ?1 WHERE name = ?2",
            params![newest, LAST_TIMESTAMP_KEY],
        )?;
        tx.commit()?;

        self.last_timestamp = newest;
        Ok(())
    }

    fn update(&mut self, ring: RingKind, timestamp: i64, value: f64) -> Result<()> {
        let changed = self.conn.execute(
            &format!("UPDATE {} SET value = ?1 WHERE timestamp = ?2", ring.as_str()),
            params![value, timestamp],
        )?;
        if changed == 0 {
            return Err(RingError::SlotNotFound { ring, timestamp }.into());
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }
}
