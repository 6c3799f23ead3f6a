//! Storage backends for the rrd round-robin store.
//!
//! A backend durably holds the minute ring, the hour ring, and the last
//! saved minute timestamp. The engine never sees slot positions directly; it
//! works through the [`Backend`] trait, which exposes whole-ring reads,
//! exact-match index resolution, and cursor-relative batch writes.
//!
//! # Variants
//!
//! - [`SqliteBackend`]: one table per ring, `slot_id` doubling as the ring
//!   index, with a secondary index on `timestamp` for resolution.
//! - [`KeyValueBackend`]: one key per slot plus explicit cursor keys, over
//!   any [`KeyValueStore`]: an in-process map, a JSON document file, or Redis
//!   (feature `redis`).
//!
//! Both produce identical observable sequences for identical histories.
//!
//! # Opening
//!
//! ```rust
//! use rrd::backend::{open, Backing};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backing: Backing = "sqlite::memory:".parse()?;
//! let backend = open(&backing)?;
//! assert_eq!(backend.last_timestamp(), None);
//! # Ok(())
//! # }
//! ```

pub mod kv;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use crate::error::{ArgumentError, Result};
use crate::ring::{RingKind, Sample};

pub use kv::{FileStore, KeyValueBackend, KeyValueStore, MemoryStore};
pub use sqlite::SqliteBackend;

/// Location string that selects an in-process store instead of a file.
pub const IN_MEMORY: &str = ":memory:";

/// Samples appended to both rings by a single save.
///
/// The minute samples are always applied before the hour samples, and a
/// backend applies the whole batch as one atomic unit where it can.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Samples for the minute ring, oldest first.
    pub minutes: Vec<Sample>,
    /// Samples for the hour ring, oldest first.
    pub hours: Vec<Sample>,
}

impl WriteBatch {
    /// Returns the samples destined for `ring`.
    pub fn samples(&self, ring: RingKind) -> &[Sample] {
        match ring {
            RingKind::Minutes => &self.minutes,
            RingKind::Hours => &self.hours,
        }
    }

    /// Returns the newest minute timestamp in the batch.
    ///
    /// This becomes the backend's `last_timestamp` once the batch is applied.
    pub fn newest_minute(&self) -> Option<i64> {
        self.minutes.iter().filter_map(|s| s.timestamp).max()
    }

    /// Returns `true` if the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty() && self.hours.is_empty()
    }
}

/// The storage contract the engine is written against.
///
/// # Thread Safety
///
/// Backends are single-writer. Callers provide exclusive access; the engine
/// does not coordinate between processes sharing one store.
pub trait Backend: fmt::Debug {
    /// Returns all `capacity` slots of `ring` in raw storage order.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ring cannot be read.
    fn read_all(&self, ring: RingKind) -> Result<Vec<Sample>>;

    /// Returns the most recently saved minute timestamp.
    fn last_timestamp(&self) -> Option<i64>;

    /// Returns the hour-truncation of [`Backend::last_timestamp`].
    fn last_hour_timestamp(&self) -> Option<i64> {
        self.last_timestamp().map(|ts| RingKind::Hours.truncate(ts))
    }

    /// Returns the index of the slot holding exactly `timestamp`.
    ///
    /// Returns `default` when no slot holds it or `timestamp` is `None`.
    /// Callers pass `0` when reading and `-1` when computing the next write
    /// position, so that an empty ring starts at slot 0.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lookup fails.
    fn resolve_index(&self, ring: RingKind, timestamp: Option<i64>, default: i64) -> Result<i64>;

    /// Returns the value in the slot holding `timestamp`, if any.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lookup fails.
    fn get_value(&self, ring: RingKind, timestamp: i64) -> Result<Option<f64>>;

    /// Appends `batch` after each ring's last written slot.
    ///
    /// Writes start at `(resolve_index(anchor, -1) + 1) % capacity`, where the
    /// anchor is the pre-batch `last_timestamp` truncated to that ring, and
    /// advance one slot per sample. On success `last_timestamp` becomes
    /// [`WriteBatch::newest_minute`].
    ///
    /// # Errors
    ///
    /// Returns a backend error if the batch cannot be persisted; in that case
    /// no part of the batch is visible.
    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()>;

    /// Overwrites the value of the slot holding `timestamp` in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RingError::SlotNotFound`] if no slot holds
    /// `timestamp`, or a backend error if the write fails.
    fn update(&mut self, ring: RingKind, timestamp: i64, value: f64) -> Result<()>;

    /// Releases the backend, reporting any error raised while closing.
    ///
    /// Dropping a backend also releases it; this only surfaces failures.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the underlying handle fails to close.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Which storage engine a [`Backing`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Relational tables in an SQLite database.
    Sqlite,
    /// Key-value slots in a JSON document file (or in memory).
    KeyValue,
    /// Key-value slots in a Redis database.
    Redis,
}

impl EngineKind {
    /// Returns the tag used in descriptors and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::KeyValue => "kv",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ArgumentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "kv" | "keyvalue" | "key-value" => Ok(Self::KeyValue),
            "redis" => Ok(Self::Redis),
            _ => Err(ArgumentError::UnknownEngine {
                engine: s.to_string(),
            }),
        }
    }
}

/// A connection descriptor: an engine plus a location string.
///
/// Parses from `<engine>:<location>`, for example `sqlite:./rrd-data.db`,
/// `kv::memory:` or `redis:redis://127.0.0.1:6379/0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backing {
    /// Storage engine to use.
    pub engine: EngineKind,
    /// Engine-specific location (file path, `:memory:`, or URL).
    pub location: String,
}

impl Backing {
    /// Creates a descriptor for `engine` at `location`.
    pub fn new(engine: EngineKind, location: impl Into<String>) -> Self {
        Self {
            engine,
            location: location.into(),
        }
    }

    /// Creates an SQLite descriptor.
    pub fn sqlite(location: impl Into<String>) -> Self {
        Self::new(EngineKind::Sqlite, location)
    }

    /// Creates a key-value descriptor.
    pub fn key_value(location: impl Into<String>) -> Self {
        Self::new(EngineKind::KeyValue, location)
    }

    /// Returns `true` if the location selects an in-process store.
    pub fn is_in_memory(&self) -> bool {
        self.location == IN_MEMORY
    }
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine, self.location)
    }
}

impl FromStr for Backing {
    type Err = ArgumentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let Some((engine, location)) = s.split_once(':') else {
            return Err(ArgumentError::MalformedBacking {
                descriptor: s.to_string(),
            });
        };
        if location.is_empty() {
            return Err(ArgumentError::MalformedBacking {
                descriptor: s.to_string(),
            });
        }
        Ok(Self::new(engine.parse()?, location))
    }
}

/// Opens the backend described by `backing`, initializing it if new.
///
/// The engine tag is checked before any I/O, so an unavailable engine never
/// touches the location.
///
/// # Errors
///
/// Returns [`ArgumentError::EngineUnavailable`] for an engine not compiled
/// into this build, or a backend error if the store cannot be opened or
/// initialized.
pub fn open(backing: &Backing) -> Result<Box<dyn Backend>> {
    tracing::debug!(%backing, "opening backend");

    match backing.engine {
        EngineKind::Sqlite => {
            let backend = if backing.is_in_memory() {
                SqliteBackend::open_in_memory()?
            } else {
                SqliteBackend::open(&backing.location)?
            };
            Ok(Box::new(backend))
        }
        EngineKind::KeyValue => {
            if backing.is_in_memory() {
                Ok(Box::new(KeyValueBackend::open(MemoryStore::new())?))
            } else {
                let store = FileStore::open(&backing.location)?;
                Ok(Box::new(KeyValueBackend::open(store)?))
            }
        }
        #[cfg(feature = "redis")]
        EngineKind::Redis => {
            let store = self::redis::RedisStore::connect(&backing.location)?;
            Ok(Box::new(KeyValueBackend::open(store)?))
        }
        #[cfg(not(feature = "redis"))]
        EngineKind::Redis => Err(ArgumentError::EngineUnavailable {
            engine: backing.engine.to_string(),
            feature: "redis",
        }
        .into()),
    }
}

/// Behavioural checks every backend must pass.
///
/// Each backend's test module runs these against a freshly initialized
/// instance.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::error::{RingError, RrdError};

    fn minutes(samples: &[Sample]) -> WriteBatch {
        WriteBatch {
            minutes: samples.to_vec(),
            hours: Vec::new(),
        }
    }

    pub(crate) fn fresh_rings_are_empty(backend: &dyn Backend) {
        for ring in RingKind::ALL {
            let slots = backend.read_all(ring).unwrap();
            assert_eq!(slots.len(), ring.capacity());
            assert!(slots.iter().all(Sample::is_empty));
        }
        assert_eq!(backend.last_timestamp(), None);
        assert_eq!(backend.last_hour_timestamp(), None);
    }

    pub(crate) fn resolve_uses_default_when_absent(backend: &dyn Backend) {
        assert_eq!(backend.resolve_index(RingKind::Minutes, None, -1).unwrap(), -1);
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(60), 0).unwrap(), 0);
        assert_eq!(backend.resolve_index(RingKind::Hours, Some(3600), 7).unwrap(), 7);
    }

    pub(crate) fn batch_writes_advance_cursor(backend: &mut dyn Backend) {
        backend
            .write_batch(&WriteBatch {
                minutes: vec![Sample::new(60, 1.0), Sample::new(120, 2.0)],
                hours: vec![Sample::new(0, 1.0)],
            })
            .unwrap();

        assert_eq!(backend.last_timestamp(), Some(120));
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(60), -1).unwrap(), 0);
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(120), -1).unwrap(), 1);
        assert_eq!(backend.resolve_index(RingKind::Hours, Some(0), -1).unwrap(), 0);

        backend.write_batch(&minutes(&[Sample::placeholder(180), Sample::new(240, 4.0)])).unwrap();
        assert_eq!(backend.last_timestamp(), Some(240));

        let slots = backend.read_all(RingKind::Minutes).unwrap();
        assert_eq!(slots[0], Sample::new(60, 1.0));
        assert_eq!(slots[1], Sample::new(120, 2.0));
        assert_eq!(slots[2], Sample::placeholder(180));
        assert_eq!(slots[3], Sample::new(240, 4.0));
        assert!(slots[4..].iter().all(Sample::is_empty));

        let hours = backend.read_all(RingKind::Hours).unwrap();
        assert_eq!(hours[0], Sample::new(0, 1.0));
        assert!(hours[1..].iter().all(Sample::is_empty));
    }

    pub(crate) fn batch_writes_wrap(backend: &mut dyn Backend) {
        let first: Vec<Sample> = (0..58).map(|i| Sample::new(i * 60, 0.0)).collect();
        backend.write_batch(&minutes(&first)).unwrap();

        let second: Vec<Sample> = (58..63).map(|i| Sample::new(i * 60, 1.0)).collect();
        backend.write_batch(&minutes(&second)).unwrap();

        let slots = backend.read_all(RingKind::Minutes).unwrap();
        assert_eq!(slots.len(), 60);
        assert_eq!(slots[0], Sample::new(60 * 60, 1.0));
        assert_eq!(slots[2], Sample::new(62 * 60, 1.0));
        assert_eq!(slots[3], Sample::new(3 * 60, 0.0));
        assert_eq!(slots[59], Sample::new(59 * 60, 1.0));
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(62 * 60), -1).unwrap(), 2);
        // Evicted timestamps no longer resolve
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(0), -1).unwrap(), -1);
        assert_eq!(backend.last_timestamp(), Some(62 * 60));
    }

    pub(crate) fn update_in_place(backend: &mut dyn Backend) {
        backend
            .write_batch(&WriteBatch {
                minutes: vec![Sample::new(60, 5.0)],
                hours: vec![Sample::new(0, 5.0)],
            })
            .unwrap();

        backend.update(RingKind::Minutes, 60, 3.0).unwrap();
        backend.update(RingKind::Hours, 0, 2.0).unwrap();

        assert_eq!(backend.get_value(RingKind::Minutes, 60).unwrap(), Some(3.0));
        assert_eq!(backend.get_value(RingKind::Hours, 0).unwrap(), Some(2.0));
        assert_eq!(backend.get_value(RingKind::Minutes, 120).unwrap(), None);
        // The cursor does not move
        assert_eq!(backend.last_timestamp(), Some(60));
        assert_eq!(backend.resolve_index(RingKind::Minutes, Some(60), -1).unwrap(), 0);

        let err = backend.update(RingKind::Minutes, 999, 1.0).unwrap_err();
        assert!(matches!(
            err,
            RrdError::Ring(RingError::SlotNotFound {
                ring: RingKind::Minutes,
                timestamp: 999
            })
        ));
    }

    pub(crate) fn run_all<B, F>(mut make: F)
    where
        B: Backend,
        F: FnMut() -> B,
    {
        fresh_rings_are_empty(&make());
        resolve_uses_default_when_absent(&make());
        batch_writes_advance_cursor(&mut make());
        batch_writes_wrap(&mut make());
        update_in_place(&mut make());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backing() {
        let backing: Backing = "sqlite:./rrd-data.db".parse().unwrap();
        assert_eq!(backing, Backing::sqlite("./rrd-data.db"));

        let backing: Backing = "kv::memory:".parse().unwrap();
        assert_eq!(backing.engine, EngineKind::KeyValue);
        assert!(backing.is_in_memory());

        let backing: Backing = "redis:redis://127.0.0.1:6379/0".parse().unwrap();
        assert_eq!(backing.engine, EngineKind::Redis);
        assert_eq!(backing.location, "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_parse_backing_rejects_garbage() {
        assert!(matches!(
            "sqlite".parse::<Backing>(),
            Err(ArgumentError::MalformedBacking { .. })
        ));
        assert!(matches!(
            "sqlite:".parse::<Backing>(),
            Err(ArgumentError::MalformedBacking { .. })
        ));
        assert!(matches!(
            "postgres:db".parse::<Backing>(),
            Err(ArgumentError::UnknownEngine { ref engine }) if engine == "postgres"
        ));
    }

    #[test]
    fn test_backing_display_round_trip() {
        let backing = Backing::key_value("/tmp/store.json");
        assert_eq!(backing.to_string(), "kv:/tmp/store.json");
        assert_eq!(backing.to_string().parse::<Backing>().unwrap(), backing);
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_unavailable_without_feature() {
        let backing = Backing::new(EngineKind::Redis, "redis://127.0.0.1:1/0");
        let err = open(&backing).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RrdError::InvalidArgument(ArgumentError::EngineUnavailable { feature: "redis", .. })
        ));
    }

    #[test]
    fn test_open_in_memory_engines() {
        for backing in [Backing::sqlite(IN_MEMORY), Backing::key_value(IN_MEMORY)] {
            let backend = open(&backing).unwrap();
            conformance::fresh_rings_are_empty(backend.as_ref());
        }
    }

    #[test]
    fn test_write_batch_helpers() {
        let batch = WriteBatch {
            minutes: vec![Sample::placeholder(60), Sample::new(120, 1.0)],
            hours: vec![],
        };
        assert_eq!(batch.newest_minute(), Some(120));
        assert_eq!(batch.samples(RingKind::Minutes).len(), 2);
        assert!(batch.samples(RingKind::Hours).is_empty());
        assert!(!batch.is_empty());
        assert!(WriteBatch::default().is_empty());
    }
}
