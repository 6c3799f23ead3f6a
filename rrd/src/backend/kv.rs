//! Key-value backend with independently addressed slots.
//!
//! # Key Layout
//!
//! ```text
//! min0 .. min59      -> "[timestamp, value]"   (JSON pair, null for absent)
//! hour0 .. hour23    -> "[timestamp, value]"
//! min_cursor         -> last written minute slot, -1 when empty
//! hour_cursor        -> last written hour slot, -1 when empty
//! last_timestamp     -> last saved minute, or null
//! initialized        -> "true"
//! ```
//!
//! The backend keeps an in-process copy of both rings together with a
//! `timestamp -> slot` map, so index resolution and reads never touch the
//! store. Writes go through a single [`KeyValueStore::set_many`] call and the
//! cache is only replaced once that call succeeds.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, WriteBatch};
use crate::error::{BackendError, Result, RingError};
use crate::ring::{RingKind, Sample};

/// Marker key written once the slots exist.
const INITIALIZED_KEY: &str = "initialized";

/// Key holding the last saved minute timestamp.
const LAST_TIMESTAMP_KEY: &str = "last_timestamp";

/// A flat string-to-string store the key-value backend persists into.
///
/// Implementations must apply [`KeyValueStore::set_many`] atomically: either
/// every entry becomes visible or none does.
pub trait KeyValueStore: fmt::Debug {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store cannot be read.
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Returns the values stored under each of `keys`, in order.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store cannot be read.
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Stores every entry as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the entries cannot be persisted.
    fn set_many(&mut self, entries: &[(String, String)]) -> Result<()>;
}

/// A store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no keys are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_many(&mut self, entries: &[(String, String)]) -> Result<()> {
        for (key, value) in entries {
            self.entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// A store persisted as one JSON object in a file.
///
/// Every [`KeyValueStore::set_many`] rewrites the document to a sibling
/// temporary file and renames it over the original, so a crash leaves either
/// the old or the new document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Opens the document at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FileAccess`] if the file cannot be read, or
    /// [`BackendError::Encoding`] if it is not a JSON object of strings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| BackendError::FileAccess {
                path: path.display().to_string(),
                source: e,
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| BackendError::Encoding {
                    key: path.display().to_string(),
                    source: e,
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, entries })
    }

    /// Returns the document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries).map_err(|e| BackendError::Encoding {
            key: self.path.display().to_string(),
            source: e,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, content).map_err(|e| BackendError::FileAccess {
            path: tmp.display().to_string(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| BackendError::FileAccess {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_many(&mut self, entries: &[(String, String)]) -> Result<()> {
        let mut next = self.entries.clone();
        for (key, value) in entries {
            next.insert(key.clone(), value.clone());
        }
        self.persist(&next)?;
        self.entries = next;
        Ok(())
    }
}

/// Cached copy of one ring.
#[derive(Debug, Clone)]
struct RingCache {
    kind: RingKind,
    slots: Vec<Sample>,
    /// Maps each stored timestamp to the slot holding it.
    index: HashMap<i64, usize>,
    /// Last written slot, `-1` before the first write.
    cursor: i64,
}

impl RingCache {
    fn empty(kind: RingKind) -> Self {
        Self {
            kind,
            slots: vec![Sample::EMPTY; kind.capacity()],
            index: HashMap::new(),
            cursor: -1,
        }
    }

    fn slot_key(&self, slot: usize) -> String {
        format!("{}{}", self.kind.key_prefix(), slot)
    }

    fn cursor_key(kind: RingKind) -> String {
        format!("{}_cursor", kind.key_prefix())
    }

    fn resolve(&self, timestamp: Option<i64>, default: i64) -> i64 {
        timestamp
            .and_then(|ts| self.index.get(&ts))
            .map_or(default, |&slot| slot_index(slot))
    }

    /// Writes `sample` into `slot`, keeping the timestamp map in step.
    fn put(&mut self, slot: usize, sample: Sample) {
        if let Some(old) = self.slots[slot].timestamp
            && self.index.get(&old) == Some(&slot)
        {
            self.index.remove(&old);
        }
        if let Some(ts) = sample.timestamp {
            self.index.insert(ts, slot);
        }
        self.slots[slot] = sample;
    }

    /// Appends `samples` after the cursor, returning the entries to persist.
    fn append(&mut self, samples: &[Sample]) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::with_capacity(samples.len() + 1);
        let mut slot = self.kind.next_slot(self.cursor);

        for &sample in samples {
            self.put(slot, sample);
            let key = self.slot_key(slot);
            let encoded = encode_sample(&key, sample)?;
            entries.push((key, encoded));
            self.cursor = slot_index(slot);
            slot = (slot + 1) % self.kind.capacity();
        }

        entries.push((Self::cursor_key(self.kind), self.cursor.to_string()));
        Ok(entries)
    }

    fn load<S: KeyValueStore>(store: &mut S, kind: RingKind) -> Result<Self> {
        let mut cache = Self::empty(kind);

        let keys: Vec<String> = (0..kind.capacity()).map(|slot| cache.slot_key(slot)).collect();
        let values = store.get_many(&keys)?;

        for (slot, (key, raw)) in keys.iter().zip(values).enumerate() {
            let raw = raw.ok_or_else(|| BackendError::Corrupted {
                reason: format!("slot key '{key}' is missing"),
            })?;
            cache.put(slot, decode_sample(key, &raw)?);
        }

        let cursor_key = Self::cursor_key(kind);
        let raw = store.get(&cursor_key)?.ok_or_else(|| BackendError::Corrupted {
            reason: format!("cursor key '{cursor_key}' is missing"),
        })?;
        let cursor: i64 = decode(&cursor_key, &raw)?;
        if !(-1..slot_index(kind.capacity())).contains(&cursor) {
            return Err(BackendError::Corrupted {
                reason: format!("cursor '{cursor_key}' is out of range: {cursor}"),
            }
            .into());
        }
        cache.cursor = cursor;

        Ok(cache)
    }
}

#[inline]
#[allow(clippy::cast_possible_wrap)] // slot indices are below 60
fn slot_index(slot: usize) -> i64 {
    slot as i64
}

fn encode_sample(key: &str, sample: Sample) -> Result<String> {
    let pair: (Option<i64>, Option<f64>) = sample.into();
    serde_json::to_string(&pair).map_err(|e| {
        BackendError::Encoding {
            key: key.to_string(),
            source: e,
        }
        .into()
    })
}

fn decode_sample(key: &str, raw: &str) -> Result<Sample> {
    let pair: (Option<i64>, Option<f64>) = decode(key, raw)?;
    Ok(pair.into())
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        BackendError::Encoding {
            key: key.to_string(),
            source: e,
        }
        .into()
    })
}

/// Round-robin storage in per-slot keys of a [`KeyValueStore`].
#[derive(Debug)]
pub struct KeyValueBackend<S: KeyValueStore> {
    store: S,
    minutes: RingCache,
    hours: RingCache,
    last_timestamp: Option<i64>,
}

impl<S: KeyValueStore> KeyValueBackend<S> {
    /// Opens the rings held in `store`, writing empty ones if it is new.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store cannot be read or written, or if
    /// an initialized store is missing keys or holds undecodable values.
    pub fn open(mut store: S) -> Result<Self> {
        if store.get(INITIALIZED_KEY)?.is_none() {
            return Self::initialize(store);
        }

        let minutes = RingCache::load(&mut store, RingKind::Minutes)?;
        let hours = RingCache::load(&mut store, RingKind::Hours)?;
        let raw = store.get(LAST_TIMESTAMP_KEY)?.ok_or_else(|| BackendError::Corrupted {
            reason: format!("key '{LAST_TIMESTAMP_KEY}' is missing"),
        })?;
        let last_timestamp: Option<i64> = decode(LAST_TIMESTAMP_KEY, &raw)?;

        Ok(Self {
            store,
            minutes,
            hours,
            last_timestamp,
        })
    }

    fn initialize(mut store: S) -> Result<Self> {
        tracing::debug!("initializing key-value round-robin slots");

        let minutes = RingCache::empty(RingKind::Minutes);
        let hours = RingCache::empty(RingKind::Hours);

        let mut entries = Vec::with_capacity(RingKind::Minutes.capacity() + RingKind::Hours.capacity() + 4);
        for cache in [&minutes, &hours] {
            for slot in 0..cache.kind.capacity() {
                let key = cache.slot_key(slot);
                let value = encode_sample(&key, Sample::EMPTY)?;
                entries.push((key, value));
            }
            entries.push((RingCache::cursor_key(cache.kind), cache.cursor.to_string()));
        }
        entries.push((LAST_TIMESTAMP_KEY.to_string(), "null".to_string()));
        entries.push((INITIALIZED_KEY.to_string(), "true".to_string()));
        store.set_many(&entries)?;

        Ok(Self {
            store,
            minutes,
            hours,
            last_timestamp: None,
        })
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the backend and returns the underlying store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn ring(&self, ring: RingKind) -> &RingCache {
        match ring {
            RingKind::Minutes => &self.minutes,
            RingKind::Hours => &self.hours,
        }
    }
}

impl<S: KeyValueStore> Backend for KeyValueBackend<S> {
    fn read_all(&self, ring: RingKind) -> Result<Vec<Sample>> {
        Ok(self.ring(ring).slots.clone())
    }

    fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    fn resolve_index(&self, ring: RingKind, timestamp: Option<i64>, default: i64) -> Result<i64> {
        Ok(self.ring(ring).resolve(timestamp, default))
    }

    fn get_value(&self, ring: RingKind, timestamp: i64) -> Result<Option<f64>> {
        let cache = self.ring(ring);
        Ok(cache
            .index
            .get(&timestamp)
            .and_then(|&slot| cache.slots[slot].value))
    }

    fn write_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut minutes = self.minutes.clone();
        let mut hours = self.hours.clone();
        let mut entries = Vec::new();

        // Minute samples go first so a non-atomic store never holds hour
        // slots newer than the minute ring.
        if !batch.minutes.is_empty() {
            entries.extend(minutes.append(&batch.minutes)?);
        }
        if !batch.hours.is_empty() {
            entries.extend(hours.append(&batch.hours)?);
        }

        let newest = batch.newest_minute().or(self.last_timestamp);
        let encoded = serde_json::to_string(&newest).map_err(|e| BackendError::Encoding {
            key: LAST_TIMESTAMP_KEY.to_string(),
            source: e,
        })?;
        entries.push((LAST_TIMESTAMP_KEY.to_string(), encoded));

        self.store.set_many(&entries)?;

        self.minutes = minutes;
        self.hours = hours;
        self.last_timestamp = newest;
        Ok(())
    }

    fn update(&mut self, ring: RingKind, timestamp: i64, value: f64) -> Result<()> {
        let cache = match ring {
            RingKind::Minutes => &mut self.minutes,
            RingKind::Hours => &mut self.hours,
        };
        let Some(&slot) = cache.index.get(&timestamp) else {
            return Err(RingError::SlotNotFound { ring, timestamp }.into());
        };

        let sample = Sample::new(timestamp, value);
        let key = cache.slot_key(slot);
        let encoded = encode_sample(&key, sample)?;
        self.store.set_many(&[(key, encoded)])?;

        cache.slots[slot] = sample;
        Ok(())
    }
}
