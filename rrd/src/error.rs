//! Error types for the rrd round-robin store.

use thiserror::Error;

use crate::ring::RingKind;

/// The main error type for all rrd operations.
///
/// Each variant groups the failures of one concern: argument validation,
/// the save path, ring slot lookups, and the storage backends.
#[derive(Error, Debug)]
pub enum RrdError {
    /// An argument was rejected before any I/O took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),

    /// Error during a save operation (write path).
    #[error("save error: {0}")]
    Save(#[from] SaveError),

    /// Error resolving or updating a ring slot.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Error raised by a storage backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Arguments that are rejected before reaching a backend.
///
/// These are programming or configuration errors, not runtime conditions,
/// and are never retried.
#[derive(Error, Debug)]
pub enum ArgumentError {
    /// The ring name is not one of `minutes` or `hours`.
    #[error("unknown ring '{name}': expected 'minutes' or 'hours'")]
    UnknownRing {
        /// The name that was supplied.
        name: String,
    },

    /// The engine tag of a backing descriptor is not recognized.
    #[error("unknown engine '{engine}': expected one of 'sqlite', 'kv' or 'redis'")]
    UnknownEngine {
        /// The tag that was supplied.
        engine: String,
    },

    /// The engine is known but support for it was not compiled in.
    #[error("engine '{engine}' is not available in this build (enable the '{feature}' feature)")]
    EngineUnavailable {
        /// The requested engine.
        engine: String,
        /// The cargo feature that enables it.
        feature: &'static str,
    },

    /// A backing descriptor string could not be parsed.
    #[error("malformed backing descriptor '{descriptor}': expected '<engine>:<location>'")]
    MalformedBacking {
        /// The descriptor that was supplied.
        descriptor: String,
    },

    /// The timestamp's interval start is not representable as an `i64`.
    #[error("timestamp {timestamp} is out of range: its {ring} interval starts before i64::MIN")]
    TimestampOutOfRange {
        /// The rejected timestamp.
        timestamp: i64,
        /// The ring whose truncation overflowed.
        ring: RingKind,
    },

    /// The aggregation rule name is not recognized.
    #[error("unknown aggregation '{name}': expected 'min', 'max' or 'last'")]
    UnknownAggregation {
        /// The name that was supplied.
        name: String,
    },

    /// The value to save is NaN or infinite.
    #[error("invalid value {value}: only finite values can be saved")]
    NonFiniteValue {
        /// The rejected value.
        value: f64,
    },
}

/// Errors that can occur on the save path.
#[derive(Error, Debug)]
pub enum SaveError {
    /// The timestamp falls in a minute older than the last saved minute.
    #[error(
        "timestamp {timestamp} is older than the last saved minute {last_timestamp}; writes must move forward in time"
    )]
    OutOfOrder {
        /// The minute-truncated timestamp that was rejected.
        timestamp: i64,
        /// The last saved minute timestamp.
        last_timestamp: i64,
    },
}

/// Errors raised while locating or updating ring slots.
#[derive(Error, Debug)]
pub enum RingError {
    /// No slot in the ring holds the requested timestamp.
    ///
    /// The engine only updates slots it has just resolved, so this signals a
    /// broken invariant rather than bad user input.
    #[error("no slot in the {ring} ring holds timestamp {timestamp}")]
    SlotNotFound {
        /// The ring that was searched.
        ring: RingKind,
        /// The timestamp that was not found.
        timestamp: i64,
    },
}

/// Failures of the storage backends.
///
/// These are propagated unchanged; the store is unusable until a new
/// connection is established.
#[derive(Error, Debug)]
pub enum BackendError {
    /// An SQLite statement or connection failed.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A key-value document file could not be read or written.
    #[error("failed to access key-value file '{path}': {source}")]
    FileAccess {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A key-value entry could not be encoded or decoded.
    #[error("failed to decode key '{key}': {source}")]
    Encoding {
        /// The key being processed.
        key: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A Redis command failed.
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// The persisted store does not have the expected shape.
    #[error("corrupted store: {reason}")]
    Corrupted {
        /// Description of what was wrong.
        reason: String,
    },
}

impl From<rusqlite::Error> for RrdError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(BackendError::Sqlite(err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for RrdError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(BackendError::Redis(err))
    }
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;
