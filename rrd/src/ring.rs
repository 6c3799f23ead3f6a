//! Ring model for the rrd round-robin store.
//!
//! This module defines the two fixed-capacity rings, the [`Sample`] stored in
//! each slot, and the pure arithmetic the engine and backends share: time
//! truncation, cursor advancement, gap-fill placeholder generation, and
//! rotating raw slot order into chronological order.
//!
//! # Design
//!
//! A ring never grows or shrinks. Writes land at `(cursor + 1) % capacity`
//! and the cursor is the slot holding the last written timestamp, so the
//! oldest sample is always the slot right after the cursor:
//!
//! ```text
//!   slot:   0     1     2     3     4
//!         [t5]  [t6]  [t2]  [t3]  [t4]
//!                ^cursor
//!   chronological: t2 t3 t4 t5 t6
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArgumentError;

/// Number of slots in the minute ring.
pub const MINUTE_CAPACITY: usize = 60;

/// Number of slots in the hour ring.
pub const HOUR_CAPACITY: usize = 24;

/// Seconds in one minute-ring interval.
pub const MINUTE_SECS: i64 = 60;

/// Seconds in one hour-ring interval.
pub const HOUR_SECS: i64 = 3600;

/// Identifies one of the two rings.
///
/// This closed enum is the only way a ring reaches a backend, so table and
/// key names composed from it can never carry caller-controlled text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingKind {
    /// 60 one-minute slots.
    Minutes,
    /// 24 one-hour slots.
    Hours,
}

impl RingKind {
    /// Both rings, minute ring first.
    pub const ALL: [RingKind; 2] = [RingKind::Minutes, RingKind::Hours];

    /// Returns the fixed number of slots in this ring.
    #[inline]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Minutes => MINUTE_CAPACITY,
            Self::Hours => HOUR_CAPACITY,
        }
    }

    /// Returns the interval covered by one slot, in seconds.
    #[inline]
    pub const fn interval_secs(self) -> i64 {
        match self {
            Self::Minutes => MINUTE_SECS,
            Self::Hours => HOUR_SECS,
        }
    }

    /// Returns the lowercase name used for display and SQL table names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        }
    }

    /// Returns the key prefix used by key-value backends (`min<N>`, `hour<N>`).
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::Minutes => "min",
            Self::Hours => "hour",
        }
    }

    /// Rounds `timestamp` down to the start of its containing interval.
    ///
    /// Uses Euclidean division so pre-epoch timestamps round toward negative
    /// infinity instead of toward zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrd::RingKind;
    ///
    /// assert_eq!(RingKind::Minutes.truncate(1_484_026_962), 1_484_026_920);
    /// assert_eq!(RingKind::Hours.truncate(1_484_026_962), 1_484_024_400);
    /// assert_eq!(RingKind::Minutes.truncate(-1), -60);
    /// ```
    ///
    /// Stored timestamps are already interval starts and always truncate in
    /// range. Use [`RingKind::checked_truncate`] for arbitrary input.
    #[inline]
    pub const fn truncate(self, timestamp: i64) -> i64 {
        let interval = self.interval_secs();
        timestamp.div_euclid(interval) * interval
    }

    /// Like [`RingKind::truncate`], but returns `None` when the interval
    /// start lies below `i64::MIN`.
    ///
    /// ```rust
    /// use rrd::RingKind;
    ///
    /// assert_eq!(RingKind::Hours.checked_truncate(3599), Some(0));
    /// assert_eq!(RingKind::Minutes.checked_truncate(i64::MIN), None);
    /// ```
    #[inline]
    pub const fn checked_truncate(self, timestamp: i64) -> Option<i64> {
        let interval = self.interval_secs();
        timestamp.div_euclid(interval).checked_mul(interval)
    }

    /// Returns the slot that follows `index`, wrapping at capacity.
    ///
    /// An `index` of `-1` (the "never written" default) yields slot 0.
    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rem_euclid of a small capacity
    pub fn next_slot(self, index: i64) -> usize {
        (index + 1).rem_euclid(self.capacity() as i64) as usize
    }
}

impl fmt::Display for RingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RingKind {
    type Err = ArgumentError;

    /// Parses `minute`, `minutes`, `hour` or `hours`, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(Self::Minutes),
            "hour" | "hours" => Ok(Self::Hours),
            _ => Err(ArgumentError::UnknownRing {
                name: s.to_string(),
            }),
        }
    }
}

/// One ring slot: a timestamp and a value, either of which may be absent.
///
/// A slot with both fields absent has never been written. A slot with a
/// timestamp but no value is a gap-fill placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Interval start in seconds since the Unix epoch.
    pub timestamp: Option<i64>,
    /// Recorded value.
    pub value: Option<f64>,
}

impl Sample {
    /// The unwritten slot.
    pub const EMPTY: Sample = Sample {
        timestamp: None,
        value: None,
    };

    /// Creates a sample holding a real value.
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            value: Some(value),
        }
    }

    /// Creates a gap-fill placeholder for an interval with no data.
    pub const fn placeholder(timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            value: None,
        }
    }

    /// Returns `true` if the slot has never been written.
    pub const fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.value.is_none()
    }

    /// Returns `true` if the slot marks an interval without data.
    pub const fn is_placeholder(&self) -> bool {
        self.timestamp.is_some() && self.value.is_none()
    }
}

impl From<(Option<i64>, Option<f64>)> for Sample {
    fn from((timestamp, value): (Option<i64>, Option<f64>)) -> Self {
        Self { timestamp, value }
    }
}

impl From<Sample> for (Option<i64>, Option<f64>) {
    fn from(sample: Sample) -> Self {
        (sample.timestamp, sample.value)
    }
}

/// Builds the samples appended to `ring` when `value` arrives at `current`.
///
/// `last` is the ring's last written interval start, if any. Every whole
/// interval strictly between `last` and `current` gets a placeholder, oldest
/// first, capped at `capacity - 1` so the batch never exceeds the ring. The
/// real sample is always last.
///
/// # Examples
///
/// ```rust
/// use rrd::RingKind;
/// use rrd::ring::{gap_fill, Sample};
///
/// let batch = gap_fill(RingKind::Minutes, Some(360), 480, 60.0);
/// assert_eq!(batch, vec![Sample::placeholder(420), Sample::new(480, 60.0)]);
/// ```
pub fn gap_fill(ring: RingKind, last: Option<i64>, current: i64, value: f64) -> Vec<Sample> {
    let step = ring.interval_secs();
    let missing = match last {
        Some(last) => (current.saturating_sub(last) / step - 1).max(0),
        None => 0,
    };
    #[allow(clippy::cast_possible_wrap)] // capacity is at most 60
    let placeholders = missing.min(ring.capacity() as i64 - 1);

    let mut batch: Vec<Sample> = (1..=placeholders)
        .rev()
        .map(|k| Sample::placeholder(current - k * step))
        .collect();
    batch.push(Sample::new(current, value));
    batch
}

/// Rotates raw slot order so the slot after `index` comes first.
///
/// Returns `slots[index+1..] ++ slots[..=index]`, turning ring position into
/// chronological position without moving stored data.
pub fn rotate_chronological(mut slots: Vec<Sample>, index: i64) -> Vec<Sample> {
    if slots.is_empty() {
        return slots;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    let mid = (index + 1).rem_euclid(slots.len() as i64) as usize;
    slots.rotate_left(mid);
    slots
}
