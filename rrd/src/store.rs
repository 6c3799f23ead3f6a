//! Store module for the rrd round-robin engine.
//!
//! This module provides the top-level API that ties the ring model and a
//! storage backend together. The [`Store`] owns one backend and implements
//! the two operations callers use: chronological [`Store::query`] and the
//! gap-filling [`Store::save`].
//!
//! # Save Flow
//!
//! ```text
//! save(ts, v)
//!   ├─ minute_ts < last     -> SaveError::OutOfOrder (nothing written)
//!   ├─ minute_ts == last    -> fold minute slot, fold hour slot
//!   └─ minute_ts > last     -> write_batch(minute placeholders + sample,
//!                                          hour placeholders + sample)
//!                              or, same hour: write minutes, fold hour slot
//! ```
//!
//! The minute ring is the source of truth for every later gap computation,
//! so its samples are always applied before any hour change.
//!
//! # Example Usage
//!
//! ```rust
//! use rrd::{Backing, RingKind, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open(&Backing::sqlite(":memory:"))?;
//!
//! store.save(60, 25.0)?;
//! store.save(180, 30.0)?; // leaves a placeholder at 120
//!
//! let minutes = store.query(RingKind::Minutes)?;
//! let tail: Vec<_> = minutes[57..].iter().map(|s| (s.timestamp, s.value)).collect();
//! assert_eq!(tail, vec![(Some(60), Some(25.0)), (Some(120), None), (Some(180), Some(30.0))]);
//! # Ok(())
//! # }
//! ```

use crate::aggregation::Aggregation;
use crate::backend::{self, Backend, Backing, WriteBatch};
use crate::error::{ArgumentError, Result, SaveError};
use crate::ring::{RingKind, Sample, gap_fill, rotate_chronological};

/// What a successful [`Store::save`] did to the rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The first sample ever saved; both rings received one entry.
    Created,

    /// A new minute was appended.
    Appended {
        /// Placeholder minutes written before the sample.
        minute_placeholders: usize,
        /// Placeholder hours written before the sample.
        hour_placeholders: usize,
        /// Whether the sample opened a new hour slot (otherwise it was folded
        /// into the current one).
        new_hour: bool,
    },

    /// The sample fell in the last saved minute and was folded in place.
    Folded,
}

/// Top-level handle for a two-resolution round-robin store.
///
/// # Thread Safety
///
/// The Store is designed for single-threaded access patterns. External
/// synchronization must be provided if used across multiple threads, and
/// only one process should open a given backing at a time.
#[derive(Debug)]
pub struct Store {
    /// Storage backend holding both rings.
    backend: Box<dyn Backend>,
    /// Rule used when a sample lands in an existing slot.
    aggregation: Aggregation,
}

impl Store {
    /// Opens the store described by `backing`, initializing it if new.
    ///
    /// # Errors
    ///
    /// Returns an argument error for an engine not available in this build,
    /// or a backend error if the store cannot be opened.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use rrd::{Backing, Store};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = Store::open(&"sqlite:./rrd-data.db".parse::<Backing>()?)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(backing: &Backing) -> Result<Self> {
        Ok(Self::from_boxed(backend::open(backing)?))
    }

    /// Wraps an already opened backend.
    pub fn with_backend<B: Backend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    fn from_boxed(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            aggregation: Aggregation::default(),
        }
    }

    /// Sets the rule used to fold samples into existing slots.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Returns the folding rule in use.
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns the most recently saved minute timestamp.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.backend.last_timestamp()
    }

    /// Returns the hour containing [`Store::last_timestamp`].
    pub fn last_hour_timestamp(&self) -> Option<i64> {
        self.backend.last_hour_timestamp()
    }

    /// Returns the value stored for `timestamp` in `ring`, if any.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lookup fails.
    pub fn get_value(&self, ring: RingKind, timestamp: i64) -> Result<Option<f64>> {
        self.backend.get_value(ring, timestamp)
    }

    /// Returns every slot of `ring`, oldest first.
    ///
    /// The slot after the ring's last written one is the oldest, so the raw
    /// slots are rotated around it. Unwritten slots come first as
    /// [`Sample::EMPTY`] until the ring has filled once.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ring cannot be read.
    pub fn query(&self, ring: RingKind) -> Result<Vec<Sample>> {
        let slots = self.backend.read_all(ring)?;
        let anchor = self.backend.last_timestamp().map(|ts| ring.truncate(ts));
        let index = self.backend.resolve_index(ring, anchor, 0)?;
        Ok(rotate_chronological(slots, index))
    }

    /// Returns the minute ring, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ring cannot be read.
    pub fn minutes(&self) -> Result<Vec<Sample>> {
        self.query(RingKind::Minutes)
    }

    /// Returns the hour ring, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ring cannot be read.
    pub fn hours(&self) -> Result<Vec<Sample>> {
        self.query(RingKind::Hours)
    }

    /// Saves `value` at `timestamp` (seconds since the Unix epoch).
    ///
    /// The timestamp is truncated to its minute and hour. A save in the last
    /// saved minute is folded into that minute's slot and the hour slot; a
    /// later minute is appended after placeholders for every skipped minute
    /// (at most 59) and, when the hour changes, every skipped hour (at most
    /// 23).
    ///
    /// # Errors
    ///
    /// - [`ArgumentError::NonFiniteValue`] if `value` is NaN or infinite
    /// - [`ArgumentError::TimestampOutOfRange`] if the hour containing
    ///   `timestamp` starts before `i64::MIN`
    /// - [`SaveError::OutOfOrder`] if the minute is older than the last saved
    ///   minute; nothing is written
    /// - a backend error if persisting fails
    pub fn save(&mut self, timestamp: i64, value: f64) -> Result<SaveOutcome> {
        if !value.is_finite() {
            return Err(ArgumentError::NonFiniteValue { value }.into());
        }

        let minute_ts = checked_truncate(RingKind::Minutes, timestamp)?;
        let hour_ts = checked_truncate(RingKind::Hours, timestamp)?;
        let last = self.backend.last_timestamp();

        if let Some(last) = last {
            if minute_ts < last {
                return Err(SaveError::OutOfOrder {
                    timestamp: minute_ts,
                    last_timestamp: last,
                }
                .into());
            }
            if minute_ts == last {
                self.fold(RingKind::Minutes, minute_ts, value)?;
                self.fold(RingKind::Hours, hour_ts, value)?;
                tracing::debug!(minute_ts, value, "folded sample into current minute");
                return Ok(SaveOutcome::Folded);
            }
        }

        let last_hour = last.map(|ts| RingKind::Hours.truncate(ts));
        let same_hour = last_hour == Some(hour_ts);

        let minutes = gap_fill(RingKind::Minutes, last, minute_ts, value);
        let hours = if same_hour {
            Vec::new()
        } else {
            gap_fill(RingKind::Hours, last_hour, hour_ts, value)
        };

        let outcome = match last {
            None => SaveOutcome::Created,
            Some(_) => SaveOutcome::Appended {
                minute_placeholders: minutes.len() - 1,
                hour_placeholders: hours.len().saturating_sub(1),
                new_hour: !same_hour,
            },
        };

        self.backend.write_batch(&WriteBatch { minutes, hours })?;

        if same_hour {
            self.fold(RingKind::Hours, hour_ts, value)?;
        }

        if let SaveOutcome::Appended {
            minute_placeholders,
            hour_placeholders,
            ..
        } = outcome
        {
            if minute_placeholders > 0 || hour_placeholders > 0 {
                tracing::debug!(
                    minute_ts,
                    minute_placeholders,
                    hour_placeholders,
                    "filled gap before sample"
                );
            }
        }

        Ok(outcome)
    }

    /// Folds `value` into the existing slot for `timestamp`.
    fn fold(&mut self, ring: RingKind, timestamp: i64, value: f64) -> Result<()> {
        let existing = self.backend.get_value(ring, timestamp)?;
        let folded = self.aggregation.fold(existing, value);
        self.backend.update(ring, timestamp, folded)
    }

    /// Closes the store, reporting any error raised by the backend.
    ///
    /// Dropping the store releases the backend as well.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the underlying handle fails to close.
    pub fn close(self) -> Result<()> {
        self.backend.close()
    }
}

fn checked_truncate(ring: RingKind, timestamp: i64) -> Result<i64> {
    ring.checked_truncate(timestamp)
        .ok_or_else(|| ArgumentError::TimestampOutOfRange { timestamp, ring }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KeyValueBackend, MemoryStore, SqliteBackend};
    use crate::error::RrdError;

    fn stores() -> Vec<Store> {
        vec![
            Store::with_backend(SqliteBackend::open_in_memory().unwrap()),
            Store::with_backend(KeyValueBackend::open(MemoryStore::new()).unwrap()),
        ]
    }

    fn present(samples: &[Sample]) -> Vec<(i64, Option<f64>)> {
        samples
            .iter()
            .filter_map(|s| s.timestamp.map(|ts| (ts, s.value)))
            .collect()
    }

    #[test]
    fn test_empty_store_query() {
        for store in stores() {
            let minutes = store.query(RingKind::Minutes).unwrap();
            assert_eq!(minutes.len(), 60);
            assert!(minutes.iter().all(Sample::is_empty));
            assert_eq!(store.hours().unwrap().len(), 24);
            assert_eq!(store.last_timestamp(), None);
        }
    }

    #[test]
    fn test_first_save_creates_both_rings() {
        for mut store in stores() {
            let outcome = store.save(1_484_059_362, 12.5).unwrap();
            assert_eq!(outcome, SaveOutcome::Created);
            assert_eq!(store.last_timestamp(), Some(1_484_059_320));
            assert_eq!(store.last_hour_timestamp(), Some(1_484_056_800));

            let minutes = store.minutes().unwrap();
            assert_eq!(minutes[59], Sample::new(1_484_059_320, 12.5));
            assert!(minutes[..59].iter().all(Sample::is_empty));

            let hours = store.hours().unwrap();
            assert_eq!(hours[23], Sample::new(1_484_056_800, 12.5));
        }
    }

    #[test]
    fn test_same_minute_folds_to_minimum() {
        for mut store in stores() {
            store.save(60, 30.0).unwrap();
            assert_eq!(store.save(75, 20.0).unwrap(), SaveOutcome::Folded);
            assert_eq!(store.save(119, 40.0).unwrap(), SaveOutcome::Folded);

            assert_eq!(present(&store.minutes().unwrap()), vec![(60, Some(20.0))]);
            assert_eq!(store.get_value(RingKind::Hours, 0).unwrap(), Some(20.0));
        }
    }

    #[test]
    fn test_same_hour_folds_hour_slot() {
        for mut store in stores() {
            store.save(60, 30.0).unwrap();
            let outcome = store.save(120, 10.0).unwrap();
            assert_eq!(
                outcome,
                SaveOutcome::Appended {
                    minute_placeholders: 0,
                    hour_placeholders: 0,
                    new_hour: false
                }
            );
            store.save(180, 50.0).unwrap();

            assert_eq!(present(&store.hours().unwrap()), vec![(0, Some(10.0))]);
        }
    }

    #[test]
    fn test_gap_inserts_placeholders() {
        for mut store in stores() {
            store.save(0, 1.0).unwrap();
            let outcome = store.save(300, 2.0).unwrap();
            assert_eq!(
                outcome,
                SaveOutcome::Appended {
                    minute_placeholders: 4,
                    hour_placeholders: 0,
                    new_hour: false
                }
            );
            assert_eq!(
                present(&store.minutes().unwrap()),
                vec![
                    (0, Some(1.0)),
                    (60, None),
                    (120, None),
                    (180, None),
                    (240, None),
                    (300, Some(2.0)),
                ]
            );
        }
    }

    #[test]
    fn test_out_of_order_rejected_without_changes() {
        for mut store in stores() {
            store.save(600, 5.0).unwrap();
            let before_minutes = store.minutes().unwrap();
            let before_hours = store.hours().unwrap();

            let err = store.save(540, 1.0).unwrap_err();
            assert!(matches!(
                err,
                RrdError::Save(SaveError::OutOfOrder {
                    timestamp: 540,
                    last_timestamp: 600
                })
            ));

            assert_eq!(store.last_timestamp(), Some(600));
            assert_eq!(store.minutes().unwrap(), before_minutes);
            assert_eq!(store.hours().unwrap(), before_hours);
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for mut store in stores() {
            for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                let err = store.save(60, value).unwrap_err();
                assert!(matches!(
                    err,
                    RrdError::InvalidArgument(ArgumentError::NonFiniteValue { .. })
                ));
            }
            assert_eq!(store.last_timestamp(), None);
        }
    }

    #[test]
    fn test_timestamp_below_range_rejected() {
        for mut store in stores() {
            match store.save(i64::MIN, 1.0) {
                Err(RrdError::InvalidArgument(ArgumentError::TimestampOutOfRange {
                    timestamp,
                    ..
                })) => assert_eq!(timestamp, i64::MIN),
                other => panic!("Expected TimestampOutOfRange error, got: {:?}", other),
            }
            assert_eq!(store.last_timestamp(), None);
            assert!(store.minutes().unwrap().iter().all(Sample::is_empty));
        }
    }

    #[test]
    fn test_saves_at_opposite_ends_of_range() {
        for mut store in stores() {
            store.save(-9_000_000_000_000_000_000, 1.0).unwrap();
            let outcome = store.save(9_000_000_000_000_000_000, 2.0).unwrap();
            assert_eq!(
                outcome,
                SaveOutcome::Appended {
                    minute_placeholders: 59,
                    hour_placeholders: 23,
                    new_hour: true
                }
            );

            let last = RingKind::Minutes.truncate(9_000_000_000_000_000_000);
            assert_eq!(store.last_timestamp(), Some(last));
            assert_eq!(store.minutes().unwrap()[59], Sample::new(last, 2.0));
            assert!(store.hours().unwrap()[..23].iter().all(Sample::is_placeholder));
        }
    }

    #[test]
    fn test_max_aggregation() {
        for store in stores() {
            let mut store = store.with_aggregation(Aggregation::Max);
            assert_eq!(store.aggregation(), Aggregation::Max);
            store.save(60, 30.0).unwrap();
            store.save(70, 45.0).unwrap();
            store.save(120, 10.0).unwrap();

            assert_eq!(store.get_value(RingKind::Minutes, 60).unwrap(), Some(45.0));
            assert_eq!(store.get_value(RingKind::Hours, 0).unwrap(), Some(45.0));
        }
    }

    #[test]
    fn test_new_hour_after_gap() {
        for mut store in stores() {
            store.save(3500, 1.0).unwrap();
            let outcome = store.save(3 * 3600 + 30, 2.0).unwrap();
            assert_eq!(
                outcome,
                SaveOutcome::Appended {
                    minute_placeholders: 59,
                    hour_placeholders: 2,
                    new_hour: true
                }
            );
            assert_eq!(
                present(&store.hours().unwrap()),
                vec![(0, Some(1.0)), (3600, None), (7200, None), (10_800, Some(2.0))]
            );
            // The whole minute ring was replaced by the gap
            let minutes = store.minutes().unwrap();
            assert_eq!(minutes[0], Sample::placeholder(10_800 - 59 * 60));
            assert_eq!(minutes[59], Sample::new(10_800, 2.0));
        }
    }

    #[test]
    fn test_close() {
        for store in stores() {
            store.close().unwrap();
        }
    }
}
