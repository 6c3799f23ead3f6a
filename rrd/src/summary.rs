//! Descriptive statistics over a queried ring.

use std::fmt;

use serde::Serialize;

use crate::ring::Sample;

/// Count, minimum, mean, and maximum of the present values in a ring.
///
/// Empty slots and placeholders are skipped. All statistics are `None` when
/// no slot carries a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Number of slots carrying a value.
    pub count: usize,
    /// Smallest value.
    pub min: Option<f64>,
    /// Arithmetic mean of the values.
    pub avg: Option<f64>,
    /// Largest value.
    pub max: Option<f64>,
}

impl Summary {
    /// Summarizes the values in `samples`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrd::{Sample, Summary};
    ///
    /// let samples = [Sample::new(0, 2.0), Sample::placeholder(60), Sample::new(120, 4.0)];
    /// let summary = Summary::from_samples(&samples);
    /// assert_eq!(summary.count, 2);
    /// assert_eq!(summary.avg, Some(3.0));
    /// ```
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in samples.iter().filter_map(|s| s.value) {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return Self::default();
        }

        #[allow(clippy::cast_precision_loss)] // at most 60 slots
        let avg = sum / count as f64;
        Self {
            count,
            min: Some(min),
            avg: Some(avg),
            max: Some(max),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.avg, self.max) {
            (Some(min), Some(avg), Some(max)) => write!(
                f,
                "{} values: min {min:.2}, avg {avg:.2}, max {max:.2}",
                self.count
            ),
            _ => write!(f, "no values"),
        }
    }
}
