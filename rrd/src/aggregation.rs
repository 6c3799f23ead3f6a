//! Folding rules for samples that land in an already written slot.
//!
//! A second save within the same minute, and every save after the first
//! within the same hour, is folded into the existing slot instead of taking a
//! new one. Only rules that can be computed from the stored value and the new
//! value alone are offered; an average would need a per-slot count the
//! persisted layout does not keep.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArgumentError;

/// How a new value is combined with the value already in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Keep the smaller value.
    #[default]
    Min,

    /// Keep the larger value.
    Max,

    /// Keep the newest value.
    Last,
}

impl Aggregation {
    /// Folds `value` into the slot's `existing` value.
    ///
    /// A slot without a value (a gap-fill placeholder) simply takes `value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrd::Aggregation;
    ///
    /// assert_eq!(Aggregation::Min.fold(Some(25.0), 30.0), 25.0);
    /// assert_eq!(Aggregation::Max.fold(Some(25.0), 30.0), 30.0);
    /// assert_eq!(Aggregation::Last.fold(Some(25.0), 20.0), 20.0);
    /// assert_eq!(Aggregation::Min.fold(None, 30.0), 30.0);
    /// ```
    pub fn fold(self, existing: Option<f64>, value: f64) -> f64 {
        let Some(existing) = existing else {
            return value;
        };

        match self {
            Self::Min => existing.min(value),
            Self::Max => existing.max(value),
            Self::Last => value,
        }
    }

    /// Returns the lowercase name of this rule.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Last => "last",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" | "minimum" => Ok(Self::Min),
            "max" | "maximum" => Ok(Self::Max),
            "last" => Ok(Self::Last),
            _ => Err(ArgumentError::UnknownAggregation { name: s.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_min() {
        assert_eq!(Aggregation::default(), Aggregation::Min);
    }

    #[test]
    fn test_fold_sequence() {
        let values = [50.0, 25.0, 35.0, 40.0];
        let mut slot = None;
        for v in values {
            slot = Some(Aggregation::Min.fold(slot, v));
        }
        assert_eq!(slot, Some(25.0));

        let mut slot = None;
        for v in values {
            slot = Some(Aggregation::Max.fold(slot, v));
        }
        assert_eq!(slot, Some(50.0));
    }

    #[test]
    fn test_parse() {
        assert_eq!("MIN".parse::<Aggregation>().unwrap(), Aggregation::Min);
        assert_eq!("maximum".parse::<Aggregation>().unwrap(), Aggregation::Max);
        assert_eq!("last".parse::<Aggregation>().unwrap(), Aggregation::Last);
        match "average".parse::<Aggregation>() {
            Err(ArgumentError::UnknownAggregation { name }) => assert_eq!(name, "average"),
            other => panic!("Expected UnknownAggregation error, got: {:?}", other),
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Aggregation::Last).unwrap();
        assert_eq!(json, "\"last\"");
    }
}
