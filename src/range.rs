use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    query::{case, lit, when, Expr},
    ArcStr,
};

/// Range where lower bound is inclusive, upper bound is exclusive or unbounded.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Range<T>(T, Option<T>);

impl<T> Range<T>
where
    T: Ord,
{
    pub fn new(from: T, to: Option<T>) -> Self {
        if let Some(ref to) = to {
            if from >= *to {
                panic!("ranges must go from low to high")
            }
        }
        Range(from, to)
    }

    pub fn contains(&self, val: &T) -> bool {
        if let Some(end) = &self.1 {
            val >= &self.0 && val < end
        } else {
            val >= &self.0
        }
    }
}

impl<T> fmt::Display for Range<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(end) = &self.1 {
            write!(f, "{} - {}", self.0, end)
        } else {
            write!(f, "{}+", self.0)
        }
    }
}

/// Labelled ranges, used to band a numeric value into categories.
///
/// Ranges are expected not to overlap; the first one containing a value wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeSet<T> {
    ranges: Vec<(Range<T>, ArcStr)>,
}

impl<T> RangeSet<T> {
    pub fn new() -> Self {
        Self { ranges: vec![] }
    }

    pub fn with(mut self, range: Range<T>, label: impl Into<ArcStr>) -> Self {
        self.ranges.push((range, label.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Range<T>, &str)> + '_ {
        self.ranges.iter().map(|(range, label)| (range, &**label))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.ranges.iter().map(|(_, label)| &**label)
    }
}

impl<T> RangeSet<T>
where
    T: Ord,
{
    /// The label of the range containing `value`, or `None` if the value is missing or out of
    /// every range.
    pub fn label_for(&self, value: Option<&T>) -> Option<&str> {
        let value = value?;
        self.iter()
            .find(|(range, _)| range.contains(value))
            .map(|(_, label)| label)
    }
}

impl<T> Default for RangeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeSet<i64> {
    /// Build a `case` expression that bands `value` using these ranges.
    ///
    /// Every branch tests both bounds, so a value outside every range (or a null) gets
    /// `default`.
    pub fn case_expr(&self, value: Expr, default: &str) -> Expr {
        case(
            self.ranges.iter().map(|(Range(from, to), label)| {
                let lower = value.clone().ge(*from);
                let condition = match to {
                    Some(to) => lower & value.clone().lt(*to),
                    None => lower,
                };
                when(condition).then(lit(&**label))
            }),
            default,
        )
    }
}
