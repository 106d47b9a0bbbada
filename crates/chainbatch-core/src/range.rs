//! Block-height ranges and the interval operations the scheduler is built on.
//!
//! A [`Range`] is inclusive on both ends; `to == None` means the range is
//! open-ended. All interval edge cases live in this module, the batch builder
//! and merger only go through [`Range::intersection`], [`Range::difference`]
//! and [`Range::end`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// An inclusive block-height interval, optionally unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// First height (inclusive).
    pub from: u64,
    /// Last height (inclusive); `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

/// Upper end of a range, ordered so that `Unbounded` sorts after every height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RangeEnd {
    Height(u64),
    Unbounded,
}

impl RangeEnd {
    /// Returns the finite height, if any.
    pub fn height(self) -> Option<u64> {
        match self {
            Self::Height(h) => Some(h),
            Self::Unbounded => None,
        }
    }

    /// Returns `true` if `height` is strictly below this end.
    pub fn is_above(self, height: u64) -> bool {
        self > Self::Height(height)
    }
}

impl Range {
    /// Create a closed range `[from, to]`, rejecting `from > to`.
    pub fn new(from: u64, to: u64) -> Result<Self, IndexerError> {
        if from > to {
            return Err(IndexerError::InvalidRange { from, to });
        }
        Ok(Self { from, to: Some(to) })
    }

    /// Create an open-ended range `[from, ∞)`.
    pub fn from(from: u64) -> Self {
        Self { from, to: None }
    }

    /// The whole height line `[0, ∞)`.
    pub fn all() -> Self {
        Self::from(0)
    }

    /// Check `from <= to` for ranges built from untrusted input (e.g. serde).
    pub fn validate(&self) -> Result<(), IndexerError> {
        match self.to {
            Some(to) if self.from > to => Err(IndexerError::InvalidRange { from: self.from, to }),
            _ => Ok(()),
        }
    }

    /// Upper end of the range.
    pub fn end(&self) -> RangeEnd {
        match self.to {
            Some(to) => RangeEnd::Height(to),
            None => RangeEnd::Unbounded,
        }
    }

    /// Returns `true` if `height` lies inside the range.
    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && self.to.map_or(true, |to| height <= to)
    }

    /// The overlap of two ranges, or `None` if they are disjoint.
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        let from = self.from.max(other.from);
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        match to {
            Some(to) if from > to => None,
            _ => Some(Range { from, to }),
        }
    }

    /// The parts of `self` not covered by `other`: left remainder first, then
    /// right remainder. Zero, one or two ranges.
    pub fn difference(&self, other: &Range) -> Vec<Range> {
        let Some(shared) = self.intersection(other) else {
            return vec![*self];
        };
        let mut out = Vec::with_capacity(2);
        if shared.from > self.from {
            out.push(Range {
                from: self.from,
                to: Some(shared.from - 1),
            });
        }
        if let RangeEnd::Height(shared_to) = shared.end() {
            // Nothing lies above `u64::MAX`.
            if let Some(next) = shared_to.checked_add(1) {
                if self.end().is_above(shared_to) {
                    out.push(Range {
                        from: next,
                        to: self.to,
                    });
                }
            }
        }
        out
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {}]", self.from, to),
            None => write!(f, "[{}, ∞)", self.from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(from: u64, to: u64) -> Range {
        Range::new(from, to).unwrap()
    }

    #[test]
    fn new_rejects_inverted() {
        assert!(matches!(
            Range::new(5, 4),
            Err(IndexerError::InvalidRange { from: 5, to: 4 })
        ));
        assert!(Range::new(4, 4).is_ok());
    }

    #[test]
    fn validate_catches_deserialized_inverted_range() {
        let bad: Range = serde_json::from_str(r#"{"from":10,"to":3}"#).unwrap();
        assert!(bad.validate().is_err());
        let open: Range = serde_json::from_str(r#"{"from":10}"#).unwrap();
        assert_eq!(open, Range::from(10));
    }

    #[test]
    fn contains_bounds() {
        let a = r(3, 5);
        assert!(!a.contains(2));
        assert!(a.contains(3));
        assert!(a.contains(5));
        assert!(!a.contains(6));
        assert!(Range::from(3).contains(u64::MAX));
    }

    #[test]
    fn intersection_closed() {
        assert_eq!(r(0, 10).intersection(&r(5, 20)), Some(r(5, 10)));
        assert_eq!(r(0, 4).intersection(&r(5, 9)), None);
        assert_eq!(r(0, 5).intersection(&r(5, 9)), Some(r(5, 5)));
    }

    #[test]
    fn intersection_open() {
        assert_eq!(r(0, 10).intersection(&Range::from(5)), Some(r(5, 10)));
        assert_eq!(Range::from(3).intersection(&Range::from(7)), Some(Range::from(7)));
        assert_eq!(r(0, 2).intersection(&Range::from(3)), None);
    }

    #[test]
    fn difference_splits_both_sides() {
        assert_eq!(r(0, 10).difference(&r(3, 5)), vec![r(0, 2), r(6, 10)]);
        assert_eq!(Range::from(0).difference(&r(3, 5)), vec![r(0, 2), Range::from(6)]);
    }

    #[test]
    fn difference_one_or_none() {
        assert_eq!(r(0, 10).difference(&Range::from(5)), vec![r(0, 4)]);
        assert_eq!(Range::from(5).difference(&r(0, 10)), vec![Range::from(11)]);
        assert!(r(3, 5).difference(&r(0, 10)).is_empty());
        assert!(Range::from(3).difference(&Range::from(0)).is_empty());
    }

    #[test]
    fn difference_at_top_of_height_space() {
        assert_eq!(Range::from(0).difference(&r(5, u64::MAX)), vec![r(0, 4)]);
        assert!(Range::from(7).difference(&r(0, u64::MAX)).is_empty());
        assert_eq!(r(0, u64::MAX).difference(&r(0, u64::MAX - 1)), vec![r(u64::MAX, u64::MAX)]);
    }

    #[test]
    fn difference_of_disjoint_is_self() {
        assert_eq!(r(0, 4).difference(&r(5, 9)), vec![r(0, 4)]);
    }

    #[test]
    fn range_end_orders_unbounded_last() {
        assert!(RangeEnd::Unbounded > RangeEnd::Height(u64::MAX));
        assert!(Range::from(0).end().is_above(u64::MAX));
        assert_eq!(r(1, 9).end().height(), Some(9));
    }

    #[test]
    fn display() {
        assert_eq!(r(1, 2).to_string(), "[1, 2]");
        assert_eq!(Range::from(7).to_string(), "[7, ∞)");
    }
}
