//! Index holes
//!
//! A hole declares a (date window, datatype set) where the secondary index
//! is known incomplete. Inside a hole the planner must not rely on the
//! index for matching datatypes and forces raw-record evaluation.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::scan::ShardRange;

/// One declared index hole. The date window is inclusive on both ends; an
/// empty datatype set means the hole applies to every datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHole {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_types: BTreeSet<String>,
}

impl IndexHole {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            data_types: BTreeSet::new(),
        }
    }

    pub fn with_data_type(mut self, dt: impl Into<String>) -> Self {
        self.data_types.insert(dt.into());
        self
    }

    /// True when this hole covers the given shard date and datatype.
    pub fn covers(&self, date: NaiveDate, datatype: &str) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        self.data_types.is_empty() || self.data_types.contains(datatype)
    }

    /// True when any shard in the range falls inside the hole's date
    /// window for any of the given datatypes. A range without a parseable
    /// date prefix is treated as holed conservatively when holes exist.
    pub fn covers_range(&self, range: &ShardRange, data_types: &BTreeSet<String>) -> bool {
        let (start, end) = match (range.start_date(), range.end_date()) {
            (Some(s), Some(e)) => (s, e),
            _ => return true,
        };
        if end < self.start_date || start > self.end_date {
            return false;
        }
        if self.data_types.is_empty() || data_types.is_empty() {
            return true;
        }
        data_types.iter().any(|dt| self.data_types.contains(dt))
    }
}

/// Returns true when any hole in the list covers the range/datatypes.
pub fn range_is_holed(
    holes: &[IndexHole],
    range: &ShardRange,
    data_types: &BTreeSet<String>,
) -> bool {
    holes.iter().any(|h| h.covers_range(range, data_types))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_hole_covers_date_window() {
        let hole = IndexHole::new(date(2024, 3, 1), date(2024, 3, 3)).with_data_type("d1");
        assert!(hole.covers(date(2024, 3, 2), "d1"));
        assert!(!hole.covers(date(2024, 3, 4), "d1"));
        assert!(!hole.covers(date(2024, 3, 2), "d2"));
    }

    #[test]
    fn test_empty_datatype_set_matches_all() {
        let hole = IndexHole::new(date(2024, 3, 1), date(2024, 3, 3));
        assert!(hole.covers(date(2024, 3, 1), "anything"));
    }

    #[test]
    fn test_covers_range_overlap() {
        let hole = IndexHole::new(date(2024, 3, 1), date(2024, 3, 3)).with_data_type("d1");
        let inside = ShardRange::single("20240302_0");
        let outside = ShardRange::single("20240310_0");
        let d1: BTreeSet<String> = ["d1".to_string()].into_iter().collect();
        let d2: BTreeSet<String> = ["d2".to_string()].into_iter().collect();

        assert!(hole.covers_range(&inside, &d1));
        assert!(!hole.covers_range(&outside, &d1));
        assert!(!hole.covers_range(&inside, &d2));
    }
}
