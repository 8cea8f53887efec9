//! Segment metadata read by the placement engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive range of values a segment holds for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn single(value: i64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// Number of distinct values covered by the range.
    pub fn width(&self) -> u128 {
        (i128::from(self.max) - i128::from(self.min) + 1) as u128
    }
}

/// Metadata describing a segment being registered with a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub name: String,
    pub table: String,
    pub crc: Option<String>,
    /// Observed value ranges, keyed by column name.
    #[serde(default)]
    pub column_ranges: BTreeMap<String, Vec<ValueRange>>,
}

impl SegmentMetadata {
    pub fn new(table: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            crc: None,
            column_ranges: BTreeMap::new(),
        }
    }

    pub fn with_crc(mut self, crc: &str) -> Self {
        self.crc = Some(crc.to_string());
        self
    }

    /// Record that the segment holds values in `range` for `column`.
    pub fn with_column_range(mut self, column: &str, range: ValueRange) -> Self {
        self.column_ranges
            .entry(column.to_string())
            .or_default()
            .push(range);
        self
    }

    pub fn value_ranges(&self, column: &str) -> Option<&[ValueRange]> {
        self.column_ranges
            .get(column)
            .map(Vec::as_slice)
            .filter(|ranges| !ranges.is_empty())
    }
}
