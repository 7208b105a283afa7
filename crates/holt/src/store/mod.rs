//! Sharded storage: shared types, key codec, shards, and the registry.
//!
//! A [`Shard`] holds one contiguous time range of points in an ordered
//! key-value store; the [`ShardDatastore`] owns every shard on this node.

pub mod datastore;
pub mod keys;
pub mod shard;

pub use datastore::{ShardDatastore, WriteBuffer};
pub use shard::{QueryRows, Shard, ShardReader, MAX_SERIES_SIZE};

use serde::{Deserialize, Serialize};

use crate::error::{HoltError, Result};

/// Interned identifier for a (database, series, column) triple, unique
/// within one shard.
pub type FieldId = u64;

/// A typed scalar stored for one column of one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit float.
    Float(f64),
    /// Signed 64-bit integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
}

impl FieldValue {
    /// Serializes the value for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|err| HoltError::EncodeFailed(err.to_string()))
    }

    /// Deserializes a stored value. Malformed bytes mean the store itself
    /// is damaged.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|err| HoltError::CorruptStore(format!("bad field value: {err}")))
    }
}

/// One point of a series batch. `values` is aligned to the batch's column
/// list; `None` leaves that column unset for this point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in milliseconds.
    pub time: i64,
    /// Per-write tiebreaker; `(time, sequence)` totally orders one field.
    pub sequence: u64,
    /// Column values, aligned to [`SeriesBatch::columns`].
    pub values: Vec<Option<FieldValue>>,
}

/// All points written to one series in one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBatch {
    /// Series name.
    pub name: String,
    /// Column names, positionally matching each point's values.
    pub columns: Vec<String>,
    /// Points to write.
    pub points: Vec<Point>,
}

/// Inclusive time range for queries and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: i64,
    /// Inclusive end.
    pub end: i64,
}

impl TimeRange {
    /// Creates a range covering `[start, end]`.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The full time domain.
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Returns true if the timestamp falls inside the range.
    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Scan direction for queries. Queries default to newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Oldest point first; ties on time resolve to the smaller sequence.
    Ascending,
    /// Newest point first; ties on time resolve to the larger sequence.
    #[default]
    Descending,
}

/// One merged row returned by a query: every requested column observed at
/// one `(time, sequence)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Timestamp of the row.
    pub time: i64,
    /// Sequence number of the row.
    pub sequence: u64,
    /// Values aligned to the queried column list; `None` where the column
    /// has no point at this `(time, sequence)`.
    pub values: Vec<Option<FieldValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_roundtrip() {
        for value in [
            FieldValue::Float(23.5),
            FieldValue::Int(-9),
            FieldValue::Bool(true),
            FieldValue::Str("fast".to_string()),
        ] {
            let bytes = value.encode().unwrap();
            assert_eq!(FieldValue::decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_field_value_decode_garbage() {
        assert!(matches!(
            FieldValue::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(HoltError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
        assert!(TimeRange::all().contains(i64::MIN));
    }
}
