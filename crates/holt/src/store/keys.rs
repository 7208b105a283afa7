//! On-disk key layouts for shard stores.
//!
//! This module is the only place that knows the byte-level layout of shard
//! keys. Every other component consumes and produces typed values through
//! the encode/decode functions here.
//!
//! ## Key Layouts
//!
//! ```text
//! Point:            [ field_id : u64 BE ][ time : biased i64 BE ][ sequence : u64 BE ]
//! Next-id counter:  [ 0x00 x 8 ]
//! Series -> column: [ 0xFF x 7, 0xFE ][ db ][ 0x00 ][ series ][ 0x00 ][ column ]
//! Db -> series:     [ 0xFF x 7, 0xFF ][ db ][ 0x00 ][ series ]
//! Named counter:    [ 0xFF x 7, 0xFD ][ name ]
//! ```
//!
//! Timestamps are biased (sign bit flipped) so that byte-wise lexical
//! order over the encoded key equals chronological order.

use crate::error::{HoltError, Result};
use crate::store::FieldId;

/// Length of an encoded point key.
pub const POINT_KEY_LEN: usize = 24;

/// Key of the per-shard counter allocating field ids.
pub const NEXT_ID_KEY: [u8; 8] = [0x00; 8];

/// Prefix of the series-to-column-names index.
pub const SERIES_COLUMN_INDEX_PREFIX: [u8; 8] =
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE];

/// Prefix of the database-to-series-names index.
pub const DATABASE_SERIES_INDEX_PREFIX: [u8; 8] =
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Prefix of persistent named counters.
pub const ATOMIC_COUNTER_PREFIX: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFD];

/// Sentinel sequence used as an upper bound on range scans. Never assigned
/// to a stored point.
pub const MAX_SEQUENCE: u64 = u64::MAX;

const TIME_SIGN_BIAS: u64 = 1 << 63;

/// Encodes a timestamp so lexical byte order equals chronological order.
pub fn time_to_ordered(time: i64) -> [u8; 8] {
    ((time as u64) ^ TIME_SIGN_BIAS).to_be_bytes()
}

/// Decodes a biased timestamp back to its signed value.
pub fn ordered_to_time(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ TIME_SIGN_BIAS) as i64
}

/// Builds the key for one point of one field.
pub fn point_key(field_id: FieldId, time: i64, sequence: u64) -> [u8; POINT_KEY_LEN] {
    let mut key = [0u8; POINT_KEY_LEN];
    key[0..8].copy_from_slice(&field_id.to_be_bytes());
    key[8..16].copy_from_slice(&time_to_ordered(time));
    key[16..24].copy_from_slice(&sequence.to_be_bytes());
    key
}

/// Returns true if the key belongs to the given field's point range.
pub fn point_key_matches_field(key: &[u8], field_id: FieldId) -> bool {
    key.len() >= 8 && key[0..8] == field_id.to_be_bytes()
}

/// Parses a point key into `(field_id, time, sequence)`.
pub fn parse_point_key(key: &[u8]) -> Result<(FieldId, i64, u64)> {
    if key.len() != POINT_KEY_LEN {
        return Err(HoltError::CorruptKey(format!(
            "point key is {} bytes, expected {}",
            key.len(),
            POINT_KEY_LEN
        )));
    }
    let field_id = u64::from_be_bytes(key[0..8].try_into().unwrap());
    let time = ordered_to_time(key[8..16].try_into().unwrap());
    let sequence = u64::from_be_bytes(key[16..24].try_into().unwrap());
    Ok((field_id, time, sequence))
}

/// Encodes a field id for storage as an index value.
pub fn field_id_value(field_id: FieldId) -> [u8; 8] {
    field_id.to_be_bytes()
}

/// Parses a stored field id.
pub fn parse_field_id(value: &[u8]) -> Result<FieldId> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        HoltError::CorruptKey(format!("field id is {} bytes, expected 8", value.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Builds the series-to-columns index key for one column.
pub fn series_column_key(database: &str, series: &str, column: &str) -> Vec<u8> {
    let mut key = series_column_prefix(database, series);
    key.extend_from_slice(column.as_bytes());
    key
}

/// Builds the prefix covering every column of one series.
pub fn series_column_prefix(database: &str, series: &str) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(SERIES_COLUMN_INDEX_PREFIX.len() + database.len() + series.len() + 2);
    key.extend_from_slice(&SERIES_COLUMN_INDEX_PREFIX);
    key.extend_from_slice(database.as_bytes());
    key.push(0x00);
    key.extend_from_slice(series.as_bytes());
    key.push(0x00);
    key
}

/// Extracts the column name from a series-to-columns key, given the prefix
/// it was scanned under.
pub fn column_from_series_column_key<'k>(key: &'k [u8], prefix: &[u8]) -> Result<&'k str> {
    let suffix = key.strip_prefix(prefix).ok_or_else(|| {
        HoltError::CorruptKey("series column key does not match its scan prefix".into())
    })?;
    std::str::from_utf8(suffix)
        .map_err(|_| HoltError::CorruptKey("column name is not valid UTF-8".into()))
}

/// Builds the database-to-series index key for one series.
pub fn database_series_key(database: &str, series: &str) -> Vec<u8> {
    let mut key = database_series_prefix(database);
    key.extend_from_slice(series.as_bytes());
    key
}

/// Builds the prefix covering every series of one database.
pub fn database_series_prefix(database: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(DATABASE_SERIES_INDEX_PREFIX.len() + database.len() + 1);
    key.extend_from_slice(&DATABASE_SERIES_INDEX_PREFIX);
    key.extend_from_slice(database.as_bytes());
    key.push(0x00);
    key
}

/// Extracts the series name from a database-to-series key, given the prefix
/// it was scanned under.
pub fn series_from_database_series_key<'k>(key: &'k [u8], prefix: &[u8]) -> Result<&'k str> {
    let suffix = key.strip_prefix(prefix).ok_or_else(|| {
        HoltError::CorruptKey("database series key does not match its scan prefix".into())
    })?;
    std::str::from_utf8(suffix)
        .map_err(|_| HoltError::CorruptKey("series name is not valid UTF-8".into()))
}

/// Builds the key of a persistent named counter.
pub fn counter_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ATOMIC_COUNTER_PREFIX.len() + name.len());
    key.extend_from_slice(&ATOMIC_COUNTER_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Encodes a counter value.
pub fn counter_value(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Parses a stored counter value.
pub fn parse_counter_value(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        HoltError::CorruptKey(format!("counter value is {} bytes, expected 8", value.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}
