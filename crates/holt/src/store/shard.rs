//! One shard: durable storage of all points for a single time range.
//!
//! A shard owns an ordered key-value store plus the field-id interning
//! state for every (database, series, column) triple written to it. Writes
//! commit as atomic batches; queries merge per-field range scans into rows
//! ordered by `(time, sequence)`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use rocksdb::{BlockBasedOptions, Cache, DBRawIterator, Options, WriteBatch, DB};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{HoltError, Result};
use crate::store::keys;
use crate::store::{FieldId, FieldValue, QueryOrder, Row, SeriesBatch, TimeRange};

/// Cap on the encoded size of one series batch per write. Larger batches
/// must be split before reaching the shard.
pub const MAX_SERIES_SIZE: usize = 1024 * 1024;

/// In-memory view of the interning state. `last_id` mirrors the on-disk
/// counter and is seeded from it on first allocation.
#[derive(Default)]
struct FieldCache {
    ids: HashMap<Vec<u8>, FieldId>,
    last_id: Option<FieldId>,
}

/// Ids resolved or allocated during one write. Published to the shared
/// cache only after the batch commits, so a failed write leaves no
/// phantom mappings behind.
#[derive(Default)]
struct PendingIds {
    ids: HashMap<Vec<u8>, FieldId>,
    last_id: Option<FieldId>,
}

struct ShardDb {
    db: DB,
    fields: Mutex<FieldCache>,
}

/// A single time range of storage on this node.
///
/// Shards are created and owned by the
/// [`ShardDatastore`](crate::store::ShardDatastore); handles are shared
/// immutably after creation. A closed shard rejects every operation with
/// [`HoltError::ShardClosed`].
pub struct Shard {
    id: u32,
    path: PathBuf,
    state: RwLock<Option<ShardDb>>,
}

impl Shard {
    /// Opens the shard's store under `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`HoltError::ShardOpenFailed`] if the underlying store
    /// refuses the directory (permissions, corruption, lock conflict).
    pub fn open(id: u32, path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_size(config.block_size);
        block_opts.set_bloom_filter(config.bloom_bits_per_key, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.lru_cache_bytes));

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_block_based_table_factory(&block_opts);

        debug!(shard_id = id, path = %path.display(), "opening shard");
        let db = DB::open(&opts, &path).map_err(|source| HoltError::ShardOpenFailed {
            shard_id: id,
            source,
        })?;

        Ok(Self {
            id,
            path,
            state: RwLock::new(Some(ShardDb {
                db,
                fields: Mutex::new(FieldCache::default()),
            })),
        })
    }

    /// Returns the shard id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the shard's directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one or more series batches as a single atomic commit.
    ///
    /// Ensures a database-to-series index entry per batch, interns any new
    /// columns, and encodes every set value under its point key. On any
    /// error the store is left unchanged.
    pub fn write(&self, database: &str, series: &[SeriesBatch]) -> Result<()> {
        let guard = self.read_state();
        let sdb = guard.as_ref().ok_or(HoltError::ShardClosed(self.id))?;

        // Writers serialize on the allocator lock so id allocation and
        // commit order agree.
        let mut fields = lock_fields(&sdb.fields);
        let mut pending = PendingIds::default();
        let mut batch = WriteBatch::default();

        for sb in series {
            batch.put(keys::database_series_key(database, &sb.name), b"");

            let mut fids = Vec::with_capacity(sb.columns.len());
            for column in &sb.columns {
                fids.push(self.field_id_or_allocate(
                    sdb,
                    &fields,
                    &mut pending,
                    &mut batch,
                    database,
                    &sb.name,
                    column,
                )?);
            }

            let mut series_bytes = 0usize;
            for point in &sb.points {
                if point.values.len() != sb.columns.len() {
                    return Err(HoltError::WriteFailed {
                        shard_id: self.id,
                        reason: format!(
                            "series {} point carries {} values for {} columns",
                            sb.name,
                            point.values.len(),
                            sb.columns.len()
                        ),
                    });
                }
                for (fid, value) in fids.iter().zip(&point.values) {
                    let Some(value) = value else { continue };
                    let key = keys::point_key(*fid, point.time, point.sequence);
                    let encoded = value.encode()?;
                    series_bytes += key.len() + encoded.len();
                    batch.put(key, encoded);
                }
            }

            if series_bytes > MAX_SERIES_SIZE {
                return Err(HoltError::WriteFailed {
                    shard_id: self.id,
                    reason: format!(
                        "series {} batch is {} bytes, over the {} byte cap",
                        sb.name, series_bytes, MAX_SERIES_SIZE
                    ),
                });
            }
        }

        sdb.db.write(batch).map_err(|err| HoltError::WriteFailed {
            shard_id: self.id,
            reason: err.to_string(),
        })?;

        if let Some(last_id) = pending.last_id {
            fields.last_id = Some(last_id);
        }
        fields.ids.extend(pending.ids);
        Ok(())
    }

    /// Opens a read view of the shard for queries.
    ///
    /// The reader pins the shard open; `close` waits for outstanding
    /// readers before releasing the store handle.
    pub fn reader(&self) -> Result<ShardReader<'_>> {
        let guard = self.read_state();
        if guard.is_none() {
            return Err(HoltError::ShardClosed(self.id));
        }
        Ok(ShardReader { shard: self, guard })
    }

    /// Deletes every point of the series inside the time range.
    ///
    /// One range delete per column of the series, committed as a single
    /// batch. The scan upper bound is the reserved sentinel sequence, so
    /// every stored point in `[range.start, range.end]` is covered.
    pub fn delete_range(&self, database: &str, series: &str, range: TimeRange) -> Result<()> {
        let guard = self.read_state();
        let sdb = guard.as_ref().ok_or(HoltError::ShardClosed(self.id))?;

        let mut batch = WriteBatch::default();
        for (_, fid) in self.series_fields(sdb, database, series)? {
            batch.delete_range(
                keys::point_key(fid, range.start, 0),
                keys::point_key(fid, range.end, keys::MAX_SEQUENCE),
            );
        }
        sdb.db.write(batch).map_err(|err| HoltError::WriteFailed {
            shard_id: self.id,
            reason: err.to_string(),
        })
    }

    /// Removes the series entirely: all points over the full time domain,
    /// its column index entries, and its database index entry. Idempotent.
    pub fn drop_series(&self, database: &str, series: &str) -> Result<()> {
        let guard = self.read_state();
        let sdb = guard.as_ref().ok_or(HoltError::ShardClosed(self.id))?;

        let mut fields = lock_fields(&sdb.fields);
        let mut batch = WriteBatch::default();
        for (column, fid) in self.series_fields(sdb, database, series)? {
            batch.delete_range(
                keys::point_key(fid, i64::MIN, 0),
                keys::point_key(fid, i64::MAX, keys::MAX_SEQUENCE),
            );
            let key = keys::series_column_key(database, series, &column);
            fields.ids.remove(&key);
            batch.delete(key);
        }
        batch.delete(keys::database_series_key(database, series));

        debug!(shard_id = self.id, database, series, "dropping series");
        sdb.db.write(batch).map_err(|err| HoltError::WriteFailed {
            shard_id: self.id,
            reason: err.to_string(),
        })
    }

    /// Lists the series of a database, in index order.
    pub fn list_series(&self, database: &str) -> Result<Vec<String>> {
        let guard = self.read_state();
        let sdb = guard.as_ref().ok_or(HoltError::ShardClosed(self.id))?;

        let prefix = keys::database_series_prefix(database);
        let mut series = Vec::new();
        let mut iter = sdb.db.raw_iterator();
        iter.seek(&prefix);
        while iter.valid() {
            let key = match iter.key() {
                Some(key) if key.starts_with(&prefix) => key,
                _ => break,
            };
            series.push(keys::series_from_database_series_key(key, &prefix)?.to_string());
            iter.next();
        }
        scan_status(&iter)?;
        Ok(series)
    }

    /// Lists the columns of a series, in index order.
    pub fn list_columns(&self, database: &str, series: &str) -> Result<Vec<String>> {
        let guard = self.read_state();
        let sdb = guard.as_ref().ok_or(HoltError::ShardClosed(self.id))?;
        Ok(self
            .series_fields(sdb, database, series)?
            .into_iter()
            .map(|(column, _)| column)
            .collect())
    }

    /// Releases the underlying store handle. Subsequent operations fail
    /// with [`HoltError::ShardClosed`]; closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        if state.take().is_some() {
            debug!(shard_id = self.id, "closed shard");
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<ShardDb>> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    /// Looks up the field id for a column, allocating and persisting a new
    /// one when the column has never been written.
    ///
    /// The counter update and the index entry ride the caller's batch, so
    /// a crash can never apply one without the other.
    fn field_id_or_allocate(
        &self,
        sdb: &ShardDb,
        cache: &FieldCache,
        pending: &mut PendingIds,
        batch: &mut WriteBatch,
        database: &str,
        series: &str,
        column: &str,
    ) -> Result<FieldId> {
        let key = keys::series_column_key(database, series, column);
        if let Some(&fid) = cache.ids.get(&key) {
            return Ok(fid);
        }
        if let Some(&fid) = pending.ids.get(&key) {
            return Ok(fid);
        }
        if let Some(stored) = sdb.db.get(&key).map_err(store_read_error)? {
            let fid = keys::parse_field_id(&stored)?;
            pending.ids.insert(key, fid);
            return Ok(fid);
        }

        let last = match pending.last_id.or(cache.last_id) {
            Some(last) => last,
            None => match sdb.db.get(keys::NEXT_ID_KEY).map_err(store_read_error)? {
                Some(bytes) => keys::parse_counter_value(&bytes)?,
                None => 0,
            },
        };
        let fid = last + 1;
        batch.put(&key, keys::field_id_value(fid));
        batch.put(keys::NEXT_ID_KEY, keys::counter_value(fid));
        pending.ids.insert(key, fid);
        pending.last_id = Some(fid);
        Ok(fid)
    }

    /// Returns `(column, field id)` for every column of the series.
    fn series_fields(
        &self,
        sdb: &ShardDb,
        database: &str,
        series: &str,
    ) -> Result<Vec<(String, FieldId)>> {
        let prefix = keys::series_column_prefix(database, series);
        let mut out = Vec::new();
        let mut iter = sdb.db.raw_iterator();
        iter.seek(&prefix);
        while iter.valid() {
            let (key, value) = match (iter.key(), iter.value()) {
                (Some(key), Some(value)) if key.starts_with(&prefix) => (key, value),
                _ => break,
            };
            let column = keys::column_from_series_column_key(key, &prefix)?.to_string();
            out.push((column, keys::parse_field_id(value)?));
            iter.next();
        }
        scan_status(&iter)?;
        Ok(out)
    }
}

/// A pinned read view of an open shard. Dropping the reader releases the
/// pin and every iterator derived from it.
pub struct ShardReader<'s> {
    shard: &'s Shard,
    guard: RwLockReadGuard<'s, Option<ShardDb>>,
}

impl ShardReader<'_> {
    /// Merges per-column range scans into rows ordered by
    /// `(time, sequence)`.
    ///
    /// Ascending order yields the smallest `(time, sequence)` first and
    /// resolves time ties toward the older sequence; descending yields the
    /// largest first and resolves ties toward the newer sequence. Each row
    /// combines all queried columns observed at the chosen `(time,
    /// sequence)`, with `None` for absent columns.
    ///
    /// # Errors
    ///
    /// Returns [`HoltError::FieldLookup`] when a column is unknown in the
    /// series.
    pub fn query(
        &self,
        database: &str,
        series: &str,
        columns: &[&str],
        range: TimeRange,
        order: QueryOrder,
        limit: Option<usize>,
    ) -> Result<QueryRows<'_>> {
        let sdb = self.sdb()?;

        let mut cursors = Vec::with_capacity(columns.len());
        for column in columns {
            let fid = self.field_id(sdb, database, series, column)?;
            let mut iter = sdb.db.raw_iterator();
            match order {
                QueryOrder::Ascending => iter.seek(keys::point_key(fid, range.start, 0)),
                QueryOrder::Descending => {
                    iter.seek_for_prev(keys::point_key(fid, range.end, keys::MAX_SEQUENCE))
                }
            }
            let mut cursor = FieldCursor {
                iter,
                field_id: fid,
                range,
                order,
                head: None,
            };
            cursor.settle()?;
            cursors.push(cursor);
        }

        Ok(QueryRows {
            cursors,
            order,
            remaining: limit,
            failed: false,
        })
    }

    fn sdb(&self) -> Result<&ShardDb> {
        self.guard
            .as_ref()
            .ok_or(HoltError::ShardClosed(self.shard.id))
    }

    fn field_id(
        &self,
        sdb: &ShardDb,
        database: &str,
        series: &str,
        column: &str,
    ) -> Result<FieldId> {
        let key = keys::series_column_key(database, series, column);
        let mut cache = lock_fields(&sdb.fields);
        if let Some(&fid) = cache.ids.get(&key) {
            return Ok(fid);
        }
        match sdb.db.get(&key).map_err(store_read_error)? {
            Some(stored) => {
                let fid = keys::parse_field_id(&stored)?;
                cache.ids.insert(key, fid);
                Ok(fid)
            }
            None => Err(HoltError::FieldLookup {
                series: series.to_string(),
                column: column.to_string(),
            }),
        }
    }
}

/// One field's range scan position within a query.
struct FieldCursor<'r> {
    iter: DBRawIterator<'r>,
    field_id: FieldId,
    range: TimeRange,
    order: QueryOrder,
    head: Option<(i64, u64)>,
}

impl FieldCursor<'_> {
    /// Reads the iterator position into `head`, clearing it once the scan
    /// leaves this field's keys or the time range.
    fn settle(&mut self) -> Result<()> {
        self.head = None;
        if !self.iter.valid() {
            return scan_status(&self.iter);
        }
        let key = self
            .iter
            .key()
            .ok_or_else(|| HoltError::Internal("valid iterator without a key".into()))?;
        if !keys::point_key_matches_field(key, self.field_id) {
            return Ok(());
        }
        let (_, time, sequence) = keys::parse_point_key(key)?;
        if self.range.contains(time) {
            self.head = Some((time, sequence));
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        let prev = self.head;
        match self.order {
            QueryOrder::Ascending => self.iter.next(),
            QueryOrder::Descending => self.iter.prev(),
        }
        self.settle()?;
        // Duplicate (field, time, sequence) is impossible by construction.
        if self.head.is_some() && self.head == prev {
            return Err(HoltError::CorruptStore(format!(
                "duplicate point key for field {} at {:?}",
                self.field_id, prev
            )));
        }
        Ok(())
    }

    fn value(&self) -> Result<FieldValue> {
        let bytes = self
            .iter
            .value()
            .ok_or_else(|| HoltError::Internal("valid iterator without a value".into()))?;
        FieldValue::decode(bytes)
    }
}

/// Lazy stream of merged query rows. Dropping it releases the underlying
/// iterators on every exit path, including early termination.
pub struct QueryRows<'r> {
    cursors: Vec<FieldCursor<'r>>,
    order: QueryOrder,
    remaining: Option<usize>,
    failed: bool,
}

impl std::fmt::Debug for QueryRows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRows")
            .field("order", &self.order)
            .field("remaining", &self.remaining)
            .field("failed", &self.failed)
            .finish()
    }
}

impl QueryRows<'_> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        if self.failed || self.remaining == Some(0) {
            return Ok(None);
        }

        let mut chosen: Option<(i64, u64)> = None;
        for cursor in &self.cursors {
            let Some(head) = cursor.head else { continue };
            chosen = Some(match (chosen, self.order) {
                (None, _) => head,
                (Some(best), QueryOrder::Ascending) => best.min(head),
                (Some(best), QueryOrder::Descending) => best.max(head),
            });
        }
        let Some((time, sequence)) = chosen else {
            return Ok(None);
        };

        let mut values = vec![None; self.cursors.len()];
        for (slot, cursor) in self.cursors.iter_mut().enumerate() {
            if cursor.head == Some((time, sequence)) {
                values[slot] = Some(cursor.value()?);
                cursor.advance()?;
            }
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Some(Row {
            time,
            sequence,
            values,
        }))
    }
}

impl Iterator for QueryRows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(row) => row.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn lock_fields(fields: &Mutex<FieldCache>) -> MutexGuard<'_, FieldCache> {
    fields.lock().unwrap_or_else(|err| err.into_inner())
}

fn store_read_error(err: rocksdb::Error) -> HoltError {
    HoltError::CorruptStore(format!("store read failed: {err}"))
}

fn scan_status(iter: &DBRawIterator<'_>) -> Result<()> {
    iter.status()
        .map_err(|err| HoltError::CorruptStore(format!("range scan failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Point;
    use tempfile::TempDir;

    fn open_shard(dir: &TempDir) -> Shard {
        Shard::open(1, dir.path().join("00001"), &StoreConfig::new(dir.path())).unwrap()
    }

    fn float_batch(series: &str, column: &str, points: &[(i64, u64, f64)]) -> SeriesBatch {
        SeriesBatch {
            name: series.to_string(),
            columns: vec![column.to_string()],
            points: points
                .iter()
                .map(|&(time, sequence, value)| Point {
                    time,
                    sequence,
                    values: vec![Some(FieldValue::Float(value))],
                })
                .collect(),
        }
    }

    fn collect_rows(
        shard: &Shard,
        series: &str,
        columns: &[&str],
        range: TimeRange,
        order: QueryOrder,
        limit: Option<usize>,
    ) -> Vec<Row> {
        let reader = shard.reader().unwrap();
        reader
            .query("db1", series, columns, range, order, limit)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_write_then_query_single_point() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write("db1", &[float_batch("s", "v", &[(100, 1, 23.0)])])
            .unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::new(0, 1000),
            QueryOrder::Ascending,
            None,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, 100);
        assert_eq!(rows[0].values[0], Some(FieldValue::Float(23.0)));
    }

    #[test]
    fn test_query_descending_order() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[float_batch("s", "v", &[(101, 1, 4.0), (102, 1, 10.0), (103, 1, 5.0)])],
            )
            .unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Descending,
            None,
        );
        let times: Vec<i64> = rows.iter().map(|row| row.time).collect();
        assert_eq!(times, vec![103, 102, 101]);
    }

    #[test]
    fn test_query_limit() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[float_batch("s", "v", &[(100, 1, 1.0), (101, 1, 2.0), (102, 1, 3.0)])],
            )
            .unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Descending,
            Some(2),
        );
        let times: Vec<i64> = rows.iter().map(|row| row.time).collect();
        assert_eq!(times, vec![102, 101]);
    }

    #[test]
    fn test_sequence_tiebreak_is_observable() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[float_batch("s", "v", &[(100, 2, 2.0), (100, 1, 1.0), (100, 3, 3.0)])],
            )
            .unwrap();

        let ascending = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        );
        let sequences: Vec<u64> = ascending.iter().map(|row| row.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        let descending = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Descending,
            None,
        );
        let sequences: Vec<u64> = descending.iter().map(|row| row.sequence).collect();
        assert_eq!(sequences, vec![3, 2, 1]);
    }

    #[test]
    fn test_cross_column_merge_fills_nulls() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[SeriesBatch {
                    name: "s".to_string(),
                    columns: vec!["a".to_string(), "b".to_string()],
                    points: vec![
                        Point {
                            time: 10,
                            sequence: 1,
                            values: vec![
                                Some(FieldValue::Float(1.0)),
                                Some(FieldValue::Float(2.0)),
                            ],
                        },
                        Point {
                            time: 20,
                            sequence: 1,
                            values: vec![Some(FieldValue::Float(3.0)), None],
                        },
                    ],
                }],
            )
            .unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["a", "b"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, 10);
        assert_eq!(rows[0].values[0], Some(FieldValue::Float(1.0)));
        assert_eq!(rows[0].values[1], Some(FieldValue::Float(2.0)));
        assert_eq!(rows[1].time, 20);
        assert_eq!(rows[1].values[0], Some(FieldValue::Float(3.0)));
        assert_eq!(rows[1].values[1], None);
    }

    #[test]
    fn test_time_range_bounds_are_inclusive() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[float_batch("s", "v", &[(99, 1, 0.0), (100, 1, 1.0), (200, 1, 2.0), (201, 1, 3.0)])],
            )
            .unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::new(100, 200),
            QueryOrder::Ascending,
            None,
        );
        let times: Vec<i64> = rows.iter().map(|row| row.time).collect();
        assert_eq!(times, vec![100, 200]);
    }

    #[test]
    fn test_unknown_column_fails_lookup() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write("db1", &[float_batch("s", "v", &[(100, 1, 1.0)])])
            .unwrap();

        let reader = shard.reader().unwrap();
        let err = reader
            .query(
                "db1",
                "s",
                &["nope"],
                TimeRange::all(),
                QueryOrder::Ascending,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, HoltError::FieldLookup { .. }));
    }

    #[test]
    fn test_field_ids_are_stable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00001");
        let config = StoreConfig::new(dir.path());

        {
            let shard = Shard::open(1, &path, &config).unwrap();
            shard
                .write("db1", &[float_batch("s", "v", &[(100, 1, 1.0)])])
                .unwrap();
            shard.close();
        }

        let shard = Shard::open(1, &path, &config).unwrap();
        // A new column must get a fresh id, and the old data stays visible.
        shard
            .write("db1", &[float_batch("s", "w", &[(100, 1, 9.0)])])
            .unwrap();
        let rows = collect_rows(
            &shard,
            "s",
            &["v", "w"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], Some(FieldValue::Float(1.0)));
        assert_eq!(rows[0].values[1], Some(FieldValue::Float(9.0)));
    }

    #[test]
    fn test_delete_range_clears_interval() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[float_batch("s", "v", &[(10, 1, 1.0), (20, 1, 2.0), (30, 1, 3.0)])],
            )
            .unwrap();

        shard.delete_range("db1", "s", TimeRange::new(15, 25)).unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        );
        let times: Vec<i64> = rows.iter().map(|row| row.time).collect();
        assert_eq!(times, vec![10, 30]);
    }

    #[test]
    fn test_drop_series_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write("db1", &[float_batch("s", "v", &[(10, 1, 1.0)])])
            .unwrap();

        shard.drop_series("db1", "s").unwrap();
        shard.drop_series("db1", "s").unwrap();

        assert!(shard.list_series("db1").unwrap().is_empty());
        assert!(shard.list_columns("db1", "s").unwrap().is_empty());
    }

    #[test]
    fn test_list_series() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard
            .write(
                "db1",
                &[
                    float_batch("cpu", "v", &[(10, 1, 1.0)]),
                    float_batch("mem", "v", &[(10, 1, 1.0)]),
                ],
            )
            .unwrap();
        shard
            .write("db2", &[float_batch("disk", "v", &[(10, 1, 1.0)])])
            .unwrap();

        assert_eq!(shard.list_series("db1").unwrap(), vec!["cpu", "mem"]);
        assert_eq!(shard.list_series("db2").unwrap(), vec!["disk"]);
    }

    #[test]
    fn test_closed_shard_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        shard.close();

        assert!(matches!(
            shard.write("db1", &[float_batch("s", "v", &[(1, 1, 1.0)])]),
            Err(HoltError::ShardClosed(1))
        ));
        assert!(matches!(shard.reader(), Err(HoltError::ShardClosed(1))));
        assert!(matches!(
            shard.list_series("db1"),
            Err(HoltError::ShardClosed(1))
        ));
    }

    #[test]
    fn test_oversized_series_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);

        let blob = "x".repeat(64 * 1024);
        let points: Vec<Point> = (0..20)
            .map(|i| Point {
                time: i,
                sequence: 1,
                values: vec![Some(FieldValue::Str(blob.clone()))],
            })
            .collect();
        let batch = SeriesBatch {
            name: "s".to_string(),
            columns: vec!["v".to_string()],
            points,
        };

        let err = shard.write("db1", &[batch]).unwrap_err();
        assert!(matches!(err, HoltError::WriteFailed { shard_id: 1, .. }));
        // Atomic batch semantics: nothing from the failed write is visible.
        assert!(shard.list_series("db1").unwrap().is_empty());
    }

    #[test]
    fn test_rewriting_same_keys_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir);
        let batch = float_batch("s", "v", &[(100, 1, 23.0), (200, 1, 42.0)]);

        shard.write("db1", &[batch.clone()]).unwrap();
        shard.write("db1", &[batch]).unwrap();

        let rows = collect_rows(
            &shard,
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        );
        assert_eq!(rows.len(), 2);
    }
}
