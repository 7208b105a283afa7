//! Crash-recovery tests: WAL replay back into shards.
//!
//! The write path is WAL first, then the shard. After a crash the WAL is
//! reopened and records are replayed, filtered by shard set and by the
//! per-peer high-water request number. Replay is idempotent because point
//! keys are content-addressed by `(field id, time, sequence)`.

use lutra_holt::{
    FieldValue, Point, QueryOrder, SeriesBatch, ShardDatastore, StoreConfig, TimeRange, Wal,
    WriteRequest,
};
use tempfile::TempDir;

fn request(shard_id: u32, time: i64, value: f64) -> WriteRequest {
    WriteRequest {
        database: "db1".to_string(),
        shard_id,
        series: vec![SeriesBatch {
            name: "s".to_string(),
            columns: vec!["v".to_string()],
            points: vec![Point {
                time,
                sequence: 1,
                values: vec![Some(FieldValue::Float(value))],
            }],
        }],
    }
}

fn point_count(store: &ShardDatastore, shard_id: u32) -> usize {
    let shard = store.get_or_create(shard_id).unwrap();
    let reader = shard.reader().unwrap();
    reader
        .query(
            "db1",
            "s",
            &["v"],
            TimeRange::all(),
            QueryOrder::Ascending,
            None,
        )
        .unwrap()
        .collect::<lutra_holt::Result<Vec<_>>>()
        .unwrap()
        .len()
}

#[test]
fn test_replay_after_crash_filters_shards_and_high_water_mark() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path());

    // Five requests across shards {1, 2, 1, 2, 3}, numbered 1..=5. The
    // process dies before any of them reach a shard.
    {
        let mut wal = Wal::open(config.layout().wal_dir()).unwrap();
        for (shard_id, time) in [(1u32, 10i64), (2, 20), (1, 30), (2, 40), (3, 50)] {
            let payload = request(shard_id, time, time as f64).encode().unwrap();
            wal.append(shard_id, payload).unwrap();
        }
        wal.close().unwrap();
    }

    // Reopen and catch shards 1 and 2 up from request number 3.
    let wal = Wal::open(config.layout().wal_dir()).unwrap();
    let store = ShardDatastore::new(config.clone()).unwrap();

    let mut replayed = Vec::new();
    for record in wal.replay(&[1, 2], 3).unwrap() {
        let record = record.unwrap();
        let request = WriteRequest::decode(&record.payload).unwrap();
        assert_eq!(request.shard_id, record.shard_id);
        store.write(&request).unwrap();
        replayed.push((record.request_number, record.shard_id));
    }
    assert_eq!(replayed, vec![(3, 1), (4, 2)]);

    // Record 5 (shard 3) was outside the filter.
    assert_eq!(point_count(&store, 1), 1);
    assert_eq!(point_count(&store, 2), 1);
    assert_eq!(point_count(&store, 3), 0);
}

#[test]
fn test_replaying_a_record_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path());

    let wal = Wal::open(config.layout().wal_dir()).unwrap();
    let store = ShardDatastore::new(config.clone()).unwrap();

    let req = request(1, 100, 23.0);
    wal.append(1, req.encode().unwrap()).unwrap();
    store.write(&req).unwrap();

    // A peer that already applied request 1 replays it again.
    for _ in 0..2 {
        for record in wal.replay(&[1], 1).unwrap() {
            let record = record.unwrap();
            store
                .write(&WriteRequest::decode(&record.payload).unwrap())
                .unwrap();
        }
    }

    assert_eq!(point_count(&store, 1), 1);
}

#[test]
fn test_append_order_matches_request_numbers_across_restart() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path());

    {
        let mut wal = Wal::open(config.layout().wal_dir()).unwrap();
        assert_eq!(wal.append(1, request(1, 1, 1.0).encode().unwrap()).unwrap(), 1);
        assert_eq!(wal.append(1, request(1, 2, 2.0).encode().unwrap()).unwrap(), 2);
        wal.close().unwrap();
    }

    let wal = Wal::open(config.layout().wal_dir()).unwrap();
    assert_eq!(wal.append(1, request(1, 3, 3.0).encode().unwrap()).unwrap(), 3);

    let numbers: Vec<u32> = wal
        .replay(&[1], 0)
        .unwrap()
        .map(|record| record.unwrap().request_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn test_bookmark_survives_restart_as_replay_floor() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path());

    {
        let wal = Wal::open(config.layout().wal_dir()).unwrap();
        wal.append(1, request(1, 10, 1.0).encode().unwrap()).unwrap();
        wal.append(1, request(1, 20, 2.0).encode().unwrap()).unwrap();
        wal.force_bookmark().unwrap();
        wal.append(1, request(1, 30, 3.0).encode().unwrap()).unwrap();
    }

    // Resume replay just past the checkpointed request number.
    let wal = Wal::open(config.layout().wal_dir()).unwrap();
    let bookmark = Wal::read_bookmark(config.layout().wal_dir())
        .unwrap()
        .unwrap();
    assert_eq!(bookmark, 2);

    let numbers: Vec<u32> = wal
        .replay(&[1], bookmark + 1)
        .unwrap()
        .map(|record| record.unwrap().request_number)
        .collect();
    assert_eq!(numbers, vec![3]);
}
