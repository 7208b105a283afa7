//! Holt - Lutra per-node storage engine
//!
//! This crate provides the durability and indexing substrate for a Lutra
//! node: a registry of independent key-value-backed shards plus the
//! write-ahead log that fronts them.
//!
//! # Components
//!
//! - [`ShardDatastore`]: process-wide registry of shards with lazy open
//! - [`Shard`]: one time range of storage, with write / query / delete
//! - [`Wal`]: append-only journal with filtered replay by shard set
//! - [`WriteRequest`]: the payload carried through the WAL
//!
//! # Example
//!
//! ```rust,ignore
//! use lutra_holt::{ShardDatastore, StoreConfig, Wal, WriteRequest};
//!
//! let config = StoreConfig::new("/var/lib/lutra");
//! let datastore = ShardDatastore::new(config.clone())?;
//! let wal = Wal::open(config.layout().wal_dir())?;
//!
//! // Durability first, then the shard.
//! let request = WriteRequest { /* ... */ };
//! wal.append(request.shard_id, request.encode()?)?;
//! datastore.write(&request)?;
//!
//! // After a crash, bring a peer's shards back up to date.
//! for record in wal.replay(&[1, 2], high_water_mark)? {
//!     let record = record?;
//!     datastore.write(&WriteRequest::decode(&record.payload)?)?;
//! }
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod request;
pub mod store;
pub mod wal;

pub use config::{DataLayout, StoreConfig};
pub use error::{HoltError, Result};
pub use request::WriteRequest;
pub use store::{
    FieldId, FieldValue, Point, QueryOrder, Row, SeriesBatch, Shard, ShardDatastore, ShardReader,
    TimeRange, WriteBuffer,
};
pub use wal::{Replay, Wal, WalRecord};
