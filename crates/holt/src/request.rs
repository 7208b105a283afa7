//! The write request carried through the WAL and dispatched to shards.
//!
//! The WAL treats the payload as opaque bytes; only the datastore and the
//! replication layers look inside. Encoding is deterministic, so replaying
//! a logged record re-applies exactly the on-disk effects of the original
//! write.

use serde::{Deserialize, Serialize};

use crate::error::{HoltError, Result};
use crate::store::SeriesBatch;

/// A write addressed to one shard of one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Target database.
    pub database: String,
    /// Target shard.
    pub shard_id: u32,
    /// Series batches to apply.
    pub series: Vec<SeriesBatch>,
}

impl WriteRequest {
    /// Serializes the request for the WAL or the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|err| HoltError::EncodeFailed(err.to_string()))
    }

    /// Deserializes a request from a WAL payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|err| HoltError::DecodeFailed(err.to_string()))
    }
}
