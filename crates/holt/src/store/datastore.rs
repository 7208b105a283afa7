//! Process-wide registry of shards: lazy open, concurrent-safe creation,
//! close, and destroy.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::config::{DataLayout, StoreConfig};
use crate::error::{HoltError, Result};
use crate::request::WriteRequest;
use crate::store::shard::Shard;

/// Replication dispatcher fed by [`ShardDatastore::buffer_write`]. The
/// buffer owns each enqueued request and fans it out to replica peers;
/// `enqueue` must not block. Back-pressure is the buffer's concern: on
/// overflow it drops the oldest pending request for the same destination.
pub trait WriteBuffer: Send + Sync {
    /// Takes ownership of a request for asynchronous replication.
    fn enqueue(&self, request: WriteRequest);
}

/// Owns every shard on this node.
///
/// Shard handles are reference-counted and shared immutably after
/// creation; this registry is the only component that closes or drops
/// them.
pub struct ShardDatastore {
    layout: DataLayout,
    config: StoreConfig,
    shards: RwLock<HashMap<u32, Arc<Shard>>>,
    write_buffer: RwLock<Option<Arc<dyn WriteBuffer>>>,
}

impl ShardDatastore {
    /// Creates the datastore, making sure the shard root directory exists.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let layout = config.layout();
        fs::create_dir_all(layout.shard_db_dir())?;
        Ok(Self {
            layout,
            config,
            shards: RwLock::new(HashMap::new()),
            write_buffer: RwLock::new(None),
        })
    }

    /// Returns the shard handle, opening the shard if necessary.
    ///
    /// Concurrent callers for the same id get the same handle; exactly one
    /// open occurs.
    pub fn get_or_create(&self, shard_id: u32) -> Result<Arc<Shard>> {
        {
            let shards = self.shards.read().unwrap_or_else(|err| err.into_inner());
            if let Some(shard) = shards.get(&shard_id) {
                return Ok(Arc::clone(shard));
            }
        }

        let mut shards = self.shards.write().unwrap_or_else(|err| err.into_inner());
        // Re-check: another writer may have opened it between the locks.
        if let Some(shard) = shards.get(&shard_id) {
            return Ok(Arc::clone(shard));
        }

        let dir = self.layout.shard_dir(shard_id);
        info!(shard_id, dir = %dir.display(), "opening or creating shard");
        let shard = Arc::new(Shard::open(shard_id, dir, &self.config)?);
        shards.insert(shard_id, Arc::clone(&shard));
        Ok(shard)
    }

    /// Applies a write request to its target shard, opening it lazily.
    pub fn write(&self, request: &WriteRequest) -> Result<()> {
        let shard = self.get_or_create(request.shard_id)?;
        shard.write(&request.database, &request.series)
    }

    /// Hands a request to the replication write buffer. Non-blocking; a
    /// datastore without a buffer attached drops the request with a
    /// warning.
    pub fn buffer_write(&self, request: WriteRequest) {
        let buffer = self
            .write_buffer
            .read()
            .unwrap_or_else(|err| err.into_inner());
        match buffer.as_ref() {
            Some(buffer) => buffer.enqueue(request),
            None => warn!(
                shard_id = request.shard_id,
                "no write buffer attached, dropping buffered write"
            ),
        }
    }

    /// Attaches the replication write buffer.
    pub fn set_write_buffer(&self, buffer: Arc<dyn WriteBuffer>) {
        let mut slot = self
            .write_buffer
            .write()
            .unwrap_or_else(|err| err.into_inner());
        *slot = Some(buffer);
    }

    /// Closes the shard and deletes its directory.
    ///
    /// The registry entry is removed even when directory removal fails;
    /// the caller re-attempts cleanup by id.
    pub fn delete_shard(&self, shard_id: u32) -> Result<()> {
        let shard = {
            let mut shards = self.shards.write().unwrap_or_else(|err| err.into_inner());
            shards.remove(&shard_id)
        };
        if let Some(shard) = shard {
            shard.close();
        }

        let dir = self.layout.shard_dir(shard_id);
        info!(shard_id, dir = %dir.display(), "dropping shard");
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HoltError::DropFailed { shard_id, source }),
        }
    }

    /// Closes every shard. Best-effort; the registry keeps the entries so
    /// later operations report `ShardClosed` rather than reopening.
    pub fn close(&self) {
        let shards = self.shards.read().unwrap_or_else(|err| err.into_inner());
        for shard in shards.values() {
            shard.close();
        }
    }

    /// Returns the directory layout in use.
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }
}
