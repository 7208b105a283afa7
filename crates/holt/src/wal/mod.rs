//! Write-ahead log: durable, append-only journal of every write request
//! received by this node.
//!
//! One log file serves all shards. Appends flow through a single writer
//! task that owns the file handle, so request numbers are strictly
//! increasing and records never interleave. Replay reads through a
//! duplicated descriptor with positioned reads; its cursor is independent
//! of concurrent appends.
//!
//! # Record Format
//!
//! ```text
//! ┌──────────────────┬────────────────────────┬──────────────┬─────────┐
//! │ shard_id u32 BE  │ request_number u32 BE  │ length u32 BE│ payload │
//! └──────────────────┴────────────────────────┴──────────────┴─────────┘
//! ```
//!
//! Payloads are opaque bytes; the request schema lives outside this
//! module. A request number of zero is reserved as "unassigned".

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{HoltError, Result};

/// Name of the single append-only log file inside the WAL directory.
const LOG_FILE_NAME: &str = "log.wal";

/// Name of the durability checkpoint file.
const BOOKMARK_FILE_NAME: &str = "bookmark";

/// Magic bytes of the bookmark file.
const BOOKMARK_MAGIC: [u8; 4] = *b"HBKM";

/// Size of a record header: shard id, request number, payload length.
pub const ENTRY_HEADER_SIZE: usize = 12;

/// Depth of the append queue feeding the writer task.
const APPEND_QUEUE_DEPTH: usize = 16;

/// Fixed header preceding every record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryHeader {
    shard_id: u32,
    request_number: u32,
    length: u32,
}

impl EntryHeader {
    fn encode(&self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut bytes = [0u8; ENTRY_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.shard_id.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.request_number.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    fn decode(bytes: [u8; ENTRY_HEADER_SIZE]) -> Self {
        Self {
            shard_id: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            request_number: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            length: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        }
    }
}

enum Job {
    Append {
        shard_id: u32,
        payload: Vec<u8>,
        done: Sender<Result<u32>>,
    },
    Bookmark {
        done: Sender<Result<u32>>,
    },
}

/// The node-wide write-ahead log.
///
/// Appends block the caller until the writer task has handed the record
/// to the OS; [`Wal::force_bookmark`] flushes every prior append to
/// stable storage.
pub struct Wal {
    jobs: Option<Sender<Job>>,
    writer: Option<JoinHandle<()>>,
    file: File,
    dir: PathBuf,
}

impl Wal {
    /// Opens (or creates) the log under `dir` and starts the writer task.
    ///
    /// The existing file is scanned to restore the next request number to
    /// `max(request_number) + 1`. A torn tail fails the open with
    /// [`HoltError::CorruptLog`]; the operator decides whether to
    /// quarantine the file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let (next_request_number, end_offset) = scan_log(&file)?;
        debug!(
            next_request_number,
            end_offset,
            path = %path.display(),
            "opened write-ahead log"
        );

        let writer_file = file.try_clone()?;
        let bookmark_path = dir.join(BOOKMARK_FILE_NAME);
        let (jobs, queue) = bounded(APPEND_QUEUE_DEPTH);
        let writer = std::thread::Builder::new()
            .name("holt-wal-writer".to_string())
            .spawn(move || run_writer(writer_file, bookmark_path, queue, next_request_number))?;

        Ok(Self {
            jobs: Some(jobs),
            writer: Some(writer),
            file,
            dir,
        })
    }

    /// Appends one record and returns its assigned request number.
    ///
    /// Blocks until the writer task acknowledges the append. A partial
    /// payload write fails with [`HoltError::ShortWrite`].
    pub fn append(&self, shard_id: u32, payload: Vec<u8>) -> Result<u32> {
        let (done, confirmation) = bounded(1);
        self.sender()?
            .send(Job::Append {
                shard_id,
                payload,
                done,
            })
            .map_err(|_| writer_stopped())?;
        confirmation.recv().map_err(|_| writer_stopped())?
    }

    /// Replays records whose shard id is in `shard_ids` and whose request
    /// number is at least `from_request_number`, in file order.
    ///
    /// The returned stream is lazy and finite; end-of-file terminates it
    /// cleanly, a partial record terminates it with
    /// [`HoltError::CorruptLog`].
    pub fn replay(&self, shard_ids: &[u32], from_request_number: u32) -> Result<Replay> {
        let file = self.file.try_clone().map_err(HoltError::ReplayReadFailed)?;
        Ok(Replay {
            file,
            offset: 0,
            shard_ids: shard_ids.iter().copied().collect(),
            from_request_number,
            failed: false,
        })
    }

    /// Flushes every prior append to stable storage and checkpoints the
    /// latest assigned request number in the bookmark file. Returns that
    /// number (zero when nothing has been appended).
    pub fn force_bookmark(&self) -> Result<u32> {
        let (done, confirmation) = bounded(1);
        self.sender()?
            .send(Job::Bookmark { done })
            .map_err(|_| writer_stopped())?;
        confirmation.recv().map_err(|_| writer_stopped())?
    }

    /// Reads the request number recorded by the last bookmark under `dir`,
    /// if any.
    pub fn read_bookmark(dir: impl AsRef<Path>) -> Result<Option<u32>> {
        let path = dir.as_ref().join(BOOKMARK_FILE_NAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if bytes.len() != 12 || bytes[0..4] != BOOKMARK_MAGIC {
            return Err(HoltError::CorruptLog {
                offset: 0,
                reason: "malformed bookmark file".to_string(),
            });
        }
        let crc = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        if crc32fast::hash(&bytes[0..8]) != crc {
            return Err(HoltError::CorruptLog {
                offset: 0,
                reason: "bookmark checksum mismatch".to_string(),
            });
        }
        Ok(Some(u32::from_be_bytes(bytes[4..8].try_into().unwrap())))
    }

    /// Returns the WAL directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drains pending appends, stops the writer task, and joins it.
    pub fn close(&mut self) -> Result<()> {
        drop(self.jobs.take());
        if let Some(writer) = self.writer.take() {
            writer
                .join()
                .map_err(|_| HoltError::Internal("wal writer panicked".to_string()))?;
        }
        Ok(())
    }

    fn sender(&self) -> Result<&Sender<Job>> {
        self.jobs.as_ref().ok_or_else(writer_stopped)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("failed to close WAL cleanly: {err}");
        }
    }
}

fn writer_stopped() -> HoltError {
    HoltError::Internal("wal writer stopped".to_string())
}

/// The single writer task. Owns the file handle for its whole life; exits
/// when every sender is gone, fsyncing on the way out.
fn run_writer(
    mut file: File,
    bookmark_path: PathBuf,
    queue: Receiver<Job>,
    mut next_request_number: u32,
) {
    while let Ok(job) = queue.recv() {
        match job {
            Job::Append {
                shard_id,
                payload,
                done,
            } => {
                let request_number = next_request_number;
                let result = append_record(&mut file, shard_id, request_number, &payload)
                    .map(|()| request_number);
                if result.is_ok() {
                    next_request_number += 1;
                }
                let _ = done.send(result);
            }
            Job::Bookmark { done } => {
                let latest = next_request_number - 1;
                let _ = done.send(write_bookmark(&file, &bookmark_path, latest));
            }
        }
    }
    if let Err(err) = file.sync_all() {
        warn!("final WAL sync failed: {err}");
    }
}

fn append_record(file: &mut File, shard_id: u32, request_number: u32, payload: &[u8]) -> Result<()> {
    let header = EntryHeader {
        shard_id,
        request_number,
        length: payload.len() as u32,
    };
    file.write_all(&header.encode())?;
    let written = file.write(payload)?;
    if written < payload.len() {
        return Err(HoltError::ShortWrite {
            written,
            expected: payload.len(),
        });
    }
    Ok(())
}

fn write_bookmark(file: &File, path: &Path, request_number: u32) -> Result<u32> {
    file.sync_all()?;

    let mut bytes = Vec::with_capacity(12);
    bytes.extend_from_slice(&BOOKMARK_MAGIC);
    bytes.extend_from_slice(&request_number.to_be_bytes());
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_be_bytes());

    let tmp = path.with_extension("tmp");
    let mut out = File::create(&tmp)?;
    out.write_all(&bytes)?;
    out.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(request_number)
}

/// Walks the whole log, validating record framing, and returns the next
/// request number to assign plus the end offset.
fn scan_log(file: &File) -> Result<(u32, u64)> {
    let len = file.metadata()?.len();
    let mut offset = 0u64;
    let mut max_request = 0u32;
    let mut buf = [0u8; ENTRY_HEADER_SIZE];

    while offset < len {
        if len - offset < ENTRY_HEADER_SIZE as u64 {
            return Err(HoltError::CorruptLog {
                offset,
                reason: "truncated record header".to_string(),
            });
        }
        file.read_exact_at(&mut buf, offset)?;
        let header = EntryHeader::decode(buf);
        let end = offset + ENTRY_HEADER_SIZE as u64 + u64::from(header.length);
        if end > len {
            return Err(HoltError::CorruptLog {
                offset,
                reason: format!(
                    "record payload of {} bytes runs past end of file",
                    header.length
                ),
            });
        }
        max_request = max_request.max(header.request_number);
        offset = end;
    }
    Ok((max_request + 1, offset))
}

/// One record yielded by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Shard the request was addressed to.
    pub shard_id: u32,
    /// Request number assigned at append time.
    pub request_number: u32,
    /// The opaque request payload.
    pub payload: Vec<u8>,
}

/// Lazy, finite stream of replayed records.
pub struct Replay {
    file: File,
    offset: u64,
    shard_ids: HashSet<u32>,
    from_request_number: u32,
    failed: bool,
}

impl Replay {
    fn next_record(&mut self) -> Result<Option<WalRecord>> {
        loop {
            let mut buf = [0u8; ENTRY_HEADER_SIZE];
            match read_full_at(&self.file, &mut buf, self.offset)? {
                ReadOutcome::Eof => return Ok(None),
                ReadOutcome::Partial(read) => {
                    return Err(HoltError::CorruptLog {
                        offset: self.offset,
                        reason: format!(
                            "truncated record header ({read} of {ENTRY_HEADER_SIZE} bytes)"
                        ),
                    });
                }
                ReadOutcome::Full => {}
            }
            let header = EntryHeader::decode(buf);
            let payload_offset = self.offset + ENTRY_HEADER_SIZE as u64;
            let next_offset = payload_offset + u64::from(header.length);

            if !self.shard_ids.contains(&header.shard_id)
                || header.request_number < self.from_request_number
            {
                self.offset = next_offset;
                continue;
            }

            let mut payload = vec![0u8; header.length as usize];
            match read_full_at(&self.file, &mut payload, payload_offset)? {
                ReadOutcome::Full => {}
                ReadOutcome::Eof | ReadOutcome::Partial(_) => {
                    return Err(HoltError::CorruptLog {
                        offset: payload_offset,
                        reason: "truncated record payload".to_string(),
                    });
                }
            }
            self.offset = next_offset;
            return Ok(Some(WalRecord {
                shard_id: header.shard_id,
                request_number: header.request_number,
                payload,
            }));
        }
    }
}

impl Iterator for Replay {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Eof,
    Partial(usize),
}

fn read_full_at(file: &File, buf: &mut [u8], mut offset: u64) -> Result<ReadOutcome> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial(filled)
                });
            }
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(HoltError::ReplayReadFailed(err)),
        }
    }
    Ok(ReadOutcome::Full)
}
