//! Single-process event log backed by memory-mapped segment files.
//!
//! Events are persisted synchronously: `append` resolves only after the
//! entry's bytes are flushed. Entries are checksummed with CRC32 so a torn
//! write is detected on the next scan instead of silently replayed.
//!
//! # On-disk entry format (little-endian)
//!
//! ```text
//! [4 bytes: entry_length][8 bytes: offset][8 bytes: timestamp]
//! [N bytes: event payload][4 bytes: CRC32]
//! ```
//!
//! - `entry_length` counts everything after itself (offset + timestamp +
//!   payload + CRC = 20 + N).
//! - The CRC covers offset ‖ timestamp ‖ payload, not `entry_length`.
//!
//! Segments are named `segment-{first_offset:020}.log` inside the log
//! directory and rotated when full.

use super::{EventBatch, EventLog, Offset, QueueError, QueueEvent, SequencedEvent};
use crate::utils::current_time_millis;
use async_trait::async_trait;
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Default segment size (64 MB).
const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Fixed bytes before the payload: offset + timestamp.
const ENTRY_HEADER: usize = 8 + 8;
/// Trailing CRC32 bytes.
const ENTRY_CRC: usize = 4;

/// How many events one tail batch carries at most.
const DEFAULT_BATCH_SIZE: usize = 256;

/// Sleep between polls when a tail has caught up and no new append has
/// arrived through the watch channel yet.
const TAIL_IDLE_WAIT: Duration = Duration::from_millis(10);

struct SegmentWriter {
    mmap: MmapMut,
    write_pos: usize,
    capacity: usize,
    path: PathBuf,
}

impl SegmentWriter {
    fn create(path: &Path, capacity: usize) -> Result<Self, QueueError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| storage(e, path))?;
        file.set_len(capacity as u64).map_err(|e| storage(e, path))?;
        // SAFETY: the file is exclusively owned by this process and is not
        // truncated while the mapping is alive.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(|e| storage(e, path))? };
        Ok(Self {
            mmap,
            write_pos: 0,
            capacity,
            path: path.to_path_buf(),
        })
    }

    fn open_existing(path: &Path) -> Result<Self, QueueError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| storage(e, path))?;
        let capacity = file.metadata().map_err(|e| storage(e, path))?.len() as usize;
        // SAFETY: see `create`.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(|e| storage(e, path))? };
        let write_pos = scan_used(&mmap, capacity);
        Ok(Self {
            mmap,
            write_pos,
            capacity,
            path: path.to_path_buf(),
        })
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.write_pos)
    }

    fn write_entry(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        let end = self.write_pos + bytes.len();
        if end > self.capacity {
            return Err(QueueError::Storage {
                message: format!(
                    "entry of {} bytes does not fit segment capacity {}",
                    bytes.len(),
                    self.capacity
                ),
                path: Some(self.path.clone()),
            });
        }
        self.mmap[self.write_pos..end].copy_from_slice(bytes);
        self.mmap
            .flush_range(self.write_pos, bytes.len())
            .map_err(|e| storage(e, &self.path))?;
        self.write_pos = end;
        Ok(())
    }
}

/// Find the end of the last valid entry in a segment.
fn scan_used(data: &[u8], capacity: usize) -> usize {
    let mut pos = 0usize;
    loop {
        if pos + 4 > capacity {
            return pos;
        }
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        if len < ENTRY_HEADER + ENTRY_CRC || pos + 4 + len > capacity {
            return pos;
        }
        pos += 4 + len;
    }
}

struct WriterState {
    writer: SegmentWriter,
    last_offset: Offset,
}

struct LocalLogInner {
    dir: PathBuf,
    segment_size: usize,
    state: Mutex<WriterState>,
    end_tx: watch::Sender<Offset>,
    closed: AtomicBool,
    batch_size: usize,
}

/// The local single-process event log.
#[derive(Clone)]
pub struct LocalEventLog {
    inner: Arc<LocalLogInner>,
}

impl LocalEventLog {
    /// Open or create a log in `dir` with the default segment size.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, QueueError> {
        Self::open_with(dir, DEFAULT_SEGMENT_SIZE, DEFAULT_BATCH_SIZE)
    }

    /// Open or create with explicit segment and tail-batch sizes.
    pub fn open_with<P: AsRef<Path>>(
        dir: P,
        segment_size: usize,
        batch_size: usize,
    ) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage(e, &dir))?;

        let mut starts = list_segments(&dir)?;
        starts.sort_unstable();

        let (writer, last_offset) = if let Some(latest) = starts.last() {
            let path = segment_path(&dir, *latest);
            let writer = SegmentWriter::open_existing(&path)?;
            let last = last_offset_in(&writer.mmap[..writer.write_pos], *latest)?;
            (writer, last)
        } else {
            let path = segment_path(&dir, 0);
            (SegmentWriter::create(&path, segment_size)?, -1)
        };

        info!(dir = %dir.display(), last_offset, "local event log opened");
        let (end_tx, _) = watch::channel(last_offset);
        Ok(Self {
            inner: Arc::new(LocalLogInner {
                dir,
                segment_size,
                state: Mutex::new(WriterState { writer, last_offset }),
                end_tx,
                closed: AtomicBool::new(false),
                batch_size,
            }),
        })
    }

    /// Scan every entry in every segment, verifying CRCs.
    ///
    /// Used at startup; a corrupt entry is a fatal error, not something to
    /// replay around.
    pub fn verify_integrity(&self) -> Result<(), QueueError> {
        let mut starts = list_segments(&self.inner.dir)?;
        starts.sort_unstable();
        for start in starts {
            let path = segment_path(&self.inner.dir, start);
            let data = fs::read(&path).map_err(|e| storage(e, &path))?;
            let used = scan_used(&data, data.len());
            parse_entries(&data[..used], Offset::MIN, usize::MAX)?;
        }
        Ok(())
    }

    fn read_batch(&self, from: Offset, max: usize) -> Result<EventBatch, QueueError> {
        let mut starts = list_segments(&self.inner.dir)?;
        starts.sort_unstable();
        // The segment that may contain `from` is the last one starting at
        // or before it; later segments follow in order.
        let first_idx = starts
            .iter()
            .rposition(|s| *s <= from.max(0))
            .unwrap_or(0);

        let mut batch = Vec::new();
        for start in &starts[first_idx..] {
            if batch.len() >= max {
                break;
            }
            let path = segment_path(&self.inner.dir, *start);
            let data = fs::read(&path).map_err(|e| storage(e, &path))?;
            let used = scan_used(&data, data.len());
            let mut events = parse_entries(&data[..used], from, max - batch.len())?;
            batch.append(&mut events);
        }
        Ok(batch)
    }
}

#[async_trait]
impl EventLog for LocalEventLog {
    async fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let payload = event.to_bytes();
        let timestamp = current_time_millis();

        let offset = {
            let mut state = self.inner.state.lock();
            let offset = state.last_offset + 1;
            let entry = encode_entry(offset, timestamp, &payload);
            if entry.len() > state.writer.remaining() {
                rotate(&self.inner.dir, self.inner.segment_size, &mut state.writer, offset)?;
            }
            state.writer.write_entry(&entry)?;
            state.last_offset = offset;
            offset
        };

        let _ = self.inner.end_tx.send(offset);
        Ok((offset, timestamp))
    }

    async fn tail(&self, from_offset: Offset) -> Result<mpsc::Receiver<EventBatch>, QueueError> {
        let (tx, rx) = mpsc::channel(16);
        let log = self.clone();
        let mut end_rx = self.inner.end_tx.subscribe();
        let mut next = from_offset.max(0);

        tokio::spawn(async move {
            loop {
                let batch = match log.read_batch(next, log.inner.batch_size) {
                    Ok(batch) => batch,
                    Err(err) => {
                        error!(%err, "event log tail read failed, retrying");
                        tokio::time::sleep(TAIL_IDLE_WAIT).await;
                        continue;
                    }
                };
                if batch.is_empty() {
                    if log.inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    // Wake on the next append, or poll again shortly; both
                    // paths re-read from `next`.
                    let _ = tokio::time::timeout(TAIL_IDLE_WAIT, end_rx.changed()).await;
                    continue;
                }
                next = batch[batch.len() - 1].offset + 1;
                if tx.send(batch).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn end_offset(&self) -> Result<Offset, QueueError> {
        Ok(self.inner.state.lock().last_offset)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.inner.closed.store(true, Ordering::Release);
        let last = self.inner.state.lock().last_offset;
        let _ = self.inner.end_tx.send(last);
        info!(last_offset = last, "local event log closed");
        Ok(())
    }
}

fn encode_entry(offset: Offset, timestamp: u64, payload: &[u8]) -> Vec<u8> {
    let entry_len = (ENTRY_HEADER + payload.len() + ENTRY_CRC) as u32;
    let mut out = Vec::with_capacity(4 + entry_len as usize);
    out.extend_from_slice(&entry_len.to_le_bytes());
    out.extend_from_slice(&(offset as u64).to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(payload);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out[4..]);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    out
}

/// Parse entries from a fully scanned region, keeping those with
/// `offset >= from`, up to `max` of them.
fn parse_entries(data: &[u8], from: Offset, max: usize) -> Result<EventBatch, QueueError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= data.len() && out.len() < max {
        let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap_or_default()) as usize;
        if len < ENTRY_HEADER + ENTRY_CRC || pos + 4 + len > data.len() {
            break;
        }
        let body = &data[pos + 4..pos + 4 + len];
        let offset = i64::from_le_bytes(body[..8].try_into().unwrap_or_default());
        let timestamp = u64::from_le_bytes(body[8..16].try_into().unwrap_or_default());
        let payload = &body[16..len - ENTRY_CRC];
        let stored_crc =
            u32::from_le_bytes(body[len - ENTRY_CRC..].try_into().unwrap_or_default());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body[..len - ENTRY_CRC]);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(QueueError::Corrupt {
                offset,
                expected_crc: stored_crc,
                actual_crc,
            });
        }

        if offset >= from {
            let event = QueueEvent::from_bytes(payload)
                .map_err(|source| QueueError::Codec { offset, source })?;
            out.push(SequencedEvent {
                offset,
                timestamp,
                event,
            });
        }
        pos += 4 + len;
    }
    Ok(out)
}

fn last_offset_in(used: &[u8], segment_start: Offset) -> Result<Offset, QueueError> {
    let mut last = segment_start - 1;
    let mut pos = 0usize;
    while pos + 4 <= used.len() {
        let len = u32::from_le_bytes(used[pos..pos + 4].try_into().unwrap_or_default()) as usize;
        if len < ENTRY_HEADER + ENTRY_CRC || pos + 4 + len > used.len() {
            break;
        }
        last = i64::from_le_bytes(used[pos + 4..pos + 12].try_into().unwrap_or_default());
        pos += 4 + len;
    }
    Ok(last)
}

fn rotate(
    dir: &Path,
    segment_size: usize,
    writer: &mut SegmentWriter,
    first_offset: Offset,
) -> Result<(), QueueError> {
    let old_path = writer.path.clone();
    let old_len = writer.write_pos;
    writer.mmap.flush().map_err(|e| storage(e, &old_path))?;

    let new_path = segment_path(dir, first_offset);
    *writer = SegmentWriter::create(&new_path, segment_size)?;

    // Shrink the finished segment to its used size. Best effort: a failure
    // here only wastes disk, it does not lose entries.
    if let Ok(file) = OpenOptions::new().write(true).open(&old_path)
        && file.set_len(old_len as u64).is_err()
    {
        warn!(path = %old_path.display(), "could not truncate rotated segment");
    }
    info!(path = %new_path.display(), first_offset, "event log segment rotated");
    Ok(())
}

fn segment_path(dir: &Path, first_offset: Offset) -> PathBuf {
    dir.join(format!("segment-{:020}.log", first_offset.max(0)))
}

fn list_segments(dir: &Path) -> Result<Vec<Offset>, QueueError> {
    let mut starts = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| storage(e, dir))? {
        let entry = entry.map_err(|e| storage(e, dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(num) = name
            .strip_prefix("segment-")
            .and_then(|rest| rest.strip_suffix(".log"))
            && let Ok(start) = num.parse::<Offset>()
        {
            starts.push(start);
        }
    }
    Ok(starts)
}

fn storage(err: impl std::fmt::Display, path: &Path) -> QueueError {
    QueueError::Storage {
        message: err.to_string(),
        path: Some(path.to_path_buf()),
    }
}
